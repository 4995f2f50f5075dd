// Mirrors the embedded migrations.

diesel::table! {
    audit_log (seq) {
        seq -> BigInt,
        actor -> Text,
        occurred_at -> Text,
        entity_type -> Text,
        entity_id -> Text,
        action -> Text,
        old_value -> Nullable<Text>,
        new_value -> Nullable<Text>,
        reason -> Nullable<Text>,
    }
}

diesel::table! {
    form_assignments (id) {
        id -> Text,
        visit_definition_id -> Text,
        form_template_id -> Text,
        default_version_id -> Text,
        required -> Bool,
        double_entry -> Bool,
        electronic_signature -> Bool,
        ordinal -> Integer,
        status -> Text,
        created_at -> Text,
        updated_at -> Text,
        updated_by -> Text,
        hide_form -> Bool,
        sdv_code -> Nullable<Text>,
        participant_form -> Bool,
    }
}

diesel::table! {
    form_instances (id) {
        id -> Text,
        visit_instance_id -> Text,
        form_assignment_id -> Text,
        status -> Text,
        interviewer_name -> Nullable<Text>,
        interview_date -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
        created_by -> Text,
    }
}

diesel::table! {
    form_snapshots (id) {
        id -> Text,
        form_instance_id -> Text,
        version_id -> Text,
        field_count -> Integer,
        fields -> Text,
        answers -> Text,
        captured_at -> Text,
        captured_by -> Text,
    }
}

diesel::table! {
    form_template_versions (id) {
        id -> Text,
        template_id -> Text,
        version_number -> Integer,
        name -> Text,
        status -> Text,
        revision_notes -> Nullable<Text>,
        created_at -> Text,
        created_by -> Text,
    }
}

diesel::table! {
    form_templates (id) {
        id -> Text,
        oid -> Text,
        name -> Text,
        description -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    group_classes (id) {
        id -> Text,
        study_id -> Text,
        name -> Text,
        class_type -> Text,
        subject_assignment -> Text,
        status -> Text,
        created_at -> Text,
        updated_at -> Text,
        updated_by -> Text,
    }
}

diesel::table! {
    sites (id) {
        id -> Text,
        study_id -> Text,
        unique_identifier -> Text,
        name -> Text,
        principal_investigator -> Nullable<Text>,
        expected_enrollment -> Nullable<Integer>,
        status -> Text,
        created_at -> Text,
        updated_at -> Text,
        updated_by -> Text,
    }
}

diesel::table! {
    studies (id) {
        id -> Text,
        unique_identifier -> Text,
        name -> Text,
        summary -> Nullable<Text>,
        principal_investigator -> Nullable<Text>,
        sponsor -> Nullable<Text>,
        status -> Text,
        owner -> Text,
        created_at -> Text,
        updated_at -> Text,
        updated_by -> Nullable<Text>,
    }
}

diesel::table! {
    study_groups (id) {
        id -> Text,
        group_class_id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        status -> Text,
        created_at -> Text,
        updated_at -> Text,
        updated_by -> Text,
    }
}

diesel::table! {
    study_parameters (study_id, name) {
        study_id -> Text,
        name -> Text,
        value -> Text,
        updated_at -> Text,
        updated_by -> Text,
    }
}

diesel::table! {
    subjects (id) {
        id -> Text,
        study_id -> Text,
        label -> Text,
        secondary_label -> Nullable<Text>,
        person_id -> Nullable<Text>,
        gender -> Nullable<Text>,
        date_of_birth -> Nullable<Text>,
        site_id -> Nullable<Text>,
        status -> Text,
        enrolled_at -> Text,
        created_by -> Text,
    }
}

diesel::table! {
    template_fields (id) {
        id -> Text,
        version_id -> Text,
        name -> Text,
        label -> Nullable<Text>,
        field_type -> Text,
        required -> Bool,
        options -> Nullable<Text>,
        ordinal -> Integer,
        section -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    visit_definitions (id) {
        id -> Text,
        study_id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        ordinal -> Integer,
        repeating -> Bool,
        visit_type -> Text,
        category -> Nullable<Text>,
        target_day -> Nullable<Integer>,
        earliest_day -> Nullable<Integer>,
        latest_day -> Nullable<Integer>,
        status -> Text,
        created_at -> Text,
        updated_at -> Text,
        updated_by -> Text,
    }
}

diesel::table! {
    visit_instances (id) {
        id -> Text,
        subject_id -> Text,
        visit_definition_id -> Text,
        occurrence -> Integer,
        status -> Text,
        scheduled_at -> Nullable<Text>,
        location -> Nullable<Text>,
        created_at -> Text,
        created_by -> Text,
    }
}

diesel::joinable!(form_assignments -> visit_definitions (visit_definition_id));
diesel::joinable!(form_assignments -> form_templates (form_template_id));
diesel::joinable!(form_assignments -> form_template_versions (default_version_id));
diesel::joinable!(form_instances -> form_assignments (form_assignment_id));
diesel::joinable!(form_instances -> visit_instances (visit_instance_id));
diesel::joinable!(form_snapshots -> form_instances (form_instance_id));
diesel::joinable!(form_template_versions -> form_templates (template_id));
diesel::joinable!(group_classes -> studies (study_id));
diesel::joinable!(sites -> studies (study_id));
diesel::joinable!(study_groups -> group_classes (group_class_id));
diesel::joinable!(study_parameters -> studies (study_id));
diesel::joinable!(subjects -> studies (study_id));
diesel::joinable!(template_fields -> form_template_versions (version_id));
diesel::joinable!(visit_definitions -> studies (study_id));
diesel::joinable!(visit_instances -> subjects (subject_id));
diesel::joinable!(visit_instances -> visit_definitions (visit_definition_id));

diesel::allow_tables_to_appear_in_same_query!(
    audit_log,
    form_assignments,
    form_instances,
    form_snapshots,
    form_template_versions,
    form_templates,
    group_classes,
    sites,
    studies,
    study_groups,
    study_parameters,
    subjects,
    template_fields,
    visit_definitions,
    visit_instances,
);
