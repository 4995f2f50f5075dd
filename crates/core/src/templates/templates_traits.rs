use async_trait::async_trait;

use super::templates_model::{
    FormTemplate, FormTemplateVersion, NewFormTemplate, NewTemplateField, NewTemplateVersion,
    TemplateField, VersionStatus,
};
use crate::errors::Result;

/// Catalogue of reusable form templates and their immutable-by-convention
/// versions.
#[async_trait]
pub trait FormTemplateRepositoryTrait: Send + Sync {
    async fn create_template(&self, new_template: NewFormTemplate, actor: String)
        -> Result<FormTemplate>;

    /// Appends the next version number for `template_id`, fields included.
    async fn add_version(
        &self,
        template_id: String,
        new_version: NewTemplateVersion,
        actor: String,
    ) -> Result<FormTemplateVersion>;

    async fn add_field(
        &self,
        version_id: String,
        field: NewTemplateField,
        actor: String,
    ) -> Result<TemplateField>;

    async fn set_version_status(
        &self,
        version_id: String,
        status: VersionStatus,
        actor: String,
    ) -> Result<FormTemplateVersion>;

    fn get_version(&self, version_id: &str) -> Result<Option<FormTemplateVersion>>;

    fn list_fields(&self, version_id: &str) -> Result<Vec<TemplateField>>;

    /// Highest-numbered active version of the template.
    fn resolve_default_version(&self, template_id: &str) -> Result<Option<String>>;
}
