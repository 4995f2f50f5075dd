mod model;
mod repository;

pub(crate) use repository::{find_version, load_fields, resolve_default_version_tx};
pub use repository::FormTemplateRepository;
