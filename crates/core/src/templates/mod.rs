mod templates_model;
mod templates_traits;

pub use templates_model::*;
pub use templates_traits::FormTemplateRepositoryTrait;
