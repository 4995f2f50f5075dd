mod subjects_model;
mod subjects_traits;

pub use subjects_model::*;
pub use subjects_traits::SubjectRepositoryTrait;
