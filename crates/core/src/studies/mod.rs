mod studies_model;
mod studies_service;
mod studies_traits;
mod sync_model;

pub use studies_model::*;
pub use studies_service::StudyService;
pub use studies_traits::{StudyRepositoryTrait, StudyServiceTrait};
pub use sync_model::*;
