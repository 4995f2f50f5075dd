mod model;
mod repository;

pub(crate) use model::{FormInstanceDB, VisitInstanceDB};
pub use repository::SubjectRepository;
