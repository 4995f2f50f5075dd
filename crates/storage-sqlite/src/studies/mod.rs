mod model;
mod pipeline;
mod repository;
mod synchronizer;
mod upsert;

pub use repository::StudyRepository;
