//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod batch_repo;
pub mod external_upload_repo;
pub mod generation_job_repo;
pub mod reference_image_repo;

pub use batch_repo::BatchRepo;
pub use external_upload_repo::ExternalUploadRepo;
pub use generation_job_repo::GenerationJobRepo;
pub use reference_image_repo::ReferenceImageRepo;
