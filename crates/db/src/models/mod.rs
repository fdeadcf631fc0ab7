//! Row structs and DTOs, one module per table group.

pub mod batch;
pub mod generation_job;
pub mod reference_image;
