//! Data model: source configuration, harvest jobs, persisted resources,
//! and the transient normalized record adapters produce.

mod job;
mod record;
mod resource;
mod source;

pub use job::{HarvestJob, JobStatus, SampleRecord};
pub use record::NormalizedRecord;
pub use resource::Resource;
pub use source::{Protocol, Source, SourceStatus};
