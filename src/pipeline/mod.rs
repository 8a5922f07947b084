// Data processing pipeline: ingestion, processing, storage and the run loop

pub mod ingestion;
pub mod processing;
pub mod runner;
pub mod storage;

pub use runner::{PipelineRunner, RunReport};
