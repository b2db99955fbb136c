//! The asynchronous ingestion pipeline: dedup gate, work queue, and the
//! single background worker driving fetch → store → upload → process.

mod task;
mod worker;

pub use task::{TaskSnapshot, TaskStatus};
pub use worker::{Pipeline, PipelineStatus};
