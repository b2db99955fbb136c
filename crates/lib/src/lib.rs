//! Sluice core library — webhook gateway, deduplication, and the
//! asynchronous media ingestion pipeline shared by the CLI binary.

pub mod config;
pub mod dedup;
pub mod docs;
pub mod gateway;
pub mod media;
pub mod message;
pub mod pipeline;
