//! textbatch: Bulk Execution of Structured-Output LLM Requests
//!
//! Applies one task (instructions plus a JSON output schema) to many texts, either live
//! through a bounded-concurrency fan-out with validation retries, or as durable deferred
//! batch jobs that survive process restarts.

pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod logging;
pub mod provider;
pub mod task;
pub mod types;
