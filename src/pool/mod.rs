//! Concurrency primitives shared by the OCR and translation stages.
//!
//! * [`resource`]: a fixed set of expensive, reusable clients (OCR engines)
//!   handed out one at a time and returned by an RAII guard.
//! * [`worker`]: runs N independent units of work under a concurrency
//!   ceiling and returns their results index-aligned with the input.

pub mod resource;
pub mod worker;

pub use resource::{Pooled, ResourcePool};
pub use worker::{host_parallelism, BatchOutcome, UnitError, WorkerPool};
