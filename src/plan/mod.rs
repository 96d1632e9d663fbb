// src/plan/mod.rs

//! Pure planning policies.
//!
//! - [`batch`] partitions a checkpoint's unit count into batches.
//! - [`resources`] maps (stage class, attempt) to a resource request.

pub mod batch;
pub mod resources;

pub use batch::{batch_label, parse_descriptor, Batch, BatchPolicy};
pub use resources::{ClassPolicy, Escalation, ResourcePolicy, ResourceRequest};
