//! reviewtask-core: domain logic for turning pull request reviews into tasks.
//!
//! This crate owns the review source adapter, comment normalization, task
//! synthesis, reconciliation against persisted task sets, and the on-disk
//! task store.

pub mod config;
pub mod errors;
pub mod ids;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod reconcile;
pub mod scm;
pub mod source;
pub mod store;
pub mod synth;

pub use errors::{CoreError, CoreResult};
