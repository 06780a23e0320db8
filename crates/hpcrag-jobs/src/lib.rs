//! # hpcrag-jobs
//!
//! Remote job orchestration for hpcrag.
//!
//! This crate provides:
//! - [`JobManager`]: submits embedding and generation jobs to the cluster,
//!   polls them, and exposes job records to callers
//! - [`JobMonitor`]: bounded background polling of in-flight jobs
//! - [`ResultReconciler`]: validation and dual write into vector and graph stores
//! - Configuration loading and local spool stores used by the `hpcrag` binary

pub mod config;
pub mod events;
pub mod manager;
pub mod monitor;
pub mod reconciler;
pub mod spool;
mod table;

pub use config::{ClusterConfig, ConfigError, ConfigResult, HpcragConfig, JobsConfig};
pub use events::JobEvent;
pub use manager::{JobManager, JobManagerBuilder};
pub use monitor::{JobMonitor, MonitorHandle};
pub use reconciler::{validate_embeddings, ReconcileOutcome, ResultReconciler};
pub use spool::{GraphRecord, JsonlGraphStore, JsonlVectorStore};

// Re-export core types for convenience
pub use hpcrag_core::{
    Error, GenerationParams, GenerationRequest, JobKind, JobRecord, JobStatus, Result,
};
