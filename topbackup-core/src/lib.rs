pub mod collaborators;
pub mod config;
pub mod constants;
pub mod error;
pub mod file_ops;
pub mod guarded;
pub mod local_source;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod process_dump;
pub mod reconcile;
pub mod resilience;
pub mod scheduler;
pub mod store;
pub mod update;
pub mod upload;

pub use error::{BackupError, ErrorKind, Result};
