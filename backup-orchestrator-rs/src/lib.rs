//! Backup Orchestrator Library
//!
//! Drives remote backup agents through registration, backup, restore and
//! cancellation, and keeps the backup managers (real and virtual) that own
//! and share the resulting backups.

pub mod agent;
pub mod backup_manager;
pub mod config;
pub mod db;
pub mod error;
pub mod ids;
pub mod job;
pub mod models;
pub mod protocol;
pub mod routes;
pub mod state;
pub mod ws;

// Re-export commonly used types
pub use agent::Agent;
pub use backup_manager::BackupManager;
pub use config::AppConfig;
pub use error::{OrchestratorError, Result};
