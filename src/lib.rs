// Core modules
pub mod config;
pub mod scheduler;
pub mod workflow;

// Re-export commonly used types
pub use config::Config;
pub use scheduler::{new_run_id, Scheduler};
pub use workflow::{BackupError, BackupWorkflow, RunSummary, ARCHIVE_STEP, START_STEP};

// Re-export crate modules
pub use d1_backup_durable as durable;
pub use d1_backup_export as export;
pub use d1_backup_retention as retention;
pub use d1_backup_storage as storage;
pub use d1_backup_types as types;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
