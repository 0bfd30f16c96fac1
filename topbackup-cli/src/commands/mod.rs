mod backup;
mod check_update;
mod daemon;
mod status;
mod sync;

// Daemon
pub use daemon::run_daemon;

// Backup commands
pub use backup::{run_backup, run_history};

// Sync commands
pub use sync::run_sync;

// Status commands
pub use status::{run_status, show_client_version};

// Version commands
pub use check_update::{run_check_update, run_publish_version};
