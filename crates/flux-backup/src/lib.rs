mod create;
mod error;
mod restore;

pub use create::{backup_members, create_backup};
pub use error::{BackupError, Result};
pub use restore::restore_backup;
