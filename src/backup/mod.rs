//! Backup Integrity & Cascade Safety
//!
//! Turns destructive database operations into recoverable experiments:
//!
//! - **Backup**: capture an object's DDL, content checksum and dependencies
//! - **Validate**: score each artifact for completeness and freshness
//! - **Restore**: replay a valid artifact's DDL
//! - **Cascade tests**: back up, delete, observe the blast radius, restore
//! - **Report**: re-validate everything on disk under the current rules

pub mod cascade;
pub mod checksum;
pub mod framework;
pub mod report;
pub mod restore;
pub mod store;
pub mod validator;

pub use checksum::{backup_id, compute_metadata_checksum};
pub use framework::BackupFramework;
pub use store::{BackupStore, FileBackupStore};
pub use validator::BackupValidator;
