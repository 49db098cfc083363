//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::backup::BackupFramework;
use crate::connection::ConnectionManager;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Live database connections, one dialect each
    pub connections: ConnectionManager,

    /// Backup, restore and cascade-test engine (has internal counters)
    pub framework: Arc<BackupFramework>,
}

impl AppState {
    pub fn new(connections: ConnectionManager, framework: BackupFramework) -> Self {
        Self {
            connections,
            framework: Arc::new(framework),
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
