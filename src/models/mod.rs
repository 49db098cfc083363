//! Data models and DTOs (Data Transfer Objects)
//!
//! Backup artifacts, validation policy, cascade tests and reports. All of
//! these serialize with camelCase keys, both on disk and over the API.

pub mod backup;
pub mod cascade;
pub mod object;
pub mod report;

// Re-export commonly used types
pub use backup::*;
pub use cascade::*;
pub use object::*;
pub use report::*;

use serde::Serialize;

/// Generic success response
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Message-only response (no data)
#[derive(Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}
