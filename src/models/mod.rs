//! # Data Models
//!
//! Shared response models for the HTTP surface. The remote-API payload
//! shapes live with their clients (`trendyol`, `airtable`).

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "orderbridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
