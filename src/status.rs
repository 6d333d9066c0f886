//! Marketplace status mapping
//!
//! Maps the raw Trendyol order status string onto the two destination status
//! fields. The mapping is total: any unknown or absent status falls back to
//! the defaults.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Destination shipping status field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum ShippingStatus {
    New,
    Shipped,
}

/// Destination payment status field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refund,
}

impl ShippingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShippingStatus::New => "New",
            ShippingStatus::Shipped => "Shipped",
        }
    }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Refund => "Refund",
        }
    }
}

impl std::fmt::Display for ShippingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a raw marketplace status onto `(shipping, payment)`.
///
/// Case-insensitive. `Shipped`/`Delivered` mark the package as shipped but
/// say nothing about payment; only `Invoiced` implies both.
pub fn map_status(raw: Option<&str>) -> (ShippingStatus, PaymentStatus) {
    let normalized = raw.map(|s| s.trim().to_ascii_lowercase());
    match normalized.as_deref() {
        Some("shipped") | Some("delivered") => (ShippingStatus::Shipped, PaymentStatus::Pending),
        Some("invoiced") => (ShippingStatus::Shipped, PaymentStatus::Paid),
        Some("paid") => (ShippingStatus::New, PaymentStatus::Paid),
        Some("cancelled") => (ShippingStatus::New, PaymentStatus::Failed),
        Some("refunded") => (ShippingStatus::New, PaymentStatus::Refund),
        _ => (ShippingStatus::New, PaymentStatus::Pending),
    }
}
