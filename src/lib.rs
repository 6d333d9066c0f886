//! # Orderbridge Library
//!
//! Core functionality for the orderbridge service: clients for the Trendyol
//! order feed and the Airtable destination store, the reconciliation engine
//! that syncs one into the other, and the HTTP trigger surface.

pub mod airtable;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod scheduler;
pub mod server;
pub mod status;
pub mod sync;
pub mod telemetry;
pub mod trendyol;
pub mod watermark;
