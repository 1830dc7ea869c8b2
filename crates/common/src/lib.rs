//! Tolkbridge Common Library
//!
//! Shared code for the booking core and its hosts:
//! - Domain models (jobs, users, translator assignments)
//! - Store seam with an in-memory implementation
//! - Outbound gateway seams (push, SMS, email)
//! - Event bus seam
//! - Error types and handling
//! - Configuration management
//! - Metrics and telemetry

pub mod config;
pub mod errors;
pub mod events;
pub mod mail;
pub mod metrics;
pub mod models;
pub mod push;
pub mod sms;
pub mod store;
pub mod telemetry;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{BookingError, Result};
pub use store::{JobStore, MemoryStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
