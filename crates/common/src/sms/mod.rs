//! SMS gateway seam

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Transport-level status returned by the SMS provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SmsStatus {
    pub accepted: bool,
    pub provider_id: Option<String>,
}

/// Trait for SMS delivery
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, from: &str, to: &str, body: &str) -> Result<SmsStatus>;
}
