//! Push gateway seam
//!
//! The dispatcher builds one [`PushPayload`] per audience and hands
//! it to a [`PushGateway`]. The production implementation talks to a
//! OneSignal-compatible REST endpoint; tests inject a recording fake.

use crate::config::PushConfig;
use crate::errors::{BookingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Kind of push being sent; selects sounds on the payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    SuitableJob,
    JobAccepted,
    JobCancelled,
    SessionStartRemind,
    JobExpired,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::SuitableJob => "suitable_job",
            NotificationType::JobAccepted => "job_accepted",
            NotificationType::JobCancelled => "job_cancelled",
            NotificationType::SessionStartRemind => "session_start_remind",
            NotificationType::JobExpired => "job_expired",
        }
    }
}

/// One audience tag: an equality predicate on a user attribute
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub relation: String,
    pub value: String,
}

/// Build the audience filter for a set of recipient emails: equality
/// predicates OR-combined, the way the gateway expects them
/// interleaved.
pub fn email_tags(emails: &[String]) -> Vec<Value> {
    let mut tags = Vec::new();
    for email in emails {
        if !tags.is_empty() {
            tags.push(serde_json::json!({ "operator": "OR" }));
        }
        let tag = Tag {
            key: "email".to_string(),
            relation: "=".to_string(),
            value: email.to_lowercase(),
        };
        tags.push(serde_json::json!(tag));
    }
    tags
}

/// Channel-specific push payload
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushPayload {
    /// OR-combined audience tags from [`email_tags`]
    pub tags: Vec<Value>,

    /// Job id, notification type and any extra context
    pub data: BTreeMap<String, Value>,

    pub title: String,

    /// Message text per locale
    pub contents: BTreeMap<String, String>,

    pub android_sound: String,
    pub ios_sound: String,

    /// Deferred delivery instant for night-delayed sends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_after: Option<DateTime<Utc>>,
}

impl PushPayload {
    pub fn new(
        title: &str,
        notification_type: NotificationType,
        immediate: bool,
        message: &str,
        emails: &[String],
    ) -> Self {
        let (android_sound, ios_sound) = match notification_type {
            NotificationType::SuitableJob if !immediate => {
                ("normal_booking".to_string(), "normal_booking.mp3".to_string())
            }
            NotificationType::SuitableJob => (
                "emergency_booking".to_string(),
                "emergency_booking.mp3".to_string(),
            ),
            _ => ("default".to_string(), "default".to_string()),
        };

        let mut data = BTreeMap::new();
        data.insert(
            "notification_type".to_string(),
            Value::String(notification_type.as_str().to_string()),
        );

        let mut contents = BTreeMap::new();
        contents.insert("en".to_string(), message.to_string());

        Self {
            tags: email_tags(emails),
            data,
            title: title.to_string(),
            contents,
            android_sound,
            ios_sound,
            send_after: None,
        }
    }

    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn with_send_after(mut self, at: DateTime<Utc>) -> Self {
        self.send_after = Some(at);
        self
    }
}

/// Trait for push delivery
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Deliver one payload. The transport result is logged by the
    /// caller and never interpreted further.
    async fn send(&self, payload: &PushPayload) -> Result<()>;
}

/// OneSignal-compatible REST client
pub struct OneSignalClient {
    client: reqwest::Client,
    config: PushConfig,
}

#[derive(Serialize)]
struct OneSignalRequest<'a> {
    app_id: &'a str,
    tags: &'a [Value],
    data: &'a BTreeMap<String, Value>,
    #[serde(rename = "title")]
    heading: BTreeMap<&'a str, &'a str>,
    contents: &'a BTreeMap<String, String>,
    ios_badge_type: &'a str,
    ios_badge_count: u32,
    android_sound: &'a str,
    ios_sound: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    send_after: Option<String>,
}

impl OneSignalClient {
    pub fn new(config: PushConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Make request with bounded retry
    async fn send_with_retry(&self, payload: &PushPayload) -> Result<()> {
        let max_retries = 3;
        let mut last_error = None;

        for attempt in 0..max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * (2_u64.pow(attempt as u32)));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries,
                        error = %e,
                        "Push request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BookingError::Transport {
            channel: "push".into(),
            message: "Unknown error after retries".into(),
        }))
    }

    async fn make_request(&self, payload: &PushPayload) -> Result<()> {
        let mut heading = BTreeMap::new();
        heading.insert("en", payload.title.as_str());

        let request = OneSignalRequest {
            app_id: &self.config.app_id,
            tags: &payload.tags,
            data: &payload.data,
            heading,
            contents: &payload.contents,
            ios_badge_type: "Increase",
            ios_badge_count: 1,
            android_sound: &payload.android_sound,
            ios_sound: &payload.ios_sound,
            send_after: payload
                .send_after
                .map(|at| at.format("%Y-%m-%d %H:%M:%S GMT%z").to_string()),
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Basic {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| BookingError::Transport {
                channel: "push".into(),
                message: format!("Request failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BookingError::Transport {
                channel: "push".into(),
                message: format!("Gateway error {status}: {body}"),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl PushGateway for OneSignalClient {
    async fn send(&self, payload: &PushPayload) -> Result<()> {
        self.send_with_retry(payload).await
    }
}
