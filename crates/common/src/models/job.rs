//! Job entity: one interpretation booking request

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job status enum
///
/// `pending` is the initial state. `completed`, `withdrawbefore24`,
/// `withdrawafter24` and `not_carried_out_customer` are terminal;
/// a `timedout` job may re-enter `pending` through reopen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Assigned,
    Started,
    Completed,
    #[serde(rename = "withdrawbefore24")]
    WithdrawBefore24,
    #[serde(rename = "withdrawafter24")]
    WithdrawAfter24,
    #[serde(rename = "timedout")]
    TimedOut,
    NotCarriedOutCustomer,
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => JobStatus::Pending,
            "assigned" => JobStatus::Assigned,
            "started" => JobStatus::Started,
            "completed" => JobStatus::Completed,
            "withdrawbefore24" => JobStatus::WithdrawBefore24,
            "withdrawafter24" => JobStatus::WithdrawAfter24,
            "timedout" => JobStatus::TimedOut,
            "not_carried_out_customer" => JobStatus::NotCarriedOutCustomer,
            _ => JobStatus::Pending,
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => "pending".to_string(),
            JobStatus::Assigned => "assigned".to_string(),
            JobStatus::Started => "started".to_string(),
            JobStatus::Completed => "completed".to_string(),
            JobStatus::WithdrawBefore24 => "withdrawbefore24".to_string(),
            JobStatus::WithdrawAfter24 => "withdrawafter24".to_string(),
            JobStatus::TimedOut => "timedout".to_string(),
            JobStatus::NotCarriedOutCustomer => "not_carried_out_customer".to_string(),
        }
    }
}

impl JobStatus {
    /// Terminal states can never be left through the update path
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::WithdrawBefore24
                | JobStatus::WithdrawAfter24
                | JobStatus::NotCarriedOutCustomer
        )
    }
}

/// Payment category of a job, derived from the customer's consumer type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Paid,
    Rws,
    Unpaid,
}

/// Certification requirement as stored on a job.
///
/// Wire names follow the legacy field values: `yes` means any
/// certified translator, `both` additionally admits layman levels on
/// presentation while matching like `yes`, and the `n_*` variants are
/// the normal-plus-specialisation combinations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertifiedField {
    Normal,
    Yes,
    Both,
    Law,
    #[serde(rename = "n_law")]
    NormalLaw,
    Health,
    #[serde(rename = "n_health")]
    NormalHealth,
}

/// Required translator gender, when the customer expressed one
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

/// One interpretation booking request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,

    /// Owning customer
    pub customer_id: Uuid,

    /// Language code the interpretation is for
    pub language: String,

    /// Immediate (emergency) booking vs. scheduled
    pub immediate: bool,

    pub due: DateTime<Utc>,

    /// Planned duration in minutes
    pub duration: i64,

    /// Advisory expiry instant consumed by an external timer process.
    /// Always derived through [`will_expire_at`], never set directly.
    pub will_expire_at: DateTime<Utc>,

    pub certified: Option<CertifiedField>,
    pub gender: Option<Gender>,
    pub job_type: JobType,

    /// Customer accepts interpretation over the phone
    pub phone_delivery: bool,

    /// Customer requires physical presence
    pub physical_delivery: bool,

    /// Town the session takes place in, when physical
    pub town: Option<String>,

    pub status: JobStatus,

    pub created_at: DateTime<Utc>,
    pub withdraw_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,

    /// Elapsed session time, `H:MM:SS`
    pub session_time: Option<String>,

    pub admin_comments: Option<String>,
    pub reference: Option<String>,

    /// Overrides the customer's account email for job mail
    pub customer_email: Option<String>,

    pub flagged: bool,
    pub ignore_expiring: bool,
    pub ignore_expired: bool,
    pub ignore_throttle: bool,

    /// Reminder mails already sent; cleared when a job is reopened
    pub reminder_emails_sent: u32,
}

impl Job {
    /// True when the customer accepts phone delivery and does not
    /// require physical presence: the town check does not apply.
    pub fn is_phone_only(&self) -> bool {
        self.phone_delivery && !self.physical_delivery
    }
}

/// Derive the advisory expiry instant from the due date and a
/// creation or reopen reference time.
///
/// Tiers: a booking due within 90 minutes expires at its due time;
/// within 24 hours, 90 minutes after `from`; within 72 hours, 16
/// hours after `from`; anything further out expires 48 hours before
/// it is due.
pub fn will_expire_at(due: DateTime<Utc>, from: DateTime<Utc>) -> DateTime<Utc> {
    let diff = due - from;

    if diff <= Duration::minutes(90) {
        due
    } else if diff <= Duration::hours(24) {
        from + Duration::minutes(90)
    } else if diff <= Duration::hours(72) {
        from + Duration::hours(16)
    } else {
        due - Duration::hours(48)
    }
}
