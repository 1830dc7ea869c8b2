//! Translator assignment: time-bounded link between one translator
//! and one job.
//!
//! Invariant: for a given job, at most one row has both `cancel_at`
//! and `completed_at` null, and that row is the current assignment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub job_id: Uuid,
    pub translator_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// User who closed the assignment
    pub completed_by: Option<Uuid>,
}

impl Assignment {
    pub fn new(job_id: Uuid, translator_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            translator_id,
            created_at: now,
            cancel_at: None,
            completed_at: None,
            completed_by: None,
        }
    }

    /// Not cancelled and not completed
    pub fn is_active(&self) -> bool {
        self.cancel_at.is_none() && self.completed_at.is_none()
    }
}
