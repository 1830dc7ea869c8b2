//! In-memory store
//!
//! Backs every test and any host that has not wired a persistent
//! store yet. The conditional claim runs under a single write lock,
//! which gives it the same atomicity a SQL `UPDATE ... WHERE
//! status = 'pending'` provides in production.

use crate::errors::{BookingError, Result};
use crate::models::{Assignment, Job, JobStatus, Role, User};
use crate::store::JobStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    users: HashMap<Uuid, User>,
    assignments: HashMap<Uuid, Assignment>,
    blacklist: HashSet<(Uuid, Uuid)>,
}

/// Hash-map store behind a `tokio::sync::RwLock`
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn find_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.inner.read().await.jobs.get(&id).cloned())
    }

    async fn create_job(&self, job: Job) -> Result<Job> {
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(BookingError::store(format!(
                "Job {} already exists",
                job.id
            )));
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn save_job(&self, job: &Job) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&job.id) {
            return Err(BookingError::store(format!("Job {} does not exist", job.id)));
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn pending_jobs(&self) -> Result<Vec<Job>> {
        Ok(self
            .inner
            .read()
            .await
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .cloned()
            .collect())
    }

    async fn claim_pending(
        &self,
        job_id: Uuid,
        translator_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Assignment>> {
        let mut inner = self.inner.write().await;

        let claimable = match inner.jobs.get(&job_id) {
            Some(job) => {
                job.status == JobStatus::Pending
                    && !inner
                        .assignments
                        .values()
                        .any(|a| a.job_id == job_id && a.is_active())
            }
            None => return Err(BookingError::JobNotFound {
                id: job_id.to_string(),
            }),
        };

        if !claimable {
            return Ok(None);
        }

        let assignment = Assignment::new(job_id, translator_id, now);
        inner.assignments.insert(assignment.id, assignment.clone());
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.status = JobStatus::Assigned;
        }

        Ok(Some(assignment))
    }

    async fn active_assignment(&self, job_id: Uuid) -> Result<Option<Assignment>> {
        Ok(self
            .inner
            .read()
            .await
            .assignments
            .values()
            .find(|a| a.job_id == job_id && a.is_active())
            .cloned())
    }

    async fn completed_assignment(&self, job_id: Uuid) -> Result<Option<Assignment>> {
        Ok(self
            .inner
            .read()
            .await
            .assignments
            .values()
            .find(|a| a.job_id == job_id && a.completed_at.is_some())
            .cloned())
    }

    async fn create_assignment(&self, assignment: Assignment) -> Result<Assignment> {
        let mut inner = self.inner.write().await;
        inner.assignments.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    async fn save_assignment(&self, assignment: &Assignment) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.assignments.contains_key(&assignment.id) {
            return Err(BookingError::store(format!(
                "Assignment {} does not exist",
                assignment.id
            )));
        }
        inner.assignments.insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn cancel_active_assignments(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let mut cancelled = 0;
        for assignment in inner.assignments.values_mut() {
            if assignment.job_id == job_id && assignment.is_active() {
                assignment.cancel_at = Some(at);
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn assignments_for_job(&self, job_id: Uuid) -> Result<Vec<Assignment>> {
        Ok(self
            .inner
            .read()
            .await
            .assignments
            .values()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn has_overlapping_assignment(
        &self,
        translator_id: Uuid,
        due: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<bool> {
        let inner = self.inner.read().await;
        let new_end = due + Duration::minutes(duration_minutes);

        Ok(inner
            .assignments
            .values()
            .filter(|a| a.translator_id == translator_id && a.is_active())
            .filter_map(|a| inner.jobs.get(&a.job_id))
            .any(|job| {
                let end = job.due + Duration::minutes(job.duration);
                job.due < new_end && due < end
            }))
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn create_user(&self, user: User) -> Result<User> {
        let mut inner = self.inner.write().await;
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn active_translators(&self, exclude: Option<Uuid>) -> Result<Vec<User>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .filter(|u| u.role == Role::Translator && u.active && Some(u.id) != exclude)
            .cloned()
            .collect())
    }

    async fn is_blacklisted(&self, customer_id: Uuid, translator_id: Uuid) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .await
            .blacklist
            .contains(&(customer_id, translator_id)))
    }

    async fn add_to_blacklist(&self, customer_id: Uuid, translator_id: Uuid) -> Result<()> {
        self.inner
            .write()
            .await
            .blacklist
            .insert((customer_id, translator_id));
        Ok(())
    }
}
