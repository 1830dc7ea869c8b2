//! Store seam for jobs, users and translator assignments
//!
//! The booking core never talks to a database directly: it goes
//! through [`JobStore`], which a host process backs with its own
//! persistence. The trait carries the one primitive the core's
//! concurrency model depends on, an atomic conditional claim of a
//! pending job, so "first translator wins" is enforced at the store
//! layer, not with in-process locks around business logic.

mod memory;

pub use memory::MemoryStore;

use crate::errors::Result;
use crate::models::{Assignment, Job, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait JobStore: Send + Sync {
    // ========================================================================
    // Job Operations
    // ========================================================================

    async fn find_job(&self, id: Uuid) -> Result<Option<Job>>;

    async fn create_job(&self, job: Job) -> Result<Job>;

    /// Persist every field of an existing job
    async fn save_job(&self, job: &Job) -> Result<()>;

    /// All jobs currently in `pending` status
    async fn pending_jobs(&self) -> Result<Vec<Job>>;

    /// Atomic conditional claim of a pending job.
    ///
    /// Succeeds only when the job is still `pending` and has no
    /// active assignment; on success the job is moved to `assigned`
    /// and the new active assignment is returned in the same store
    /// operation. `None` means the job was no longer available:
    /// callers treat that as "already taken", not as a fault.
    async fn claim_pending(
        &self,
        job_id: Uuid,
        translator_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Assignment>>;

    // ========================================================================
    // Assignment Operations
    // ========================================================================

    /// The current assignment: the single row with neither
    /// `cancel_at` nor `completed_at` set
    async fn active_assignment(&self, job_id: Uuid) -> Result<Option<Assignment>>;

    /// A completed assignment, used for read purposes when no active
    /// one exists
    async fn completed_assignment(&self, job_id: Uuid) -> Result<Option<Assignment>>;

    async fn create_assignment(&self, assignment: Assignment) -> Result<Assignment>;

    async fn save_assignment(&self, assignment: &Assignment) -> Result<()>;

    /// Stamp `cancel_at` on every active assignment of a job,
    /// returning how many rows were closed
    async fn cancel_active_assignments(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<usize>;

    async fn assignments_for_job(&self, job_id: Uuid) -> Result<Vec<Assignment>>;

    /// True when the translator holds an active assignment on another
    /// job whose session interval overlaps `[due, due + duration)`
    async fn has_overlapping_assignment(
        &self,
        translator_id: Uuid,
        due: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<bool>;

    // ========================================================================
    // User Operations
    // ========================================================================

    async fn find_user(&self, id: Uuid) -> Result<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn create_user(&self, user: User) -> Result<User>;

    /// All active translator accounts, optionally excluding one id
    async fn active_translators(&self, exclude: Option<Uuid>) -> Result<Vec<User>>;

    // ========================================================================
    // Blacklist Operations
    // ========================================================================

    /// Whether the customer has barred this translator
    async fn is_blacklisted(&self, customer_id: Uuid, translator_id: Uuid) -> Result<bool>;

    async fn add_to_blacklist(&self, customer_id: Uuid, translator_id: Uuid) -> Result<()>;
}
