//! Lifecycle state machine: accept, cancel, update, end, reopen
//!
//! All job and assignment mutation funnels through here (or through
//! intake). Claim races are settled by the store's atomic conditional
//! update; a lost race is a structured outcome, not an error. Status
//! guards that fail leave the job unchanged and still return success,
//! which keeps repeated update calls idempotent.
//!
//! Transitions are committed before any notification is dispatched,
//! so a transport failure can never roll back a status change.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tolkbridge_common::config::AppConfig;
use tolkbridge_common::errors::{BookingError, Result};
use tolkbridge_common::events::{DomainEvent, EventBus};
use tolkbridge_common::models::{will_expire_at, Assignment, Job, JobStatus, User};
use tolkbridge_common::store::JobStore;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::matching::MatchingEngine;
use crate::notify::Dispatcher;

// ============================================================================
// Outcomes and Requests
// ============================================================================

/// Result of a translator trying to claim a pending job
#[derive(Clone, Debug)]
pub enum AcceptOutcome {
    Accepted { job: Job },

    /// Another translator won the claim race
    AlreadyTaken { message: String },

    /// The translator holds an overlapping booking
    AlreadyBooked { message: String },
}

/// Result of a cancellation request
#[derive(Clone, Debug)]
pub enum CancelOutcome {
    /// Customer withdrawal; the status records how late it was
    Withdrawn { status: JobStatus },

    /// Translator cancelled in time and the job is open again
    ReturnedToPending,

    /// Translator cancelled inside the cutoff window
    TooLate { message: String },
}

/// Typed update request produced at the boundary; absent fields mean
/// "leave unchanged"
#[derive(Clone, Debug, Default)]
pub struct UpdateJobRequest {
    pub status: Option<JobStatus>,
    pub due: Option<DateTime<Utc>>,
    pub language: Option<String>,
    pub translator_id: Option<Uuid>,
    pub translator_email: Option<String>,
    pub admin_comments: Option<String>,
    pub reference: Option<String>,
    pub session_time: Option<String>,
}

/// One recorded sub-change of an update call
enum ChangeEntry {
    Translator {
        old_email: Option<String>,
        new_email: String,
    },
    Date {
        old: DateTime<Utc>,
        new: DateTime<Utc>,
    },
    Language {
        old: String,
        new: String,
    },
    Status {
        old: JobStatus,
        new: JobStatus,
    },
}

impl ChangeEntry {
    fn describe(&self) -> String {
        match self {
            ChangeEntry::Translator {
                old_email,
                new_email,
            } => format!(
                "translator: {} -> {new_email}",
                old_email.as_deref().unwrap_or("none")
            ),
            ChangeEntry::Date { old, new } => format!("due: {old} -> {new}"),
            ChangeEntry::Language { old, new } => format!("language: {old} -> {new}"),
            ChangeEntry::Status { old, new } => format!(
                "status: {} -> {}",
                String::from(*old),
                String::from(*new)
            ),
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// The booking-affecting operations over jobs and assignments
#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn JobStore>,
    dispatcher: Dispatcher,
    matching: MatchingEngine,
    events: Arc<dyn EventBus>,
    config: AppConfig,
}

impl Lifecycle {
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: Dispatcher,
        matching: MatchingEngine,
        events: Arc<dyn EventBus>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            matching,
            events,
            config,
        }
    }

    // ========================================================================
    // Accept
    // ========================================================================

    /// Claim a pending job for a translator.
    ///
    /// "First claim wins" is settled by the store; the loser gets an
    /// [`AcceptOutcome::AlreadyTaken`], never a second assignment.
    #[instrument(skip(self, translator), fields(%job_id, translator_id = %translator.id))]
    pub async fn accept_job(&self, job_id: Uuid, translator: &User) -> Result<AcceptOutcome> {
        if !translator.is_translator() {
            return Err(BookingError::Permission {
                message: "Only translators can accept bookings".to_string(),
            });
        }

        let job = self.find_job(job_id).await?;

        if self
            .store
            .has_overlapping_assignment(translator.id, job.due, job.duration)
            .await?
        {
            return Ok(AcceptOutcome::AlreadyBooked {
                message: "You already have a booking at this time. The booking was not accepted."
                    .to_string(),
            });
        }

        let now = Utc::now();
        match self.store.claim_pending(job_id, translator.id, now).await? {
            Some(_assignment) => {
                let job = self.find_job(job_id).await?;
                let customer = self.customer_of(&job).await?;
                self.dispatcher.send_job_accepted_email(&job, &customer).await;
                Ok(AcceptOutcome::Accepted { job })
            }
            None => Ok(AcceptOutcome::AlreadyTaken {
                message: "This booking has already been accepted by another interpreter."
                    .to_string(),
            }),
        }
    }

    /// Accept by bare job id; additionally pushes an acceptance
    /// notification to the customer
    #[instrument(skip(self, translator), fields(%job_id, translator_id = %translator.id))]
    pub async fn accept_job_by_id(&self, job_id: Uuid, translator: &User) -> Result<AcceptOutcome> {
        let outcome = self.accept_job(job_id, translator).await?;

        if let AcceptOutcome::Accepted { job } = &outcome {
            let customer = self.customer_of(job).await?;
            self.dispatcher.send_accepted_notification(job, &customer).await;
        }

        Ok(outcome)
    }

    // ========================================================================
    // Cancel
    // ========================================================================

    /// Cancel a job on behalf of its customer or its translator.
    ///
    /// A customer withdrawal is always honoured; the status records
    /// whether it came more or less than the cutoff before due. A
    /// translator may only cancel outside the cutoff, in which case
    /// the job goes back to `pending` and a new search starts.
    #[instrument(skip(self, actor), fields(%job_id, actor_id = %actor.id))]
    pub async fn cancel_job(&self, job_id: Uuid, actor: &User) -> Result<CancelOutcome> {
        let mut job = self.find_job(job_id).await?;
        let now = Utc::now();
        let cutoff = Duration::hours(self.config.booking.cancel_cutoff_hours);

        if actor.is_customer() {
            job.withdraw_at = Some(now);
            job.status = if job.due - now >= cutoff {
                JobStatus::WithdrawBefore24
            } else {
                JobStatus::WithdrawAfter24
            };
            self.store.save_job(&job).await?;

            self.events
                .publish(DomainEvent::JobCanceled { job_id: job.id })
                .await;

            if let Some(assignment) = self.store.active_assignment(job.id).await? {
                if let Some(translator) = self.store.find_user(assignment.translator_id).await? {
                    self.dispatcher
                        .send_cancelled_notification_to_translator(&job, &translator)
                        .await;
                }
            }

            return Ok(CancelOutcome::Withdrawn { status: job.status });
        }

        // Translator cancellation
        if job.due - now > cutoff {
            let customer = self.customer_of(&job).await?;
            self.dispatcher
                .send_cancelled_notification_to_customer(&job, &customer)
                .await;

            job.status = JobStatus::Pending;
            job.created_at = now;
            job.will_expire_at = will_expire_at(job.due, now);
            self.store.save_job(&job).await?;
            self.store.cancel_active_assignments(job.id, now).await?;

            self.dispatcher.notify_suitable_translators(&job, None).await?;

            Ok(CancelOutcome::ReturnedToPending)
        } else {
            Ok(CancelOutcome::TooLate {
                message: format!(
                    "A booking that starts within {} hours can not be cancelled through the app. Please call the office.",
                    self.config.booking.cancel_cutoff_hours
                ),
            })
        }
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Apply an administrative update to a job.
    ///
    /// Translator, due and language changes are applied first, then
    /// the status transition guard matching the job's current status.
    /// A failed guard leaves the status untouched and the call still
    /// succeeds. Comment and reference are persisted unconditionally,
    /// and one audit entry lists exactly the changes that occurred.
    #[instrument(skip(self, request), fields(%job_id))]
    pub async fn update_job(&self, job_id: Uuid, request: UpdateJobRequest) -> Result<Job> {
        let mut job = self.find_job(job_id).await?;
        let now = Utc::now();
        let mut changes: Vec<ChangeEntry> = Vec::new();

        // Current assignment: prefer the active one, fall back to a
        // completed one for read purposes
        let current = match self.store.active_assignment(job.id).await? {
            Some(assignment) => Some(assignment),
            None => self.store.completed_assignment(job.id).await?,
        };

        // Translator reassignment
        let mut new_translator: Option<User> = None;
        if let Some(requested) = self.resolve_translator(&request).await? {
            let differs = current
                .as_ref()
                .map(|a| a.translator_id != requested.id)
                .unwrap_or(true);
            if differs {
                let old_email = match &current {
                    Some(assignment) => self
                        .store
                        .find_user(assignment.translator_id)
                        .await?
                        .map(|user| user.email),
                    None => None,
                };

                if let Some(assignment) = &current {
                    if assignment.is_active() {
                        self.store.cancel_active_assignments(job.id, now).await?;
                    }
                }
                self.store
                    .create_assignment(Assignment::new(job.id, requested.id, now))
                    .await?;

                changes.push(ChangeEntry::Translator {
                    old_email,
                    new_email: requested.email.clone(),
                });
                new_translator = Some(requested);
            }
        }

        // Due-date change; the expiry is re-derived from creation
        let mut old_due = None;
        if let Some(due) = request.due {
            if due != job.due {
                changes.push(ChangeEntry::Date { old: job.due, new: due });
                old_due = Some(job.due);
                job.due = due;
                job.will_expire_at = will_expire_at(due, job.created_at);
            }
        }

        // Language change
        let mut old_lang = None;
        if let Some(language) = &request.language {
            if language != &job.language {
                changes.push(ChangeEntry::Language {
                    old: job.language.clone(),
                    new: language.clone(),
                });
                old_lang = Some(job.language.clone());
                job.language = language.clone();
            }
        }

        // Status transition, dispatched on the current status
        if let Some(target) = request.status {
            if target != job.status {
                let old_status = job.status;
                let applied = self
                    .apply_transition(&mut job, target, &request, new_translator.as_ref(), now)
                    .await?;
                if applied {
                    changes.push(ChangeEntry::Status {
                        old: old_status,
                        new: target,
                    });
                }
            }
        }

        // Comment and reference are persisted regardless of guards
        if let Some(comments) = &request.admin_comments {
            job.admin_comments = Some(comments.clone());
        }
        if let Some(reference) = &request.reference {
            job.reference = Some(reference.clone());
        }

        self.store.save_job(&job).await?;

        // Post-save notifications only make sense for future bookings
        if job.due > now {
            let customer = self.customer_of(&job).await?;
            let translator = match self.store.active_assignment(job.id).await? {
                Some(assignment) => self.store.find_user(assignment.translator_id).await?,
                None => None,
            };

            if let Some(old) = old_due {
                self.dispatcher
                    .send_changed_date_emails(&job, &customer, translator.as_ref(), old)
                    .await;
            }
            if let Some(new_translator) = &new_translator {
                let old_user = match changes.iter().find_map(|c| match c {
                    ChangeEntry::Translator { old_email, .. } => old_email.clone(),
                    _ => None,
                }) {
                    Some(email) => self.store.find_user_by_email(&email).await?,
                    None => None,
                };
                self.dispatcher
                    .send_changed_translator_emails(
                        &job,
                        &customer,
                        old_user.as_ref(),
                        new_translator,
                    )
                    .await;
            }
            if let Some(old) = &old_lang {
                self.dispatcher
                    .send_changed_lang_emails(&job, &customer, translator.as_ref(), old)
                    .await;
            }
        }

        let described: Vec<String> = changes.iter().map(ChangeEntry::describe).collect();
        info!(%job_id, changes = ?described, "Job updated");

        Ok(job)
    }

    /// Guard and effect for one requested transition, matched on the
    /// job's current status. Returns whether the status was applied.
    async fn apply_transition(
        &self,
        job: &mut Job,
        target: JobStatus,
        request: &UpdateJobRequest,
        new_translator: Option<&User>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let has_comment = request
            .admin_comments
            .as_ref()
            .map(|c| !c.is_empty())
            .unwrap_or(false);

        match job.status {
            JobStatus::TimedOut => {
                job.status = target;
                if target == JobStatus::Pending {
                    job.created_at = now;
                    job.will_expire_at = will_expire_at(job.due, now);
                    job.reminder_emails_sent = 0;
                    self.store.save_job(job).await?;

                    let customer = self.customer_of(job).await?;
                    self.dispatcher.send_reopen_status_email(job, &customer).await;
                    self.dispatcher.notify_suitable_translators(job, None).await?;
                    Ok(true)
                } else if new_translator.is_some() {
                    self.store.save_job(job).await?;
                    let customer = self.customer_of(job).await?;
                    self.dispatcher.send_job_accepted_email(job, &customer).await;
                    Ok(true)
                } else {
                    job.status = JobStatus::TimedOut;
                    Ok(false)
                }
            }

            JobStatus::Completed => {
                if target == JobStatus::TimedOut && !has_comment {
                    return Ok(false);
                }
                job.status = target;
                Ok(true)
            }

            JobStatus::Started => {
                if !has_comment {
                    return Ok(false);
                }
                if target == JobStatus::Completed {
                    let Some(session_time) = request
                        .session_time
                        .as_ref()
                        .filter(|time| !time.is_empty())
                    else {
                        return Ok(false);
                    };

                    job.status = target;
                    job.end_at = Some(now);
                    job.session_time = Some(session_time.clone());
                    self.store.save_job(job).await?;

                    let customer = self.customer_of(job).await?;
                    let translator = match self.store.active_assignment(job.id).await? {
                        Some(assignment) => self.store.find_user(assignment.translator_id).await?,
                        None => None,
                    };
                    if let Some(translator) = translator {
                        let display = session_display(session_time);
                        self.dispatcher
                            .send_session_ended_emails(job, &customer, &translator, &display)
                            .await;
                    }
                    Ok(true)
                } else {
                    job.status = target;
                    Ok(true)
                }
            }

            JobStatus::Pending => {
                if target == JobStatus::TimedOut && !has_comment {
                    return Ok(false);
                }
                job.status = target;
                self.store.save_job(job).await?;

                let customer = self.customer_of(job).await?;
                if target == JobStatus::Assigned && new_translator.is_some() {
                    self.dispatcher.send_job_accepted_email(job, &customer).await;
                    if let Some(translator) = new_translator {
                        self.dispatcher.send_session_start_remind(job, translator).await;
                    }
                    self.dispatcher.send_session_start_remind(job, &customer).await;
                } else {
                    self.dispatcher.send_status_cancelled_email(job, &customer).await;
                }
                Ok(true)
            }

            JobStatus::WithdrawAfter24 => {
                if target != JobStatus::TimedOut {
                    return Ok(false);
                }
                if !has_comment {
                    return Ok(false);
                }
                job.status = target;
                Ok(true)
            }

            JobStatus::Assigned => {
                let allowed = matches!(
                    target,
                    JobStatus::WithdrawBefore24 | JobStatus::WithdrawAfter24 | JobStatus::TimedOut
                );
                if !allowed {
                    return Ok(false);
                }
                if target == JobStatus::TimedOut && !has_comment {
                    return Ok(false);
                }

                job.status = target;
                if matches!(
                    target,
                    JobStatus::WithdrawBefore24 | JobStatus::WithdrawAfter24
                ) {
                    let customer = self.customer_of(job).await?;
                    let translator = match self.store.active_assignment(job.id).await? {
                        Some(assignment) => self.store.find_user(assignment.translator_id).await?,
                        None => None,
                    };
                    self.store.cancel_active_assignments(job.id, now).await?;
                    self.store.save_job(job).await?;

                    self.dispatcher.send_status_cancelled_email(job, &customer).await;
                    if let Some(translator) = translator {
                        self.dispatcher
                            .send_cancel_email_to_translator(job, &translator)
                            .await;
                    }
                }
                Ok(true)
            }

            // No transition leaves these through the update path
            JobStatus::WithdrawBefore24 | JobStatus::NotCarriedOutCustomer => Ok(false),
        }
    }

    // ========================================================================
    // Completion / No-Show
    // ========================================================================

    /// Close a started session.
    ///
    /// A job in any other status is a silent no-op. The elapsed time
    /// is measured from `due` to now; the party that did not make
    /// this call is carried on the session-ended event.
    #[instrument(skip(self), fields(%job_id, %initiator_id))]
    pub async fn end_job(&self, job_id: Uuid, initiator_id: Uuid) -> Result<()> {
        let mut job = self.find_job(job_id).await?;
        if job.status != JobStatus::Started {
            return Ok(());
        }

        let now = Utc::now();
        let session_time = elapsed_interval(job.due, now);

        job.status = JobStatus::Completed;
        job.end_at = Some(now);
        job.session_time = Some(session_time.clone());
        self.store.save_job(&job).await?;

        let customer = self.customer_of(&job).await?;
        let assignment = self.store.active_assignment(job.id).await?;

        if let Some(mut assignment) = assignment {
            if let Some(translator) = self.store.find_user(assignment.translator_id).await? {
                let display = session_display(&session_time);
                self.dispatcher
                    .send_session_ended_emails(&job, &customer, &translator, &display)
                    .await;
            }

            assignment.completed_at = Some(now);
            assignment.completed_by = Some(initiator_id);
            self.store.save_assignment(&assignment).await?;

            let notified_party = if initiator_id == assignment.translator_id {
                job.customer_id
            } else {
                assignment.translator_id
            };
            self.events
                .publish(DomainEvent::SessionEnded {
                    job_id: job.id,
                    notified_party,
                })
                .await;
        }

        Ok(())
    }

    /// Record a customer no-show: same elapsed-time bookkeeping as a
    /// normal end, attributed to the translator
    #[instrument(skip(self), fields(%job_id))]
    pub async fn customer_not_call(&self, job_id: Uuid) -> Result<()> {
        let mut job = self.find_job(job_id).await?;
        let now = Utc::now();

        job.status = JobStatus::NotCarriedOutCustomer;
        job.end_at = Some(now);
        job.session_time = Some(elapsed_interval(job.due, now));
        self.store.save_job(&job).await?;

        if let Some(mut assignment) = self.store.active_assignment(job.id).await? {
            assignment.completed_at = Some(now);
            assignment.completed_by = Some(assignment.translator_id);
            self.store.save_assignment(&assignment).await?;
        }

        Ok(())
    }

    // ========================================================================
    // Reopen
    // ========================================================================

    /// Reopen a cancelled or timed-out booking.
    ///
    /// A non-timedout job is reset to `pending` in place; a timedout
    /// one is cloned into a fresh pending job whose comment points
    /// back at the original. Either way any lingering assignment on
    /// the original is cancelled and a pre-cancelled marker row links
    /// the reopening translator to it. Returns the id of the job the
    /// new search runs for.
    #[instrument(skip(self), fields(%job_id, %translator_id))]
    pub async fn reopen(&self, job_id: Uuid, translator_id: Uuid) -> Result<Uuid> {
        let job = self.find_job(job_id).await?;
        let now = Utc::now();

        let reopened_id = if job.status != JobStatus::TimedOut {
            let mut job = job.clone();
            job.status = JobStatus::Pending;
            job.created_at = now;
            job.will_expire_at = will_expire_at(job.due, now);
            self.store.save_job(&job).await?;
            job.id
        } else {
            let mut clone = job.clone();
            clone.id = Uuid::new_v4();
            clone.status = JobStatus::Pending;
            clone.created_at = now;
            clone.will_expire_at = will_expire_at(clone.due, now);
            clone.admin_comments = Some(format!(
                "This booking is a reopening of booking #{}",
                job.id
            ));
            clone.reminder_emails_sent = 0;
            let created = self.store.create_job(clone).await?;
            created.id
        };

        self.store.cancel_active_assignments(job.id, now).await?;

        // Marker row: links the reopening translator to the original
        // job, already cancelled at creation
        let mut marker = Assignment::new(job.id, translator_id, now);
        marker.cancel_at = Some(now);
        self.store.create_assignment(marker).await?;

        self.dispatcher.notify_admin_cancelled(reopened_id).await?;

        Ok(reopened_id)
    }

    // ========================================================================
    // Flag Toggles
    // ========================================================================

    pub async fn ignore_expiring(&self, job_id: Uuid, flag: bool) -> Result<()> {
        let mut job = self.find_job(job_id).await?;
        job.ignore_expiring = flag;
        self.store.save_job(&job).await
    }

    pub async fn ignore_expired(&self, job_id: Uuid, flag: bool) -> Result<()> {
        let mut job = self.find_job(job_id).await?;
        job.ignore_expired = flag;
        self.store.save_job(&job).await
    }

    pub async fn ignore_throttle(&self, job_id: Uuid, flag: bool) -> Result<()> {
        let mut job = self.find_job(job_id).await?;
        job.ignore_throttle = flag;
        self.store.save_job(&job).await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Pending jobs the translator may take, due date ascending
    pub async fn eligible_jobs(&self, translator: &User) -> Result<Vec<Job>> {
        self.matching.find_eligible_jobs(translator).await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn find_job(&self, job_id: Uuid) -> Result<Job> {
        self.store
            .find_job(job_id)
            .await?
            .ok_or_else(|| BookingError::JobNotFound {
                id: job_id.to_string(),
            })
    }

    async fn customer_of(&self, job: &Job) -> Result<User> {
        self.store
            .find_user(job.customer_id)
            .await?
            .ok_or_else(|| BookingError::UserNotFound {
                id: job.customer_id.to_string(),
            })
    }

    /// Resolve a requested translator by id, falling back to email
    async fn resolve_translator(&self, request: &UpdateJobRequest) -> Result<Option<User>> {
        if let Some(id) = request.translator_id {
            return self
                .store
                .find_user(id)
                .await?
                .ok_or_else(|| BookingError::UserNotFound { id: id.to_string() })
                .map(Some);
        }

        if let Some(email) = &request.translator_email {
            return self
                .store
                .find_user_by_email(email)
                .await?
                .ok_or_else(|| BookingError::UserNotFound { id: email.clone() })
                .map(Some);
        }

        Ok(None)
    }
}

/// Elapsed time between two instants as `H:MM:SS`
fn elapsed_interval(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    let total = (to - from).num_seconds().max(0);
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Session length for mail bodies, from a `H:MM:SS` interval
fn session_display(interval: &str) -> String {
    let mut parts = interval.split(':');
    let hours = parts.next().unwrap_or("0");
    let minutes = parts.next().unwrap_or("0");
    format!("{hours} h {minutes} min")
}
