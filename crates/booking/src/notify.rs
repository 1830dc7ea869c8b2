//! Notification dispatcher: push, SMS, and email fan-out
//!
//! Every send here is best-effort relative to the state transition
//! that triggered it: transport failures are logged and counted,
//! never propagated. The one exception is SMS fan-out, which reports
//! its success count to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde_json::{json, Value};
use tolkbridge_common::config::{AppConfig, NotifyConfig};
use tolkbridge_common::errors::{BookingError, Result};
use tolkbridge_common::mail::{MailData, MailTemplate, Mailer};
use tolkbridge_common::models::{Job, User};
use tolkbridge_common::push::{NotificationType, PushGateway, PushPayload};
use tolkbridge_common::sms::SmsGateway;
use tolkbridge_common::store::JobStore;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::matching::MatchingEngine;

// ============================================================================
// Time Helpers
// ============================================================================

/// Whether `now` falls inside the configured night window.
///
/// The window is allowed to wrap midnight (22 to 6 does).
pub fn is_night_time(now: DateTime<Utc>, config: &NotifyConfig) -> bool {
    use chrono::Timelike;

    let hour = now.hour();
    if config.night_start_hour > config.night_end_hour {
        hour >= config.night_start_hour || hour < config.night_end_hour
    } else {
        hour >= config.night_start_hour && hour < config.night_end_hour
    }
}

/// The next instant at which night-delayed pushes are released:
/// today's business-start hour if still ahead, otherwise tomorrow's
pub fn next_business_release(now: DateTime<Utc>, config: &NotifyConfig) -> DateTime<Utc> {
    let hour = config.business_start_hour.min(23);
    let today = match now.date_naive().and_hms_opt(hour, 0, 0) {
        Some(naive) => naive.and_utc(),
        None => now,
    };

    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// True when the translator opted in to night delay and it is night
pub fn is_need_to_delay(translator: &User, now: DateTime<Utc>, config: &NotifyConfig) -> bool {
    let delay_opted = translator
        .translator
        .as_ref()
        .map(|profile| profile.prefs.delay_at_night)
        .unwrap_or(false);

    delay_opted && is_night_time(now, config)
}

/// Human-readable session length from a duration in minutes
pub fn convert_to_hours_mins(minutes: i64) -> String {
    if minutes < 60 {
        format!("{minutes}min")
    } else if minutes == 60 {
        "1h".to_string()
    } else {
        format!("{:02}h {:02}min", minutes / 60, minutes % 60)
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Outbound fan-out for booking events
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    matching: MatchingEngine,
    push: Arc<dyn PushGateway>,
    sms: Arc<dyn SmsGateway>,
    mailer: Arc<dyn Mailer>,
    config: AppConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        matching: MatchingEngine,
        push: Arc<dyn PushGateway>,
        sms: Arc<dyn SmsGateway>,
        mailer: Arc<dyn Mailer>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            matching,
            push,
            sms,
            mailer,
            config,
        }
    }

    // ========================================================================
    // Push Fan-Out
    // ========================================================================

    /// Notify every eligible translator about an open job.
    ///
    /// Opted-out translators are dropped first, then eligibility is
    /// checked, then the survivors split into an immediate-send and a
    /// night-delayed group. One payload is built per group; the
    /// delayed one carries a `send_after` at the next business-hours
    /// release.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn notify_suitable_translators(
        &self,
        job: &Job,
        exclude: Option<Uuid>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut send_now: Vec<String> = Vec::new();
        let mut send_delayed: Vec<String> = Vec::new();

        for translator in self.store.active_translators(exclude).await? {
            let prefs = match &translator.translator {
                Some(profile) => &profile.prefs,
                None => continue,
            };
            if prefs.opt_out_all {
                continue;
            }
            if job.immediate && prefs.opt_out_emergency {
                continue;
            }
            if !self.matching.is_eligible(&translator, job).await? {
                continue;
            }

            if is_need_to_delay(&translator, now, &self.config.notify) {
                send_delayed.push(translator.email.clone());
            } else {
                send_now.push(translator.email.clone());
            }
        }

        let message = if job.immediate {
            format!(
                "New emergency booking for a {} interpreter, {}min",
                job.language, job.duration
            )
        } else {
            format!(
                "New booking for a {} interpreter, {}min, {}",
                job.language,
                job.duration,
                job.due.format("%Y-%m-%d %H:%M")
            )
        };

        if !send_now.is_empty() {
            let payload = self
                .suitable_job_payload(job, &message, &send_now)
                .with_data("immediate", Value::Bool(job.immediate));
            self.dispatch_push(job.id, NotificationType::SuitableJob, &send_now, payload)
                .await;
        }

        if !send_delayed.is_empty() {
            let release = next_business_release(now, &self.config.notify);
            let payload = self
                .suitable_job_payload(job, &message, &send_delayed)
                .with_data("immediate", Value::Bool(job.immediate))
                .with_send_after(release);
            self.dispatch_push(
                job.id,
                NotificationType::SuitableJob,
                &send_delayed,
                payload,
            )
            .await;
        }

        Ok(())
    }

    /// Re-broadcast a job to suitable translators after an
    /// administrative cancellation or reopen
    #[instrument(skip(self), fields(%job_id))]
    pub async fn notify_admin_cancelled(&self, job_id: Uuid) -> Result<()> {
        let job = self
            .store
            .find_job(job_id)
            .await?
            .ok_or_else(|| BookingError::JobNotFound {
                id: job_id.to_string(),
            })?;
        self.notify_suitable_translators(&job, None).await
    }

    /// Push to the customer after a translator accepted their booking
    pub async fn send_accepted_notification(&self, job: &Job, customer: &User) {
        let message = format!(
            "Your booking for a {} interpreter, {}, has been accepted by an interpreter. Details are in your inbox.",
            job.language,
            job.due.format("%Y-%m-%d %H:%M")
        );
        let recipients = [self.customer_email(job, customer)];
        let payload = PushPayload::new(
            &self.config.notify.push_title,
            NotificationType::JobAccepted,
            job.immediate,
            &message,
            &recipients,
        )
        .with_data("job_id", json!(job.id));

        self.dispatch_push(job.id, NotificationType::JobAccepted, &recipients, payload)
            .await;
    }

    /// Push to the active translator after the customer cancelled
    pub async fn send_cancelled_notification_to_translator(&self, job: &Job, translator: &User) {
        let message = format!(
            "The customer has cancelled the booking for a {} interpreter, {}. Be aware of this.",
            job.language,
            job.due.format("%Y-%m-%d %H:%M")
        );
        let recipients = [translator.email.clone()];
        let payload = PushPayload::new(
            &self.config.notify.push_title,
            NotificationType::JobCancelled,
            job.immediate,
            &message,
            &recipients,
        )
        .with_data("job_id", json!(job.id));

        self.dispatch_push(job.id, NotificationType::JobCancelled, &recipients, payload)
            .await;
    }

    /// Push to the customer after their translator cancelled in time
    /// for a new search
    pub async fn send_cancelled_notification_to_customer(&self, job: &Job, customer: &User) {
        let message = format!(
            "Your interpreter for {}, {}, has cancelled. We are looking for a new interpreter. If none accepts, you will be contacted before the booking starts.",
            job.language,
            job.due.format("%Y-%m-%d %H:%M")
        );
        let recipients = [self.customer_email(job, customer)];
        let payload = PushPayload::new(
            &self.config.notify.push_title,
            NotificationType::JobCancelled,
            job.immediate,
            &message,
            &recipients,
        )
        .with_data("job_id", json!(job.id));

        self.dispatch_push(job.id, NotificationType::JobCancelled, &recipients, payload)
            .await;
    }

    /// Session start reminder, worded by delivery kind
    pub async fn send_session_start_remind(&self, job: &Job, user: &User) {
        let when = job.due.format("%Y-%m-%d %H:%M");
        let message = if job.physical_delivery {
            let town = job.town.as_deref().unwrap_or("the agreed town");
            format!(
                "Reminder: you have a {} interpretation (on site, in {}) at {} lasting {}min. Remember to give feedback afterwards.",
                job.language, town, when, job.duration
            )
        } else {
            format!(
                "Reminder: you have a {} interpretation (by phone) at {} lasting {}min. Remember to give feedback afterwards.",
                job.language, when, job.duration
            )
        };
        let recipients = [user.email.clone()];
        let payload = PushPayload::new(
            &self.config.notify.push_title,
            NotificationType::SessionStartRemind,
            job.immediate,
            &message,
            &recipients,
        )
        .with_data("job_id", json!(job.id));

        self.dispatch_push(
            job.id,
            NotificationType::SessionStartRemind,
            &recipients,
            payload,
        )
        .await;
    }

    /// Push to the customer when a booking expired without a claim
    pub async fn send_expired_notification(&self, job: &Job, customer: &User) {
        let message = format!(
            "Your booking for a {} interpreter, {}, could not be filled. Please book again.",
            job.language,
            job.due.format("%Y-%m-%d %H:%M")
        );
        let recipients = [self.customer_email(job, customer)];
        let payload = PushPayload::new(
            &self.config.notify.push_title,
            NotificationType::JobExpired,
            job.immediate,
            &message,
            &recipients,
        )
        .with_data("job_id", json!(job.id));

        self.dispatch_push(job.id, NotificationType::JobExpired, &recipients, payload)
            .await;
    }

    async fn dispatch_push(
        &self,
        job_id: Uuid,
        notification_type: NotificationType,
        recipients: &[String],
        payload: PushPayload,
    ) {
        info!(
            %job_id,
            notification_type = notification_type.as_str(),
            recipients = ?recipients,
            payload = ?payload,
            "Dispatching push"
        );

        match self.push.send(&payload).await {
            Ok(()) => {
                counter!("tolkbridge_push_sent_total").increment(1);
            }
            Err(e) => {
                counter!("tolkbridge_push_failed_total").increment(1);
                error!(%job_id, error = %e, "Push dispatch failed");
            }
        }
    }

    fn suitable_job_payload(&self, job: &Job, message: &str, emails: &[String]) -> PushPayload {
        PushPayload::new(
            &self.config.notify.push_title,
            NotificationType::SuitableJob,
            job.immediate,
            message,
            emails,
        )
        .with_data("job_id", json!(job.id))
    }

    // ========================================================================
    // SMS Fan-Out
    // ========================================================================

    /// Text every eligible translator about an open job.
    ///
    /// Returns the number of messages the provider accepted; a
    /// rejected message is logged and counted, not raised.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn send_sms_to_eligible_translators(&self, job: &Job) -> Result<usize> {
        let date = job.due.format("%d.%m.%Y").to_string();
        let time = job.due.format("%H:%M").to_string();
        let duration = convert_to_hours_mins(job.duration);

        // Any job with physical delivery gets the on-site wording,
        // even when phone delivery is also offered.
        let body = if job.physical_delivery {
            let town = job.town.as_deref().unwrap_or("the agreed town");
            format!(
                "You have a new interpretation booking on site in {town} on {date} at {time}, duration {duration}. Job id {}. Open the app to accept.",
                job.id
            )
        } else {
            format!(
                "You have a new phone interpretation booking on {date} at {time}, duration {duration}. Job id {}. Open the app to accept.",
                job.id
            )
        };

        let mut sent = 0;
        for translator in self.matching.find_eligible_translators(job).await? {
            let mobile = translator
                .translator
                .as_ref()
                .and_then(|profile| profile.mobile.clone());
            let Some(to) = mobile else {
                continue;
            };

            info!(job_id = %job.id, translator_id = %translator.id, "Dispatching SMS");
            match self.sms.send(&self.config.sms.from_number, &to, &body).await {
                Ok(status) if status.accepted => {
                    counter!("tolkbridge_sms_sent_total").increment(1);
                    sent += 1;
                }
                Ok(_) => {
                    counter!("tolkbridge_sms_failed_total").increment(1);
                    error!(job_id = %job.id, translator_id = %translator.id, "SMS rejected by provider");
                }
                Err(e) => {
                    counter!("tolkbridge_sms_failed_total").increment(1);
                    error!(job_id = %job.id, translator_id = %translator.id, error = %e, "SMS dispatch failed");
                }
            }
        }

        Ok(sent)
    }

    // ========================================================================
    // Email Fan-Out
    // ========================================================================

    /// Booking confirmation to the customer
    pub async fn send_job_created_email(&self, job: &Job, customer: &User) {
        let subject = format!("We have received your interpretation booking (booking # {})", job.id);
        let data = self.job_mail_data(job);
        self.dispatch_mail(
            &self.customer_email(job, customer),
            &customer.name,
            &subject,
            MailTemplate::JobCreated,
            data,
        )
        .await;
    }

    /// Acceptance confirmation to the customer
    pub async fn send_job_accepted_email(&self, job: &Job, customer: &User) {
        let subject = format!(
            "Confirmation - an interpreter has accepted your booking (booking # {})",
            job.id
        );
        let data = self.job_mail_data(job);
        self.dispatch_mail(
            &self.customer_email(job, customer),
            &customer.name,
            &subject,
            MailTemplate::JobAccepted,
            data,
        )
        .await;
    }

    /// Status-change notice to the customer on a reopened booking
    pub async fn send_reopen_status_email(&self, job: &Job, customer: &User) {
        let subject = format!("Notice about a change to interpretation booking # {}", job.id);
        let data = self.job_mail_data(job);
        self.dispatch_mail(
            &self.customer_email(job, customer),
            &customer.name,
            &subject,
            MailTemplate::JobChangeStatusToCustomer,
            data,
        )
        .await;
    }

    /// Cancellation notice to the customer when a booking leaves the
    /// pending/assigned path
    pub async fn send_status_cancelled_email(&self, job: &Job, customer: &User) {
        let subject = format!("Cancellation of booking # {}", job.id);
        let data = self.job_mail_data(job);
        self.dispatch_mail(
            &self.customer_email(job, customer),
            &customer.name,
            &subject,
            MailTemplate::StatusChangedFromPendingOrAssignedCustomer,
            data,
        )
        .await;
    }

    /// Cancellation notice to the translator who held the booking
    pub async fn send_cancel_email_to_translator(&self, job: &Job, translator: &User) {
        let subject = format!("Information about a cancelled interpretation, booking # {}", job.id);
        let data = self.job_mail_data(job);
        self.dispatch_mail(
            &translator.email,
            &translator.name,
            &subject,
            MailTemplate::JobCancelTranslator,
            data,
        )
        .await;
    }

    /// Session-ended mails: invoice wording to the customer, salary
    /// wording to the translator
    pub async fn send_session_ended_emails(
        &self,
        job: &Job,
        customer: &User,
        translator: &User,
        session_time: &str,
    ) {
        let subject = format!(
            "Information about a finished interpretation, booking # {}",
            job.id
        );

        let mut data = self.job_mail_data(job);
        data.insert("session_time".to_string(), json!(session_time));

        let mut customer_data = data.clone();
        customer_data.insert("for_text".to_string(), json!("invoice"));
        self.dispatch_mail(
            &self.customer_email(job, customer),
            &customer.name,
            &subject,
            MailTemplate::SessionEnded,
            customer_data,
        )
        .await;

        let mut translator_data = data;
        translator_data.insert("for_text".to_string(), json!("salary"));
        self.dispatch_mail(
            &translator.email,
            &translator.name,
            &subject,
            MailTemplate::SessionEnded,
            translator_data,
        )
        .await;
    }

    /// Reassignment mails: one to the customer, one to the outgoing
    /// translator when there is one, one to the incoming translator
    pub async fn send_changed_translator_emails(
        &self,
        job: &Job,
        customer: &User,
        old_translator: Option<&User>,
        new_translator: &User,
    ) {
        let subject = format!(
            "Notice about the assignment of an interpreter for booking # {}",
            job.id
        );
        let data = self.job_mail_data(job);

        self.dispatch_mail(
            &self.customer_email(job, customer),
            &customer.name,
            &subject,
            MailTemplate::JobChangedTranslatorCustomer,
            data.clone(),
        )
        .await;

        if let Some(old) = old_translator {
            self.dispatch_mail(
                &old.email,
                &old.name,
                &subject,
                MailTemplate::JobChangedTranslatorOldTranslator,
                data.clone(),
            )
            .await;
        }

        self.dispatch_mail(
            &new_translator.email,
            &new_translator.name,
            &subject,
            MailTemplate::JobChangedTranslatorNewTranslator,
            data,
        )
        .await;
    }

    /// Due-date-change mails to customer and current translator
    pub async fn send_changed_date_emails(
        &self,
        job: &Job,
        customer: &User,
        translator: Option<&User>,
        old_due: DateTime<Utc>,
    ) {
        let subject = format!("Notice about a change to interpretation booking # {}", job.id);
        let mut data = self.job_mail_data(job);
        data.insert(
            "old_time".to_string(),
            json!(old_due.format("%Y-%m-%d %H:%M").to_string()),
        );

        self.dispatch_mail(
            &self.customer_email(job, customer),
            &customer.name,
            &subject,
            MailTemplate::JobChangedDate,
            data.clone(),
        )
        .await;

        if let Some(translator) = translator {
            self.dispatch_mail(
                &translator.email,
                &translator.name,
                &subject,
                MailTemplate::JobChangedDate,
                data,
            )
            .await;
        }
    }

    /// Language-change mails to customer and current translator
    pub async fn send_changed_lang_emails(
        &self,
        job: &Job,
        customer: &User,
        translator: Option<&User>,
        old_lang: &str,
    ) {
        let subject = format!("Notice about a change to interpretation booking # {}", job.id);
        let mut data = self.job_mail_data(job);
        data.insert("old_lang".to_string(), json!(old_lang));

        self.dispatch_mail(
            &self.customer_email(job, customer),
            &customer.name,
            &subject,
            MailTemplate::JobChangedLang,
            data.clone(),
        )
        .await;

        if let Some(translator) = translator {
            self.dispatch_mail(
                &translator.email,
                &translator.name,
                &subject,
                MailTemplate::JobChangedLang,
                data,
            )
            .await;
        }
    }

    async fn dispatch_mail(
        &self,
        to: &str,
        name: &str,
        subject: &str,
        template: MailTemplate,
        data: MailData,
    ) {
        info!(to, template = template.id(), subject, "Dispatching email");

        match self.mailer.send(to, name, subject, template, &data).await {
            Ok(()) => {
                counter!("tolkbridge_mails_sent_total").increment(1);
            }
            Err(e) => {
                counter!("tolkbridge_mails_failed_total").increment(1);
                error!(to, template = template.id(), error = %e, "Email dispatch failed");
            }
        }
    }

    fn job_mail_data(&self, job: &Job) -> MailData {
        let mut data = BTreeMap::new();
        data.insert("job_id".to_string(), json!(job.id));
        data.insert("language".to_string(), json!(job.language));
        data.insert(
            "due".to_string(),
            json!(job.due.format("%Y-%m-%d %H:%M").to_string()),
        );
        data.insert("duration".to_string(), json!(job.duration));
        data.insert("town".to_string(), json!(job.town));
        data.insert("status".to_string(), json!(String::from(job.status)));
        data
    }

    /// Job-level override wins over the account address
    fn customer_email(&self, job: &Job, customer: &User) -> String {
        job.customer_email
            .clone()
            .unwrap_or_else(|| customer.email.clone())
    }
}
