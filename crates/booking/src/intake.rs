//! Booking intake: validated creation of jobs
//!
//! The boundary builds one typed request; nothing downstream ever
//! re-inspects raw input maps. Missing or malformed fields come back
//! as structured validation failures, never as faults.

use chrono::{Duration, NaiveDateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tolkbridge_common::config::AppConfig;
use tolkbridge_common::errors::{BookingError, Result};
use tolkbridge_common::events::{DomainEvent, EventBus};
use tolkbridge_common::models::{will_expire_at, CertifiedField, Gender, Job, JobStatus, User};
use tolkbridge_common::store::JobStore;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::notify::Dispatcher;

/// Combined date+time input format, `m/d/Y H:M`
const DUE_FORMAT: &str = "%m/%d/%Y %H:%M";

/// Raw booking fields as the boundary receives them
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    /// Language the interpretation is for
    #[validate(length(min = 1, message = "You must fill in all fields"))]
    pub language: String,

    #[serde(default)]
    pub immediate: bool,

    /// Scheduled date, `m/d/Y`; required unless immediate
    pub due_date: Option<String>,

    /// Scheduled time, `H:M`; required unless immediate
    pub due_time: Option<String>,

    /// Session length in minutes
    #[validate(range(min = 1, message = "Duration must be at least one minute"))]
    pub duration: Option<i64>,

    /// Customer accepts phone delivery
    pub customer_phone_type: Option<bool>,

    /// Customer requires physical presence
    pub customer_physical_type: Option<bool>,

    /// Multi-valued audience selection: certification tokens plus an
    /// optional gender token
    #[serde(default)]
    pub job_for: Vec<String>,

    pub town: Option<String>,

    /// Overrides the customer's account email for job mail
    pub customer_email: Option<String>,

    pub reference: Option<String>,
}

/// Normalized creation response
#[derive(Clone, Debug, Serialize)]
pub struct BookingResponse {
    pub id: Uuid,

    /// `immediate` or `regular`
    pub booking_type: String,

    /// Resolved audience labels echoed back to the caller
    pub job_for: Vec<String>,
}

/// Gender and certification derived from the `job_for` selection
fn derive_job_for(tokens: &[String]) -> (Option<Gender>, Option<CertifiedField>) {
    let has = |token: &str| tokens.iter().any(|t| t == token);

    let gender = if has("male") {
        Some(Gender::Male)
    } else if has("female") {
        Some(Gender::Female)
    } else {
        None
    };

    // Fixed precedence: normal combined with a certified token wins
    // over either alone. The misspelled health token is the wire name
    // the clients send and is kept as-is.
    let certified = if has("normal") && has("certified") {
        Some(CertifiedField::Both)
    } else if has("normal") && has("certified_in_law") {
        Some(CertifiedField::NormalLaw)
    } else if has("normal") && has("certified_in_helth") {
        Some(CertifiedField::NormalHealth)
    } else if has("normal") {
        Some(CertifiedField::Normal)
    } else if has("certified") {
        Some(CertifiedField::Yes)
    } else if has("certified_in_law") {
        Some(CertifiedField::Law)
    } else if has("certified_in_helth") {
        Some(CertifiedField::Health)
    } else {
        None
    };

    (gender, certified)
}

/// Labels echoed back for the resolved selection
fn job_for_labels(gender: Option<Gender>, certified: Option<CertifiedField>) -> Vec<String> {
    let mut labels = Vec::new();

    if let Some(gender) = gender {
        labels.push(
            match gender {
                Gender::Male => "male",
                Gender::Female => "female",
            }
            .to_string(),
        );
    }

    match certified {
        Some(CertifiedField::Both) => {
            labels.push("normal".to_string());
            labels.push("certified".to_string());
        }
        Some(CertifiedField::Yes) => labels.push("certified".to_string()),
        Some(CertifiedField::Normal) => labels.push("normal".to_string()),
        Some(CertifiedField::Law) => labels.push("law".to_string()),
        Some(CertifiedField::NormalLaw) => labels.push("n_law".to_string()),
        Some(CertifiedField::Health) => labels.push("health".to_string()),
        Some(CertifiedField::NormalHealth) => labels.push("n_health".to_string()),
        None => {}
    }

    labels
}

/// Validated booking creation
#[derive(Clone)]
pub struct BookingIntake {
    store: Arc<dyn JobStore>,
    dispatcher: Dispatcher,
    events: Arc<dyn EventBus>,
    config: AppConfig,
}

impl BookingIntake {
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: Dispatcher,
        events: Arc<dyn EventBus>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            events,
            config,
        }
    }

    /// Create a booking for a customer.
    ///
    /// Scheduled bookings need date, time, duration and at least one
    /// delivery type; immediate ones need only a duration and get a
    /// short lead time with phone delivery forced on.
    #[instrument(skip(self, request, actor), fields(actor_id = %actor.id))]
    pub async fn create_booking(
        &self,
        request: CreateBookingRequest,
        actor: &User,
    ) -> Result<BookingResponse> {
        if !actor.is_customer() {
            return Err(BookingError::Permission {
                message: "Translators can not create bookings".to_string(),
            });
        }
        let consumer_type = actor
            .customer
            .as_ref()
            .map(|profile| profile.consumer_type)
            .ok_or_else(|| BookingError::Configuration {
                message: format!("User {} has no customer profile", actor.id),
            })?;

        request.validate().map_err(first_validation_failure)?;

        let duration = request
            .duration
            .ok_or_else(|| BookingError::validation("duration", "You must fill in all fields"))?;

        let now = Utc::now();
        let phone = request.customer_phone_type.unwrap_or(false);
        let physical = request.customer_physical_type.unwrap_or(false);

        let (due, phone, physical) = if request.immediate {
            // Immediate bookings start after a short lead and always
            // allow phone delivery
            let lead = Duration::minutes(self.config.booking.immediate_lead_minutes);
            (now + lead, true, physical)
        } else {
            let due_date = request.due_date.as_deref().filter(|s| !s.is_empty()).ok_or_else(
                || BookingError::validation("due_date", "You must fill in all fields"),
            )?;
            let due_time = request.due_time.as_deref().filter(|s| !s.is_empty()).ok_or_else(
                || BookingError::validation("due_time", "You must fill in all fields"),
            )?;
            if !phone && !physical {
                return Err(BookingError::validation(
                    "customer_phone_type",
                    "You must make a selection here",
                ));
            }

            let due = NaiveDateTime::parse_from_str(&format!("{due_date} {due_time}"), DUE_FORMAT)
                .map_err(|_| {
                    BookingError::validation("due_date", "Invalid date or time format")
                })?
                .and_utc();
            if due <= now {
                return Err(BookingError::validation(
                    "due_date",
                    "Can't create a booking in the past",
                ));
            }

            (due, phone, physical)
        };

        let (gender, certified) = derive_job_for(&request.job_for);

        let job = Job {
            id: Uuid::new_v4(),
            customer_id: actor.id,
            language: request.language.clone(),
            immediate: request.immediate,
            due,
            duration,
            will_expire_at: will_expire_at(due, now),
            certified,
            gender,
            job_type: consumer_type.job_type(),
            phone_delivery: phone,
            physical_delivery: physical,
            town: request.town.clone(),
            status: JobStatus::Pending,
            created_at: now,
            withdraw_at: None,
            end_at: None,
            session_time: None,
            admin_comments: None,
            reference: request.reference.clone(),
            customer_email: request.customer_email.clone(),
            flagged: false,
            ignore_expiring: false,
            ignore_expired: false,
            ignore_throttle: false,
            reminder_emails_sent: 0,
        };

        let job = self.store.create_job(job).await?;
        counter!("tolkbridge_bookings_created_total").increment(1);
        info!(job_id = %job.id, immediate = job.immediate, "Booking created");

        self.events
            .publish(DomainEvent::JobCreated { job_id: job.id })
            .await;
        self.dispatcher.send_job_created_email(&job, actor).await;

        Ok(BookingResponse {
            id: job.id,
            booking_type: if job.immediate {
                "immediate".to_string()
            } else {
                "regular".to_string()
            },
            job_for: job_for_labels(gender, certified),
        })
    }
}

/// Collapse a validator report into the first structured failure
fn first_validation_failure(errors: validator::ValidationErrors) -> BookingError {
    for (field, failures) in errors.field_errors() {
        if let Some(failure) = failures.first() {
            let message = failure
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| failure.code.to_string());
            return BookingError::validation(field.as_ref(), &message);
        }
    }
    BookingError::validation("request", "Invalid booking request")
}
