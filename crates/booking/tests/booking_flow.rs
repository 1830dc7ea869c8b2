//! End-to-end flows over the in-memory store with recording gateways

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use tolkbridge_booking::{
    AcceptOutcome, BookingIntake, CancelOutcome, CreateBookingRequest, Dispatcher, Lifecycle,
    MatchingEngine, UpdateJobRequest,
};
use tolkbridge_common::config::AppConfig;
use tolkbridge_common::errors::{BookingError, Result};
use tolkbridge_common::events::{ChannelEventBus, DomainEvent};
use tolkbridge_common::mail::{MailData, MailTemplate, Mailer};
use tolkbridge_common::models::{
    CertifiedField, CustomerProfile, Gender, Job, JobStatus, JobType, NotificationPrefs, Role,
    TranslatorLevel, TranslatorProfile, TranslatorType, User,
};
use tolkbridge_common::push::{PushGateway, PushPayload};
use tolkbridge_common::sms::{SmsGateway, SmsStatus};
use tolkbridge_common::store::{JobStore, MemoryStore};

// ============================================================================
// Recording Gateways
// ============================================================================

#[derive(Default)]
struct RecordingPush {
    sent: Mutex<Vec<PushPayload>>,
}

#[async_trait]
impl PushGateway for RecordingPush {
    async fn send(&self, payload: &PushPayload) -> Result<()> {
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSms {
    sent: Mutex<Vec<(String, String)>>,
    reject_number: Mutex<Option<String>>,
}

#[async_trait]
impl SmsGateway for RecordingSms {
    async fn send(&self, _from: &str, to: &str, body: &str) -> Result<SmsStatus> {
        self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
        let rejected = self.reject_number.lock().unwrap().as_deref() == Some(to);
        Ok(SmsStatus {
            accepted: !rejected,
            provider_id: Some("test".to_string()),
        })
    }
}

/// Push gateway that always fails at the transport level
struct FailingPush;

#[async_trait]
impl PushGateway for FailingPush {
    async fn send(&self, _payload: &PushPayload) -> Result<()> {
        Err(BookingError::Transport {
            channel: "push".to_string(),
            message: "gateway unreachable".to_string(),
        })
    }
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, MailTemplate)>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(
        &self,
        to: &str,
        _name: &str,
        _subject: &str,
        template: MailTemplate,
        _data: &MailData,
    ) -> Result<()> {
        self.sent.lock().unwrap().push((to.to_string(), template));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    store: Arc<MemoryStore>,
    push: Arc<RecordingPush>,
    sms: Arc<RecordingSms>,
    mailer: Arc<RecordingMailer>,
    lifecycle: Lifecycle,
    intake: BookingIntake,
    dispatcher: Dispatcher,
    matching: MatchingEngine,
    events: mpsc::UnboundedReceiver<DomainEvent>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn JobStore> = store.clone();
    let push = Arc::new(RecordingPush::default());
    let sms = Arc::new(RecordingSms::default());
    let mailer = Arc::new(RecordingMailer::default());
    let (bus, events) = ChannelEventBus::new();
    let bus = Arc::new(bus);
    let config = AppConfig::default();

    let matching = MatchingEngine::new(store_dyn.clone());
    let dispatcher = Dispatcher::new(
        store_dyn.clone(),
        matching.clone(),
        push.clone(),
        sms.clone(),
        mailer.clone(),
        config.clone(),
    );
    let lifecycle = Lifecycle::new(
        store_dyn.clone(),
        dispatcher.clone(),
        matching.clone(),
        bus.clone(),
        config.clone(),
    );
    let intake = BookingIntake::new(store_dyn, dispatcher.clone(), bus, config);

    Harness {
        store,
        push,
        sms,
        mailer,
        lifecycle,
        intake,
        dispatcher,
        matching,
        events,
    }
}

fn customer() -> User {
    User {
        id: Uuid::new_v4(),
        name: "Test Customer".to_string(),
        email: "customer@example.test".to_string(),
        role: Role::Customer,
        active: true,
        customer: Some(CustomerProfile {
            consumer_type: tolkbridge_common::models::ConsumerType::Paid,
            town: Some("Stockholm".to_string()),
            customer_type: None,
        }),
        translator: None,
    }
}

fn mobile_for(email: &str) -> String {
    let digits: u32 = email.bytes().map(u32::from).sum();
    format!("+467{:08}", digits)
}

fn translator(email: &str) -> User {
    User {
        id: Uuid::new_v4(),
        name: "Test Translator".to_string(),
        email: email.to_string(),
        role: Role::Translator,
        active: true,
        customer: None,
        translator: Some(TranslatorProfile {
            translator_type: TranslatorType::Professional,
            languages: vec!["spanish".to_string()],
            gender: Some(Gender::Female),
            levels: vec![TranslatorLevel::Certified.label().to_string()],
            town: Some("Stockholm".to_string()),
            mobile: Some(mobile_for(email)),
            prefs: NotificationPrefs::default(),
        }),
    }
}

fn pending_job(customer_id: Uuid, due_in: Duration) -> Job {
    let now = Utc::now();
    let due = now + due_in;
    Job {
        id: Uuid::new_v4(),
        customer_id,
        language: "spanish".to_string(),
        immediate: false,
        due,
        duration: 60,
        will_expire_at: tolkbridge_common::models::will_expire_at(due, now),
        certified: None,
        gender: None,
        job_type: JobType::Paid,
        phone_delivery: true,
        physical_delivery: false,
        town: None,
        status: JobStatus::Pending,
        created_at: now,
        withdraw_at: None,
        end_at: None,
        session_time: None,
        admin_comments: None,
        reference: None,
        customer_email: None,
        flagged: false,
        ignore_expiring: false,
        ignore_expired: false,
        ignore_throttle: false,
        reminder_emails_sent: 0,
    }
}

// ============================================================================
// Intake
// ============================================================================

#[tokio::test]
async fn immediate_booking_gets_lead_time_and_forced_phone() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();

    let request = CreateBookingRequest {
        language: "spanish".to_string(),
        immediate: true,
        due_date: None,
        due_time: None,
        duration: Some(30),
        customer_phone_type: None,
        customer_physical_type: None,
        job_for: vec![],
        town: None,
        customer_email: None,
        reference: None,
    };

    let response = h.intake.create_booking(request, &customer).await.unwrap();
    assert_eq!(response.booking_type, "immediate");

    let job = h.store.find_job(response.id).await.unwrap().unwrap();
    assert!(job.phone_delivery);
    assert!(job.immediate);

    let lead = job.due - Utc::now();
    assert!(lead > Duration::minutes(4) && lead <= Duration::minutes(5));

    // confirmation mail went to the customer
    let mails = h.mailer.sent.lock().unwrap();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].0, customer.email);
    assert_eq!(mails[0].1, MailTemplate::JobCreated);
}

#[tokio::test]
async fn scheduled_booking_in_the_past_is_rejected() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();

    let request = CreateBookingRequest {
        language: "spanish".to_string(),
        immediate: false,
        due_date: Some("01/15/2020".to_string()),
        due_time: Some("10:00".to_string()),
        duration: Some(30),
        customer_phone_type: Some(true),
        customer_physical_type: None,
        job_for: vec![],
        town: None,
        customer_email: None,
        reference: None,
    };

    let err = h.intake.create_booking(request, &customer).await.unwrap_err();
    match err {
        BookingError::Validation { field, .. } => assert_eq!(field, "due_date"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn scheduled_booking_without_delivery_type_is_rejected() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();

    let due = Utc::now() + Duration::minutes(2);
    let request = CreateBookingRequest {
        language: "spanish".to_string(),
        immediate: false,
        due_date: Some(due.format("%m/%d/%Y").to_string()),
        due_time: Some(due.format("%H:%M").to_string()),
        duration: Some(30),
        customer_phone_type: None,
        customer_physical_type: None,
        job_for: vec![],
        town: None,
        customer_email: None,
        reference: None,
    };

    let err = h.intake.create_booking(request, &customer).await.unwrap_err();
    match err {
        BookingError::Validation { field, .. } => assert_eq!(field, "customer_phone_type"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn translators_can_not_create_bookings() {
    let h = harness();
    let translator = h.store.create_user(translator("t@example.test")).await.unwrap();

    let request = CreateBookingRequest {
        language: "spanish".to_string(),
        immediate: true,
        due_date: None,
        due_time: None,
        duration: Some(30),
        customer_phone_type: None,
        customer_physical_type: None,
        job_for: vec![],
        town: None,
        customer_email: None,
        reference: None,
    };

    let err = h.intake.create_booking(request, &translator).await.unwrap_err();
    assert!(matches!(err, BookingError::Permission { .. }));
}

// ============================================================================
// Accept
// ============================================================================

#[tokio::test]
async fn second_accept_loses_the_claim_race() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    let first = h.store.create_user(translator("a@example.test")).await.unwrap();
    let second = h.store.create_user(translator("b@example.test")).await.unwrap();

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();

    let outcome = h.lifecycle.accept_job(job.id, &first).await.unwrap();
    assert!(matches!(outcome, AcceptOutcome::Accepted { .. }));

    let outcome = h.lifecycle.accept_job(job.id, &second).await.unwrap();
    assert!(matches!(outcome, AcceptOutcome::AlreadyTaken { .. }));

    let assignment = h.store.active_assignment(job.id).await.unwrap().unwrap();
    assert_eq!(assignment.translator_id, first.id);

    let job = h.store.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Assigned);

    // acceptance mail went to the customer exactly once
    let mails = h.mailer.sent.lock().unwrap();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].1, MailTemplate::JobAccepted);
}

#[tokio::test]
async fn concurrent_accepts_produce_exactly_one_winner() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();

    let mut competitors = Vec::new();
    for i in 0..8 {
        let user = h
            .store
            .create_user(translator(&format!("t{i}@example.test")))
            .await
            .unwrap();
        competitors.push(user);
    }

    let mut handles = Vec::new();
    for user in competitors {
        let lifecycle = h.lifecycle.clone();
        handles.push(tokio::spawn(async move {
            lifecycle.accept_job(job.id, &user).await
        }));
    }

    let mut accepted = 0;
    let mut taken = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            AcceptOutcome::Accepted { .. } => accepted += 1,
            AcceptOutcome::AlreadyTaken { .. } => taken += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(taken, 7);

    let active: Vec<_> = h
        .store
        .assignments_for_job(job.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.is_active())
        .collect();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn overlapping_booking_blocks_accept() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    let translator = h.store.create_user(translator("a@example.test")).await.unwrap();

    let first = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();
    let overlapping = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();

    let outcome = h.lifecycle.accept_job(first.id, &translator).await.unwrap();
    assert!(matches!(outcome, AcceptOutcome::Accepted { .. }));

    let outcome = h
        .lifecycle
        .accept_job(overlapping.id, &translator)
        .await
        .unwrap();
    assert!(matches!(outcome, AcceptOutcome::AlreadyBooked { .. }));
}

#[tokio::test]
async fn accept_by_id_pushes_to_the_customer() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    let translator = h.store.create_user(translator("a@example.test")).await.unwrap();

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();

    let outcome = h.lifecycle.accept_job_by_id(job.id, &translator).await.unwrap();
    assert!(matches!(outcome, AcceptOutcome::Accepted { .. }));

    let pushes = h.push.sent.lock().unwrap();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].tags[0]["value"], customer.email);
}

// ============================================================================
// Cancel
// ============================================================================

#[tokio::test]
async fn customer_cancellation_picks_withdraw_status_by_cutoff() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();

    let early = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(30)))
        .await
        .unwrap();
    let outcome = h.lifecycle.cancel_job(early.id, &customer).await.unwrap();
    assert!(matches!(
        outcome,
        CancelOutcome::Withdrawn {
            status: JobStatus::WithdrawBefore24
        }
    ));

    let late = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(10)))
        .await
        .unwrap();
    let outcome = h.lifecycle.cancel_job(late.id, &customer).await.unwrap();
    assert!(matches!(
        outcome,
        CancelOutcome::Withdrawn {
            status: JobStatus::WithdrawAfter24
        }
    ));

    let job = h.store.find_job(late.id).await.unwrap().unwrap();
    assert!(job.withdraw_at.is_some());
}

#[tokio::test]
async fn customer_cancellation_emits_event_and_notifies_translator() {
    let mut h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    let translator = h.store.create_user(translator("a@example.test")).await.unwrap();

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();
    h.lifecycle.accept_job(job.id, &translator).await.unwrap();

    h.lifecycle.cancel_job(job.id, &customer).await.unwrap();

    match h.events.recv().await.unwrap() {
        DomainEvent::JobCanceled { job_id } => assert_eq!(job_id, job.id),
        other => panic!("unexpected event: {other:?}"),
    }

    let pushes = h.push.sent.lock().unwrap();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].tags[0]["value"], translator.email);
}

#[tokio::test]
async fn translator_cancellation_outside_cutoff_reopens_the_search() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    let quitting = h.store.create_user(translator("a@example.test")).await.unwrap();
    let other = h.store.create_user(translator("b@example.test")).await.unwrap();

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();
    h.lifecycle.accept_job(job.id, &quitting).await.unwrap();

    let outcome = h.lifecycle.cancel_job(job.id, &quitting).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::ReturnedToPending));

    let job = h.store.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(h.store.active_assignment(job.id).await.unwrap().is_none());

    // customer push plus a fresh suitable-translators fan-out that
    // reaches the other translator
    let pushes = h.push.sent.lock().unwrap();
    assert!(pushes
        .iter()
        .any(|p| p.tags.iter().any(|t| t["value"] == customer.email)));
    assert!(pushes
        .iter()
        .any(|p| p.tags.iter().any(|t| t["value"] == other.email)));
}

#[tokio::test]
async fn translator_cancellation_inside_cutoff_is_refused() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    let translator = h.store.create_user(translator("a@example.test")).await.unwrap();

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(10)))
        .await
        .unwrap();
    h.lifecycle.accept_job(job.id, &translator).await.unwrap();

    let outcome = h.lifecycle.cancel_job(job.id, &translator).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::TooLate { .. }));

    let job = h.store.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Assigned);
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn reassignment_cancels_exactly_one_and_creates_exactly_one() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    let old = h.store.create_user(translator("old@example.test")).await.unwrap();
    let new = h.store.create_user(translator("new@example.test")).await.unwrap();

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();
    h.lifecycle.accept_job(job.id, &old).await.unwrap();

    let request = UpdateJobRequest {
        translator_id: Some(new.id),
        ..Default::default()
    };
    h.lifecycle.update_job(job.id, request).await.unwrap();

    let assignments = h.store.assignments_for_job(job.id).await.unwrap();
    assert_eq!(assignments.len(), 2);
    let active: Vec<_> = assignments.iter().filter(|a| a.is_active()).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].translator_id, new.id);

    // customer, old translator and new translator each got mail
    let mails = h.mailer.sent.lock().unwrap();
    assert!(mails
        .iter()
        .any(|(_, t)| *t == MailTemplate::JobChangedTranslatorCustomer));
    assert!(mails
        .iter()
        .any(|(to, t)| *t == MailTemplate::JobChangedTranslatorOldTranslator && to == &old.email));
    assert!(mails
        .iter()
        .any(|(to, t)| *t == MailTemplate::JobChangedTranslatorNewTranslator && to == &new.email));
}

#[tokio::test]
async fn completed_to_timedout_requires_a_comment() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();

    let mut job = pending_job(customer.id, Duration::hours(48));
    job.status = JobStatus::Completed;
    let job = h.store.create_job(job).await.unwrap();

    // without a comment the guard fails silently
    let request = UpdateJobRequest {
        status: Some(JobStatus::TimedOut),
        ..Default::default()
    };
    let updated = h.lifecycle.update_job(job.id, request).await.unwrap();
    assert_eq!(updated.status, JobStatus::Completed);

    let request = UpdateJobRequest {
        status: Some(JobStatus::TimedOut),
        admin_comments: Some("no-show confirmed by phone".to_string()),
        ..Default::default()
    };
    let updated = h.lifecycle.update_job(job.id, request).await.unwrap();
    assert_eq!(updated.status, JobStatus::TimedOut);
}

#[tokio::test]
async fn due_change_recomputes_expiry_and_mails_both_parties() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    let translator = h.store.create_user(translator("a@example.test")).await.unwrap();

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();
    h.lifecycle.accept_job(job.id, &translator).await.unwrap();

    let new_due = Utc::now() + Duration::hours(100);
    let request = UpdateJobRequest {
        due: Some(new_due),
        ..Default::default()
    };
    let updated = h.lifecycle.update_job(job.id, request).await.unwrap();

    assert_eq!(updated.due, new_due);
    assert_eq!(
        updated.will_expire_at,
        tolkbridge_common::models::will_expire_at(new_due, updated.created_at)
    );

    let mails = h.mailer.sent.lock().unwrap();
    let date_mails: Vec<_> = mails
        .iter()
        .filter(|(_, t)| *t == MailTemplate::JobChangedDate)
        .collect();
    assert_eq!(date_mails.len(), 2);
}

#[tokio::test]
async fn timedout_to_pending_reopens_and_notifies() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    let translator = h.store.create_user(translator("a@example.test")).await.unwrap();
    let _ = translator;

    let mut job = pending_job(customer.id, Duration::hours(48));
    job.status = JobStatus::TimedOut;
    job.reminder_emails_sent = 3;
    let job = h.store.create_job(job).await.unwrap();

    let request = UpdateJobRequest {
        status: Some(JobStatus::Pending),
        ..Default::default()
    };
    let updated = h.lifecycle.update_job(job.id, request).await.unwrap();

    assert_eq!(updated.status, JobStatus::Pending);
    assert_eq!(updated.reminder_emails_sent, 0);

    let mails = h.mailer.sent.lock().unwrap();
    assert!(mails
        .iter()
        .any(|(_, t)| *t == MailTemplate::JobChangeStatusToCustomer));

    let pushes = h.push.sent.lock().unwrap();
    assert_eq!(pushes.len(), 1);
}

// ============================================================================
// End / No-Show
// ============================================================================

#[tokio::test]
async fn end_job_on_pending_is_a_silent_no_op() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();

    h.lifecycle.end_job(job.id, customer.id).await.unwrap();

    let job = h.store.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(h.mailer.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn end_job_completes_and_notifies_the_other_party() {
    let mut h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    let translator = h.store.create_user(translator("a@example.test")).await.unwrap();

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();
    h.lifecycle.accept_job(job.id, &translator).await.unwrap();

    let mut started = h.store.find_job(job.id).await.unwrap().unwrap();
    started.status = JobStatus::Started;
    h.store.save_job(&started).await.unwrap();

    h.lifecycle.end_job(job.id, translator.id).await.unwrap();

    let job = h.store.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.session_time.is_some());
    assert!(job.end_at.is_some());

    let assignment = h
        .store
        .assignments_for_job(job.id)
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.completed_at.is_some())
        .unwrap();
    assert_eq!(assignment.completed_by, Some(translator.id));

    match h.events.recv().await.unwrap() {
        DomainEvent::SessionEnded { notified_party, .. } => {
            assert_eq!(notified_party, customer.id)
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // invoice mail for the customer, salary mail for the translator
    let mails = h.mailer.sent.lock().unwrap();
    let ended: Vec<_> = mails
        .iter()
        .filter(|(_, t)| *t == MailTemplate::SessionEnded)
        .collect();
    assert_eq!(ended.len(), 2);
}

#[tokio::test]
async fn customer_no_show_closes_the_assignment() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    let translator = h.store.create_user(translator("a@example.test")).await.unwrap();

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();
    h.lifecycle.accept_job(job.id, &translator).await.unwrap();

    h.lifecycle.customer_not_call(job.id).await.unwrap();

    let job = h.store.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::NotCarriedOutCustomer);

    let assignment = h
        .store
        .assignments_for_job(job.id)
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.completed_at.is_some())
        .unwrap();
    assert_eq!(assignment.completed_by, Some(translator.id));
}

// ============================================================================
// Reopen
// ============================================================================

#[tokio::test]
async fn reopening_a_timedout_job_clones_it_and_leaves_a_marker() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    let translator = h.store.create_user(translator("a@example.test")).await.unwrap();

    let mut job = pending_job(customer.id, Duration::hours(48));
    job.status = JobStatus::TimedOut;
    let job = h.store.create_job(job).await.unwrap();

    let reopened_id = h.lifecycle.reopen(job.id, translator.id).await.unwrap();
    assert_ne!(reopened_id, job.id);

    let reopened = h.store.find_job(reopened_id).await.unwrap().unwrap();
    assert_eq!(reopened.status, JobStatus::Pending);
    assert!(reopened
        .admin_comments
        .as_deref()
        .unwrap()
        .contains(&job.id.to_string()));

    // marker row on the original job, cancelled at creation
    let markers = h.store.assignments_for_job(job.id).await.unwrap();
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].translator_id, translator.id);
    assert!(markers[0].cancel_at.is_some());
}

#[tokio::test]
async fn reopening_a_withdrawn_job_resets_it_in_place() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    let translator = h.store.create_user(translator("a@example.test")).await.unwrap();

    let mut job = pending_job(customer.id, Duration::hours(48));
    job.status = JobStatus::WithdrawAfter24;
    let job = h.store.create_job(job).await.unwrap();

    let reopened_id = h.lifecycle.reopen(job.id, translator.id).await.unwrap();
    assert_eq!(reopened_id, job.id);

    let reopened = h.store.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(reopened.status, JobStatus::Pending);
}

// ============================================================================
// Matching and Dispatch
// ============================================================================

#[tokio::test]
async fn eligibility_agrees_with_the_translator_listing() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();

    let mut layman = translator("layman@example.test");
    if let Some(profile) = layman.translator.as_mut() {
        profile.levels = vec![TranslatorLevel::Layman.label().to_string()];
    }
    let layman = h.store.create_user(layman).await.unwrap();
    let certified = h.store.create_user(translator("cert@example.test")).await.unwrap();

    let mut job = pending_job(customer.id, Duration::hours(48));
    job.certified = Some(CertifiedField::Both);
    let job = h.store.create_job(job).await.unwrap();

    let eligible = h.matching.find_eligible_translators(&job).await.unwrap();
    let ids: Vec<_> = eligible.iter().map(|u| u.id).collect();
    assert!(ids.contains(&certified.id));
    assert!(!ids.contains(&layman.id));

    assert!(h.matching.is_eligible(&certified, &job).await.unwrap());
    assert!(!h.matching.is_eligible(&layman, &job).await.unwrap());
}

#[tokio::test]
async fn blacklisted_translator_is_not_eligible() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    let translator = h.store.create_user(translator("a@example.test")).await.unwrap();

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();

    assert!(h.matching.is_eligible(&translator, &job).await.unwrap());

    h.store.add_to_blacklist(customer.id, translator.id).await.unwrap();
    assert!(!h.matching.is_eligible(&translator, &job).await.unwrap());
}

#[tokio::test]
async fn physical_job_requires_a_town_match() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();

    let mut remote = translator("remote@example.test");
    if let Some(profile) = remote.translator.as_mut() {
        profile.town = Some("Göteborg".to_string());
    }
    let remote = h.store.create_user(remote).await.unwrap();
    let local = h.store.create_user(translator("local@example.test")).await.unwrap();

    let mut job = pending_job(customer.id, Duration::hours(48));
    job.phone_delivery = false;
    job.physical_delivery = true;
    job.town = Some("Stockholm".to_string());
    let job = h.store.create_job(job).await.unwrap();

    assert!(h.matching.is_eligible(&local, &job).await.unwrap());
    assert!(!h.matching.is_eligible(&remote, &job).await.unwrap());
}

#[tokio::test]
async fn unknown_translator_level_is_a_configuration_error() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();

    let mut broken = translator("broken@example.test");
    if let Some(profile) = broken.translator.as_mut() {
        profile.levels = vec!["Gold star".to_string()];
    }
    let broken = h.store.create_user(broken).await.unwrap();

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();

    let err = h.matching.is_eligible(&broken, &job).await.unwrap_err();
    assert!(matches!(err, BookingError::Configuration { .. }));
}

#[tokio::test]
async fn suitable_job_fan_out_skips_opted_out_translators() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();

    let mut opted_out = translator("out@example.test");
    if let Some(profile) = opted_out.translator.as_mut() {
        profile.prefs.opt_out_all = true;
    }
    h.store.create_user(opted_out).await.unwrap();
    let reachable = h.store.create_user(translator("in@example.test")).await.unwrap();

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();

    h.dispatcher.notify_suitable_translators(&job, None).await.unwrap();

    let pushes = h.push.sent.lock().unwrap();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].tags.len(), 1);
    assert_eq!(pushes[0].tags[0]["value"], reachable.email);
}

#[tokio::test]
async fn emergency_fan_out_respects_the_emergency_opt_out() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();

    let mut no_emergency = translator("calm@example.test");
    if let Some(profile) = no_emergency.translator.as_mut() {
        profile.prefs.opt_out_emergency = true;
    }
    h.store.create_user(no_emergency).await.unwrap();
    let reachable = h.store.create_user(translator("in@example.test")).await.unwrap();

    let mut job = pending_job(customer.id, Duration::hours(1));
    job.immediate = true;
    let job = h.store.create_job(job).await.unwrap();

    h.dispatcher.notify_suitable_translators(&job, None).await.unwrap();

    let pushes = h.push.sent.lock().unwrap();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].tags[0]["value"], reachable.email);
    assert_eq!(pushes[0].android_sound, "emergency_booking");
}

#[tokio::test]
async fn sms_fan_out_reports_the_success_count() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();

    h.store.create_user(translator("a@example.test")).await.unwrap();
    h.store.create_user(translator("b@example.test")).await.unwrap();
    let mut no_mobile = translator("c@example.test");
    if let Some(profile) = no_mobile.translator.as_mut() {
        profile.mobile = None;
    }
    h.store.create_user(no_mobile).await.unwrap();

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();

    let sent = h.dispatcher.send_sms_to_eligible_translators(&job).await.unwrap();
    assert_eq!(sent, 2);
    assert_eq!(h.sms.sent.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn sms_fan_out_excludes_rejected_recipients_from_the_count() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();

    h.store.create_user(translator("a@example.test")).await.unwrap();
    let rejected = h.store.create_user(translator("b@example.test")).await.unwrap();
    let rejected_mobile = rejected
        .translator
        .as_ref()
        .and_then(|p| p.mobile.clone())
        .unwrap();
    *h.sms.reject_number.lock().unwrap() = Some(rejected_mobile);

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();

    let sent = h.dispatcher.send_sms_to_eligible_translators(&job).await.unwrap();
    assert_eq!(sent, 1);
    assert_eq!(h.sms.sent.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn jobs_with_both_delivery_types_get_the_on_site_wording() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    let interpreter = h.store.create_user(translator("a@example.test")).await.unwrap();

    let mut job = pending_job(customer.id, Duration::hours(48));
    job.phone_delivery = true;
    job.physical_delivery = true;
    job.town = Some("Stockholm".to_string());
    let job = h.store.create_job(job).await.unwrap();

    let sent = h.dispatcher.send_sms_to_eligible_translators(&job).await.unwrap();
    assert_eq!(sent, 1);
    let (_, body) = h.sms.sent.lock().unwrap().pop().unwrap();
    assert!(body.contains("on site in Stockholm"), "got: {body}");

    h.dispatcher.send_session_start_remind(&job, &interpreter).await;
    let reminder = h.push.sent.lock().unwrap().pop().unwrap();
    assert!(reminder.contents["en"].contains("on site"));
}

#[tokio::test]
async fn night_delayed_translators_get_a_deferred_push() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();

    let mut delayed = translator("sleeping@example.test");
    if let Some(profile) = delayed.translator.as_mut() {
        profile.prefs.delay_at_night = true;
    }
    let delayed = h.store.create_user(delayed).await.unwrap();
    let awake = h.store.create_user(translator("awake@example.test")).await.unwrap();

    // A night window covering the whole day makes the split
    // deterministic regardless of the wall clock.
    let mut config = AppConfig::default();
    config.notify.night_start_hour = 0;
    config.notify.night_end_hour = 24;

    let store_dyn: Arc<dyn JobStore> = h.store.clone();
    let dispatcher = Dispatcher::new(
        store_dyn.clone(),
        MatchingEngine::new(store_dyn),
        h.push.clone(),
        h.sms.clone(),
        h.mailer.clone(),
        config,
    );

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();

    dispatcher.notify_suitable_translators(&job, None).await.unwrap();

    let pushes = h.push.sent.lock().unwrap();
    assert_eq!(pushes.len(), 2);
    let immediate = pushes
        .iter()
        .find(|p| p.send_after.is_none())
        .expect("immediate group push");
    let deferred = pushes
        .iter()
        .find(|p| p.send_after.is_some())
        .expect("deferred group push");
    assert_eq!(immediate.tags[0]["value"], awake.email);
    assert_eq!(deferred.tags[0]["value"], delayed.email);
}

#[tokio::test]
async fn push_transport_failures_do_not_abort_the_dispatch() {
    let h = harness();
    let customer = h.store.create_user(customer()).await.unwrap();
    h.store.create_user(translator("a@example.test")).await.unwrap();

    let store_dyn: Arc<dyn JobStore> = h.store.clone();
    let dispatcher = Dispatcher::new(
        store_dyn.clone(),
        MatchingEngine::new(store_dyn),
        Arc::new(FailingPush),
        h.sms.clone(),
        h.mailer.clone(),
        AppConfig::default(),
    );

    let job = h
        .store
        .create_job(pending_job(customer.id, Duration::hours(48)))
        .await
        .unwrap();

    dispatcher.notify_suitable_translators(&job, None).await.unwrap();
}
