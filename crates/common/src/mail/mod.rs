//! Transactional email seam
//!
//! Template ids are wire identifiers consumed by the external mail
//! renderer; they keep the legacy names.

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Email template identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MailTemplate {
    JobCreated,
    JobAccepted,
    SessionEnded,
    JobChangedTranslatorCustomer,
    JobChangedTranslatorOldTranslator,
    JobChangedTranslatorNewTranslator,
    JobChangedDate,
    JobChangedLang,
    JobChangeStatusToCustomer,
    StatusChangedFromPendingOrAssignedCustomer,
    JobCancelTranslator,
}

impl MailTemplate {
    pub fn id(&self) -> &'static str {
        match self {
            MailTemplate::JobCreated => "emails.job-created",
            MailTemplate::JobAccepted => "emails.job-accepted",
            MailTemplate::SessionEnded => "emails.session-ended",
            MailTemplate::JobChangedTranslatorCustomer => "emails.job-changed-translator-customer",
            MailTemplate::JobChangedTranslatorOldTranslator => {
                "emails.job-changed-translator-old-translator"
            }
            MailTemplate::JobChangedTranslatorNewTranslator => {
                "emails.job-changed-translator-new-translator"
            }
            MailTemplate::JobChangedDate => "emails.job-changed-date",
            MailTemplate::JobChangedLang => "emails.job-changed-lang",
            MailTemplate::JobChangeStatusToCustomer => "emails.job-change-status-to-customer",
            MailTemplate::StatusChangedFromPendingOrAssignedCustomer => {
                "emails.status-changed-from-pending-or-assigned-customer"
            }
            MailTemplate::JobCancelTranslator => "emails.job-cancel-translator",
        }
    }
}

/// Structured template data
pub type MailData = BTreeMap<String, Value>;

/// Trait for transactional email delivery
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        to: &str,
        name: &str,
        subject: &str,
        template: MailTemplate,
        data: &MailData,
    ) -> Result<()>;
}
