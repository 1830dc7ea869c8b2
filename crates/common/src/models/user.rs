//! User entity: customers and translators, disjoint roles

use crate::errors::BookingError;
use crate::models::job::{Gender, JobType};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Translator,
}

/// Billing category of a customer account
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerType {
    Rwsconsumer,
    Ngo,
    Paid,
}

impl ConsumerType {
    /// Job type created by this kind of customer
    pub fn job_type(&self) -> JobType {
        match self {
            ConsumerType::Rwsconsumer => JobType::Rws,
            ConsumerType::Ngo => JobType::Unpaid,
            ConsumerType::Paid => JobType::Paid,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslatorType {
    Professional,
    Rwstranslator,
    Volunteer,
}

impl TranslatorType {
    /// Job type this kind of translator is matched against
    pub fn job_type(&self) -> JobType {
        match self {
            TranslatorType::Professional => JobType::Paid,
            TranslatorType::Rwstranslator => JobType::Rws,
            TranslatorType::Volunteer => JobType::Unpaid,
        }
    }
}

/// Certification level held by a translator.
///
/// Stored as free-form labels; parsed on use so an unrecognized label
/// surfaces as a configuration error instead of silently matching
/// nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranslatorLevel {
    Certified,
    CertifiedLaw,
    CertifiedHealth,
    Layman,
    ReadCourses,
}

impl TranslatorLevel {
    pub const ALL: [TranslatorLevel; 5] = [
        TranslatorLevel::Certified,
        TranslatorLevel::CertifiedLaw,
        TranslatorLevel::CertifiedHealth,
        TranslatorLevel::Layman,
        TranslatorLevel::ReadCourses,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TranslatorLevel::Certified => "Certified",
            TranslatorLevel::CertifiedLaw => "Certified with specialisation in law",
            TranslatorLevel::CertifiedHealth => "Certified with specialisation in health care",
            TranslatorLevel::Layman => "Layman",
            TranslatorLevel::ReadCourses => "Read Translation courses",
        }
    }
}

impl FromStr for TranslatorLevel {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Certified" => Ok(TranslatorLevel::Certified),
            "Certified with specialisation in law" => Ok(TranslatorLevel::CertifiedLaw),
            "Certified with specialisation in health care" => Ok(TranslatorLevel::CertifiedHealth),
            "Layman" => Ok(TranslatorLevel::Layman),
            "Read Translation courses" => Ok(TranslatorLevel::ReadCourses),
            other => Err(BookingError::Configuration {
                message: format!("Unknown translator level: {other}"),
            }),
        }
    }
}

/// Per-translator notification preferences
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NotificationPrefs {
    /// Opted out of all push notifications
    #[serde(default)]
    pub opt_out_all: bool,

    /// Opted out of emergency (immediate) notifications
    #[serde(default)]
    pub opt_out_emergency: bool,

    /// Opted in to night-time delivery delay
    #[serde(default)]
    pub delay_at_night: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub consumer_type: ConsumerType,
    pub town: Option<String>,
    pub customer_type: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranslatorProfile {
    pub translator_type: TranslatorType,

    /// Language codes the translator works in
    pub languages: Vec<String>,

    pub gender: Option<Gender>,

    /// Certification level labels, parsed via [`TranslatorLevel`]
    pub levels: Vec<String>,

    pub town: Option<String>,
    pub mobile: Option<String>,

    #[serde(default)]
    pub prefs: NotificationPrefs,
}

/// Customer or translator account
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
    pub customer: Option<CustomerProfile>,
    pub translator: Option<TranslatorProfile>,
}

impl User {
    pub fn is_customer(&self) -> bool {
        self.role == Role::Customer
    }

    pub fn is_translator(&self) -> bool {
        self.role == Role::Translator
    }

    /// The translator profile, or a configuration error when the user
    /// is not set up as one
    pub fn translator_profile(&self) -> Result<&TranslatorProfile, BookingError> {
        self.translator
            .as_ref()
            .ok_or_else(|| BookingError::Configuration {
                message: format!("User {} has no translator profile", self.id),
            })
    }
}
