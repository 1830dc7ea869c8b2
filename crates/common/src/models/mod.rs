//! Domain models shared across the booking core

pub mod assignment;
pub mod job;
pub mod user;

pub use assignment::Assignment;
pub use job::{will_expire_at, CertifiedField, Gender, Job, JobStatus, JobType};
pub use user::{
    ConsumerType, CustomerProfile, NotificationPrefs, Role, TranslatorLevel, TranslatorProfile,
    TranslatorType, User,
};
