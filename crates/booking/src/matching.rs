//! Matching engine: translator/job eligibility
//!
//! Eligibility is a pure set-membership test with no ranking. Both
//! directions go through the same predicate so `find_eligible_jobs`
//! and `find_eligible_translators` can never disagree.

use std::sync::Arc;

use tolkbridge_common::errors::Result;
use tolkbridge_common::models::{CertifiedField, Job, JobStatus, TranslatorLevel, User};
use tolkbridge_common::store::JobStore;
use tracing::instrument;

/// Certification levels admitted by a job's `certified` field.
///
/// An absent field admits every level; `yes` and `both` admit the
/// certified tiers; the specialised values admit exactly their tier;
/// `normal` admits the layman tiers.
pub fn levels_for(certified: Option<CertifiedField>) -> &'static [TranslatorLevel] {
    match certified {
        None => &TranslatorLevel::ALL,
        Some(CertifiedField::Yes) | Some(CertifiedField::Both) => &[
            TranslatorLevel::Certified,
            TranslatorLevel::CertifiedLaw,
            TranslatorLevel::CertifiedHealth,
        ],
        Some(CertifiedField::Law) | Some(CertifiedField::NormalLaw) => {
            &[TranslatorLevel::CertifiedLaw]
        }
        Some(CertifiedField::Health) | Some(CertifiedField::NormalHealth) => {
            &[TranslatorLevel::CertifiedHealth]
        }
        Some(CertifiedField::Normal) => &[TranslatorLevel::Layman, TranslatorLevel::ReadCourses],
    }
}

/// Translator/job eligibility queries over a [`JobStore`]
#[derive(Clone)]
pub struct MatchingEngine {
    store: Arc<dyn JobStore>,
}

impl MatchingEngine {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Whether one translator may take one job.
    ///
    /// All clauses must hold: type match, certification intersection,
    /// gender, blacklist, language, town (physical jobs only), and
    /// the job still being `pending`. An unparseable certification
    /// label on the translator is a configuration error, not a
    /// silent mismatch.
    pub async fn is_eligible(&self, translator: &User, job: &Job) -> Result<bool> {
        let profile = translator.translator_profile()?;

        // 1. Payment category of the job vs. kind of translator
        if profile.translator_type.job_type() != job.job_type {
            return Ok(false);
        }

        // 2. Certification intersection
        let admitted = levels_for(job.certified);
        let mut holds_admitted = false;
        for label in &profile.levels {
            let level: TranslatorLevel = label.parse()?;
            if admitted.contains(&level) {
                holds_admitted = true;
                break;
            }
        }
        if !holds_admitted {
            return Ok(false);
        }

        // 3. Required gender
        if let Some(required) = job.gender {
            if profile.gender != Some(required) {
                return Ok(false);
            }
        }

        // 4. Customer's blacklist
        if self
            .store
            .is_blacklisted(job.customer_id, translator.id)
            .await?
        {
            return Ok(false);
        }

        // 5. Language
        if !profile.languages.iter().any(|l| l == &job.language) {
            return Ok(false);
        }

        // 6. Town-check: only when the customer requires presence and
        // will not accept phone delivery instead
        if job.physical_delivery && !job.phone_delivery {
            let job_town = match &job.town {
                Some(town) => Some(town.clone()),
                None => self.customer_town(job).await?,
            };
            match (job_town, &profile.town) {
                (Some(required), Some(town)) if &required == town => {}
                _ => return Ok(false),
            }
        }

        // 7. Still open
        Ok(job.status == JobStatus::Pending)
    }

    /// Pending jobs this translator may take, due date ascending
    #[instrument(skip(self, translator), fields(translator_id = %translator.id))]
    pub async fn find_eligible_jobs(&self, translator: &User) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for job in self.store.pending_jobs().await? {
            if self.is_eligible(translator, &job).await? {
                jobs.push(job);
            }
        }
        jobs.sort_by_key(|job| job.due);
        Ok(jobs)
    }

    /// Active translators who may take this job
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn find_eligible_translators(&self, job: &Job) -> Result<Vec<User>> {
        let mut eligible = Vec::new();
        for translator in self.store.active_translators(None).await? {
            if self.is_eligible(&translator, job).await? {
                eligible.push(translator);
            }
        }
        Ok(eligible)
    }

    async fn customer_town(&self, job: &Job) -> Result<Option<String>> {
        let customer = self.store.find_user(job.customer_id).await?;
        Ok(customer
            .and_then(|user| user.customer)
            .and_then(|profile| profile.town))
    }
}
