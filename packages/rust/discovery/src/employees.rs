//! Employee discovery: page through active-employee ids, collect each profile,
//! and re-validate current employment at the profile level.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use buyergroup_providers::{CollectedProfile, ExperienceEntry, PeopleDataProvider};
use buyergroup_shared::{BuyerGroupError, Company, Result, RetryPolicy};
use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::CallUsage;
use crate::employer::{EmployerMatcher, parse_start_date};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A profile that passed active-employment validation.
#[derive(Debug, Clone)]
pub struct DiscoveredEmployee {
    pub profile: CollectedProfile,
    /// The selected current position at the target company.
    pub position: ExperienceEntry,
}

impl DiscoveredEmployee {
    /// Title of the current position, falling back to the profile's first title.
    pub fn title(&self) -> Option<&str> {
        self.position
            .title
            .as_deref()
            .or_else(|| self.profile.titles.first().map(String::as_str))
            .filter(|t| !t.trim().is_empty())
    }

    pub fn department(&self) -> Option<&str> {
        self.position.department.as_deref()
    }
}

/// Why a profile was not yielded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// The profile has no work history at all.
    NoExperience,
    /// No experience entry is flagged active.
    NoActiveExperience,
    /// The most recent active position is at another employer.
    WrongEmployer { employer: String },
    /// The payload could not be used.
    Malformed { message: String },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoExperience => f.write_str("no experience history"),
            Self::NoActiveExperience => f.write_str("no active experience"),
            Self::WrongEmployer { employer } => write!(f, "currently employed at {employer:?}"),
            Self::Malformed { message } => write!(f, "malformed profile: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub profile_id: String,
    pub reason: RejectionReason,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Select the current position and confirm it is at the target company.
///
/// Among active entries the most recently started wins; undated entries sort
/// oldest and ties keep list order. An entry linked to a company id must match
/// `company.id`; unlinked entries fall back to a fuzzy name match.
pub fn validate_employment<'p>(
    profile: &'p CollectedProfile,
    company: &Company,
    matcher: &EmployerMatcher,
) -> std::result::Result<&'p ExperienceEntry, RejectionReason> {
    if profile.experience.is_empty() {
        return Err(RejectionReason::NoExperience);
    }

    let mut current: Option<(&ExperienceEntry, Option<NaiveDate>)> = None;
    for entry in profile.experience.iter().filter(|e| e.active) {
        let started = entry.start_date.as_deref().and_then(parse_start_date);
        match current {
            Some((_, best)) if started <= best => {}
            _ => current = Some((entry, started)),
        }
    }
    let (entry, _) = current.ok_or(RejectionReason::NoActiveExperience)?;

    let same_employer = match entry.company_id.as_deref() {
        Some(id) => id == company.id,
        None => matcher.matches(&entry.company, &company.name),
    };
    if same_employer {
        Ok(entry)
    } else {
        Err(RejectionReason::WrongEmployer {
            employer: entry.company.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// EmployeeDiscoverer
// ---------------------------------------------------------------------------

/// Retrieves the validated current employees of a company.
pub struct EmployeeDiscoverer {
    provider: Arc<dyn PeopleDataProvider>,
    retry: RetryPolicy,
    matcher: EmployerMatcher,
}

impl EmployeeDiscoverer {
    pub fn new(
        provider: Arc<dyn PeopleDataProvider>,
        retry: RetryPolicy,
        employer_similarity: f64,
    ) -> Self {
        Self {
            provider,
            retry,
            matcher: EmployerMatcher::new(employer_similarity),
        }
    }

    /// Start a lazy sequence over `company`'s current employees.
    pub fn discover<'a>(&'a self, company: &'a Company) -> EmployeeStream<'a> {
        EmployeeStream {
            discoverer: self,
            company,
            ids: Vec::new(),
            seen: HashSet::new(),
            cursor: None,
            exhausted: false,
            position: 0,
            usage: CallUsage::default(),
            rejections: Vec::new(),
        }
    }
}

/// Lazy, finite, restartable sequence of validated employees.
///
/// Search pages are fetched only when the buffered ids run out. A provider
/// error ends the sequence for this company and is returned to the caller.
pub struct EmployeeStream<'a> {
    discoverer: &'a EmployeeDiscoverer,
    company: &'a Company,
    /// Unique profile ids in first-seen order.
    ids: Vec<String>,
    seen: HashSet<String>,
    cursor: Option<String>,
    exhausted: bool,
    /// Index of the next id to collect.
    position: usize,
    usage: CallUsage,
    rejections: Vec<Rejection>,
}

impl EmployeeStream<'_> {
    /// Next validated employee, or `None` when the company is exhausted.
    pub async fn next(&mut self) -> Result<Option<DiscoveredEmployee>> {
        loop {
            if self.position >= self.ids.len() {
                if self.exhausted {
                    return Ok(None);
                }
                self.fetch_page().await?;
                continue;
            }

            let profile_id = self.ids[self.position].clone();
            self.position += 1;

            let profile = match self.collect(&profile_id).await {
                Ok(p) => p,
                Err(BuyerGroupError::MalformedProfile { message, .. }) => {
                    self.reject(&profile_id, RejectionReason::Malformed { message });
                    continue;
                }
                Err(e) => return Err(e),
            };

            if profile.full_name.trim().is_empty() {
                self.reject(
                    &profile_id,
                    RejectionReason::Malformed {
                        message: "empty full name".into(),
                    },
                );
                continue;
            }

            match validate_employment(&profile, self.company, &self.discoverer.matcher) {
                Ok(entry) => {
                    let position = entry.clone();
                    debug!(profile_id = %profile_id, "employee validated");
                    return Ok(Some(DiscoveredEmployee { profile, position }));
                }
                Err(reason) => self.reject(&profile_id, reason),
            }
        }
    }

    /// Rewind to the first id. Already-fetched id pages are reused; profiles
    /// are collected again.
    pub fn restart(&mut self) {
        self.position = 0;
        self.rejections.clear();
    }

    /// Drain the rest of the sequence.
    pub async fn collect_all(&mut self) -> Result<Vec<DiscoveredEmployee>> {
        let mut out = Vec::new();
        while let Some(employee) = self.next().await? {
            out.push(employee);
        }
        info!(
            company_id = %self.company.id,
            accepted = out.len(),
            rejected = self.rejections.len(),
            "employee discovery finished"
        );
        Ok(out)
    }

    /// Provider calls and retries so far.
    pub fn usage(&self) -> CallUsage {
        self.usage
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let provider = &self.discoverer.provider;
        let company_id = self.company.id.as_str();
        let cursor = self.cursor.clone();
        let outcome = self
            .discoverer
            .retry
            .execute("search_active_employees", || {
                provider.search_active_employees(company_id, cursor.as_deref())
            })
            .await;
        self.usage.retries += outcome.retries;
        self.usage.people_calls += outcome.attempts();
        let page = outcome.result?;

        let mut added = 0;
        for id in page.profile_ids {
            if self.seen.insert(id.clone()) {
                self.ids.push(id);
                added += 1;
            }
        }
        debug!(company_id, added, total = self.ids.len(), "employee page fetched");

        match page.next_cursor {
            Some(next) if Some(&next) == self.cursor.as_ref() => {
                warn!(company_id, cursor = %next, "provider repeated a cursor, stopping");
                self.exhausted = true;
            }
            Some(next) => self.cursor = Some(next),
            None => self.exhausted = true,
        }
        Ok(())
    }

    async fn collect(&mut self, profile_id: &str) -> Result<CollectedProfile> {
        let provider = &self.discoverer.provider;
        let outcome = self
            .discoverer
            .retry
            .execute("collect_profile", || provider.collect_profile(profile_id))
            .await;
        self.usage.retries += outcome.retries;
        self.usage.people_calls += outcome.attempts();
        outcome.result
    }

    fn reject(&mut self, profile_id: &str, reason: RejectionReason) {
        warn!(
            company_id = %self.company.id,
            profile_id,
            reason = %reason,
            "profile rejected"
        );
        self.rejections.push(Rejection {
            profile_id: profile_id.to_string(),
            reason,
        });
    }
}
