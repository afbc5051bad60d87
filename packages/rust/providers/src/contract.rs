//! Provider contracts consumed by discovery.
//!
//! Both contracts may fail with `ProviderRateLimited` or `ProviderUnavailable`;
//! callers treat those as transient.

use std::sync::Arc;

use async_trait::async_trait;
use buyergroup_shared::Result;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Company data
// ---------------------------------------------------------------------------

/// One possible match returned by a company lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyCandidate {
    /// Provider's canonical company id.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Provider-reported match relevance in [0, 1].
    #[serde(default)]
    pub relevance: f64,
}

#[async_trait]
pub trait CompanyDataProvider: Send + Sync {
    /// Short label used in errors, logs, and usage accounting.
    fn name(&self) -> &str;

    /// Look up candidates for a company. An empty list means not found.
    async fn resolve(
        &self,
        name: Option<&str>,
        domain: Option<&str>,
    ) -> Result<Vec<CompanyCandidate>>;
}

// ---------------------------------------------------------------------------
// People data
// ---------------------------------------------------------------------------

/// One page of employee ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub profile_ids: Vec<String>,
    /// Cursor for the next page; `None` on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// One work-history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceEntry {
    /// Employer display name.
    pub company: String,
    /// Employer's canonical id, when the provider links it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    /// Provider flags the position as current.
    #[serde(default)]
    pub active: bool,
    /// Free-form start date (`2021-03-01`, `2021-03`, `Mar 2021`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEmails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub professional: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal: Option<String>,
}

/// Full profile as collected from the people provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedProfile {
    /// Provider's profile id.
    pub id: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Current titles, most relevant first.
    #[serde(default)]
    pub titles: Vec<String>,
    #[serde(default)]
    pub experience: Vec<ExperienceEntry>,
    #[serde(default)]
    pub emails: ProfileEmails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[async_trait]
pub trait PeopleDataProvider: Send + Sync {
    /// Short label used in errors, logs, and usage accounting.
    fn name(&self) -> &str;

    /// Ids of people currently employed at `company_id`, one page at a time.
    async fn search_active_employees(
        &self,
        company_id: &str,
        cursor: Option<&str>,
    ) -> Result<SearchPage>;

    /// Full profile for one id. Unusable payloads are `MalformedProfile`.
    async fn collect_profile(&self, profile_id: &str) -> Result<CollectedProfile>;
}

// ---------------------------------------------------------------------------
// Shared-ownership forwarding
// ---------------------------------------------------------------------------

#[async_trait]
impl<T: CompanyDataProvider + ?Sized> CompanyDataProvider for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn resolve(
        &self,
        name: Option<&str>,
        domain: Option<&str>,
    ) -> Result<Vec<CompanyCandidate>> {
        (**self).resolve(name, domain).await
    }
}

#[async_trait]
impl<T: PeopleDataProvider + ?Sized> PeopleDataProvider for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn search_active_employees(
        &self,
        company_id: &str,
        cursor: Option<&str>,
    ) -> Result<SearchPage> {
        (**self).search_active_employees(company_id, cursor).await
    }

    async fn collect_profile(&self, profile_id: &str) -> Result<CollectedProfile> {
        (**self).collect_profile(profile_id).await
    }
}
