//! Offline provider backed by a JSON dataset. Implements both contracts; used
//! for dry runs and tests.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use buyergroup_shared::{BuyerGroupError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contract::{
    CollectedProfile, CompanyCandidate, CompanyDataProvider, PeopleDataProvider, SearchPage,
};

/// Relevance for an exact domain hit.
const DOMAIN_MATCH: f64 = 1.0;
/// Relevance for an exact (case-insensitive) name or alias hit.
const NAME_MATCH: f64 = 0.9;
/// Relevance when one name contains the other.
const PARTIAL_NAME_MATCH: f64 = 0.5;

/// A company row in the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCompany {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Other names the company is known by.
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// On-disk snapshot layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotDataset {
    #[serde(default)]
    pub companies: Vec<SnapshotCompany>,
    #[serde(default)]
    pub profiles: Vec<CollectedProfile>,
}

#[derive(Debug, Clone)]
pub struct SnapshotProvider {
    dataset: SnapshotDataset,
    profiles_by_id: HashMap<String, usize>,
    page_size: usize,
}

impl SnapshotProvider {
    pub fn new(dataset: SnapshotDataset, page_size: usize) -> Self {
        let profiles_by_id = dataset
            .profiles
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        Self {
            dataset,
            profiles_by_id,
            page_size: page_size.max(1),
        }
    }

    /// Load a dataset from a JSON file.
    pub fn load(path: &Path, page_size: usize) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BuyerGroupError::io(path, e))?;
        let dataset: SnapshotDataset = serde_json::from_str(&content).map_err(|e| {
            BuyerGroupError::config(format!("failed to parse snapshot {}: {e}", path.display()))
        })?;
        debug!(
            path = %path.display(),
            companies = dataset.companies.len(),
            profiles = dataset.profiles.len(),
            "loaded snapshot dataset"
        );
        Ok(Self::new(dataset, page_size))
    }

    fn relevance(company: &SnapshotCompany, name: Option<&str>, domain: Option<&str>) -> f64 {
        if let (Some(wanted), Some(have)) = (domain, company.domain.as_deref()) {
            if wanted.eq_ignore_ascii_case(have) {
                return DOMAIN_MATCH;
            }
        }
        let Some(wanted) = name.map(|n| n.trim().to_lowercase()).filter(|n| !n.is_empty()) else {
            return 0.0;
        };
        let names = std::iter::once(&company.name).chain(company.aliases.iter());
        let mut best: f64 = 0.0;
        for candidate in names {
            let candidate = candidate.to_lowercase();
            if candidate == wanted {
                return NAME_MATCH;
            }
            if candidate.contains(&wanted) || wanted.contains(&candidate) {
                best = best.max(PARTIAL_NAME_MATCH);
            }
        }
        best
    }

    fn employs(profile: &CollectedProfile, company_id: &str) -> bool {
        profile
            .experience
            .iter()
            .any(|e| e.active && e.company_id.as_deref() == Some(company_id))
    }
}

#[async_trait]
impl CompanyDataProvider for SnapshotProvider {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn resolve(
        &self,
        name: Option<&str>,
        domain: Option<&str>,
    ) -> Result<Vec<CompanyCandidate>> {
        let mut candidates: Vec<CompanyCandidate> = self
            .dataset
            .companies
            .iter()
            .filter_map(|c| {
                let relevance = Self::relevance(c, name, domain);
                (relevance > 0.0).then(|| CompanyCandidate {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    domain: c.domain.clone(),
                    industry: c.industry.clone(),
                    size: c.size.clone(),
                    location: c.location.clone(),
                    relevance,
                })
            })
            .collect();
        candidates.sort_by(|a, b| b.relevance.total_cmp(&a.relevance).then(a.id.cmp(&b.id)));
        Ok(candidates)
    }
}

#[async_trait]
impl PeopleDataProvider for SnapshotProvider {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn search_active_employees(
        &self,
        company_id: &str,
        cursor: Option<&str>,
    ) -> Result<SearchPage> {
        let offset = match cursor {
            Some(c) => c.parse::<usize>().map_err(|_| {
                BuyerGroupError::validation(format!("invalid snapshot cursor {c:?}"))
            })?,
            None => 0,
        };

        let mut ids: Vec<&str> = self
            .dataset
            .profiles
            .iter()
            .filter(|p| Self::employs(p, company_id))
            .map(|p| p.id.as_str())
            .collect();
        ids.sort_unstable();

        let end = (offset + self.page_size).min(ids.len());
        let profile_ids = ids
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let next_cursor = (end < ids.len()).then(|| end.to_string());

        Ok(SearchPage {
            profile_ids,
            next_cursor,
        })
    }

    async fn collect_profile(&self, profile_id: &str) -> Result<CollectedProfile> {
        self.profiles_by_id
            .get(profile_id)
            .and_then(|&i| self.dataset.profiles.get(i))
            .cloned()
            .ok_or_else(|| BuyerGroupError::malformed(profile_id, "profile not in snapshot"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(page_size: usize) -> SnapshotProvider {
        SnapshotProvider::load(
            Path::new("../../../fixtures/snapshot/dataset.json"),
            page_size,
        )
        .expect("load snapshot fixture")
    }

    #[tokio::test]
    async fn resolve_prefers_domain_hits() {
        let provider = fixture(10);
        let candidates = provider
            .resolve(Some("Acme"), Some("acme.io"))
            .await
            .expect("resolve");
        assert_eq!(candidates[0].id, "co-acme");
        assert_eq!(candidates[0].relevance, DOMAIN_MATCH);
    }

    #[tokio::test]
    async fn resolve_by_alias() {
        let provider = fixture(10);
        let candidates = provider
            .resolve(Some("Globex Corporation"), None)
            .await
            .expect("resolve");
        assert_eq!(candidates[0].id, "co-globex");
        assert_eq!(candidates[0].relevance, NAME_MATCH);
    }

    #[tokio::test]
    async fn resolve_unknown_is_empty() {
        let provider = fixture(10);
        let candidates = provider
            .resolve(Some("Nonexistent Widgets"), Some("nowhere.example"))
            .await
            .expect("resolve");
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn search_paginates_in_id_order() {
        let provider = fixture(2);
        let first = provider
            .search_active_employees("co-acme", None)
            .await
            .expect("page 1");
        assert_eq!(first.profile_ids.len(), 2);
        let cursor = first.next_cursor.clone().expect("more pages");

        let second = provider
            .search_active_employees("co-acme", Some(&cursor))
            .await
            .expect("page 2");
        assert!(first.profile_ids.iter().all(|id| !second.profile_ids.contains(id)));
        assert!(first.profile_ids[0] < first.profile_ids[1]);
    }

    #[tokio::test]
    async fn search_excludes_former_employees() {
        let provider = fixture(50);
        let page = provider
            .search_active_employees("co-acme", None)
            .await
            .expect("search");
        assert!(!page.profile_ids.contains(&"p-former".to_string()));
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn unknown_profile_is_malformed() {
        let provider = fixture(10);
        let err = provider.collect_profile("p-missing").await.unwrap_err();
        assert!(matches!(err, BuyerGroupError::MalformedProfile { .. }));
    }
}
