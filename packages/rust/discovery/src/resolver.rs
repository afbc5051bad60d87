//! Company resolution: normalize the target, query the company provider, pick
//! the best candidate above the confidence floor.

use std::sync::Arc;

use buyergroup_providers::{CompanyCandidate, CompanyDataProvider};
use buyergroup_shared::{BuyerGroupError, Company, CompanyTarget, Result, RetryPolicy};
use chrono::Utc;
use tracing::{debug, info, instrument};
use url::Url;

use crate::CallUsage;

/// Normalize a domain or website URL to a bare lowercase host.
///
/// Strips scheme, `www.`, port, path, query and trailing dots. Input without a
/// usable host name is `InvalidDomain`.
pub fn normalize_domain(input: &str) -> Result<String> {
    let invalid = || BuyerGroupError::InvalidDomain {
        input: input.to_string(),
    };

    let trimmed = input.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err(invalid());
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed
    } else {
        format!("http://{trimmed}")
    };

    let url = Url::parse(&with_scheme).map_err(|_| invalid())?;
    let host = url.host_str().ok_or_else(invalid)?;
    let host = host.trim_end_matches('.');
    let host = host.strip_prefix("www.").unwrap_or(host);

    let valid_label = |label: &str| {
        !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };
    if !host.contains('.') || !host.split('.').all(valid_label) {
        return Err(invalid());
    }
    Ok(host.to_string())
}

/// Resolves a [`CompanyTarget`] to a canonical [`Company`].
///
/// The returned record carries a fresh `resolved_at`; the caller persists it
/// inside the unit's transaction.
pub struct CompanyResolver {
    provider: Arc<dyn CompanyDataProvider>,
    retry: RetryPolicy,
    min_confidence: f64,
}

impl CompanyResolver {
    pub fn new(
        provider: Arc<dyn CompanyDataProvider>,
        retry: RetryPolicy,
        min_confidence: f64,
    ) -> Self {
        Self {
            provider,
            retry,
            min_confidence,
        }
    }

    #[instrument(skip_all, fields(target = %target.label()))]
    pub async fn resolve(
        &self,
        workspace_id: &str,
        target: &CompanyTarget,
        usage: &mut CallUsage,
    ) -> Result<Company> {
        let name = target
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let domain = match target.domain.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Some(normalize_domain(raw)?),
            _ => None,
        };
        if name.is_none() && domain.is_none() {
            return Err(BuyerGroupError::InvalidDomain {
                input: target.label(),
            });
        }

        let provider = &self.provider;
        let outcome = self
            .retry
            .execute("resolve", || provider.resolve(name, domain.as_deref()))
            .await;
        usage.retries += outcome.retries;
        usage.company_calls += outcome.attempts();
        let candidates = outcome.result?;

        debug!(candidates = candidates.len(), "company candidates received");

        let best = select_candidate(&candidates, domain.as_deref(), self.min_confidence)
            .ok_or_else(|| BuyerGroupError::not_found(format!("company {}", target.label())))?;

        info!(company_id = %best.id, relevance = best.relevance, "company resolved");

        let resolved_domain = best
            .domain
            .as_deref()
            .and_then(|d| normalize_domain(d).ok())
            .or(domain);

        Ok(Company {
            id: best.id.clone(),
            workspace_id: workspace_id.to_string(),
            name: best.name.clone(),
            domain: resolved_domain,
            industry: best.industry.clone(),
            size: best.size.clone(),
            location: best.location.clone(),
            resolved_at: Utc::now(),
        })
    }
}

/// Highest relevance at or above `min_confidence`. Ties prefer an exact domain
/// hit, then the smallest id.
pub fn select_candidate<'a>(
    candidates: &'a [CompanyCandidate],
    domain: Option<&str>,
    min_confidence: f64,
) -> Option<&'a CompanyCandidate> {
    let domain_hit = |c: &CompanyCandidate| {
        matches!(
            (domain, c.domain.as_deref().and_then(|d| normalize_domain(d).ok())),
            (Some(want), Some(have)) if want == have
        )
    };

    candidates
        .iter()
        .filter(|c| c.relevance >= min_confidence)
        .min_by(|a, b| {
            b.relevance
                .total_cmp(&a.relevance)
                .then_with(|| domain_hit(b).cmp(&domain_hit(a)))
                .then_with(|| a.id.cmp(&b.id))
        })
}
