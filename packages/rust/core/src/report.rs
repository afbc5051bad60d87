//! Machine-readable run report.

use std::collections::HashMap;

use buyergroup_discovery::CallUsage;
use buyergroup_shared::{
    BuyerGroupError, CheckpointState, CompanyTarget, ProviderConfig, Result, RoleDistribution,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result record of one company within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyOutcome {
    pub unit_key: String,
    pub target: CompanyTarget,
    pub state: CheckpointState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    pub people_added: usize,
    pub people_updated: usize,
    pub people_deactivated: usize,
    pub rejected_profiles: usize,
    pub conflicts: usize,
    pub distribution: RoleDistribution,
    pub usage: CallUsage,
    /// Terminal before this invocation started; counters come from the
    /// earlier report when one exists.
    #[serde(default)]
    pub from_checkpoint: bool,
}

impl CompanyOutcome {
    /// Outcome with zeroed counters.
    pub fn new(unit_key: &str, target: &CompanyTarget, state: CheckpointState) -> Self {
        Self {
            unit_key: unit_key.to_string(),
            target: target.clone(),
            state,
            reason: None,
            retry_count: 0,
            company_id: None,
            company_name: None,
            people_added: 0,
            people_updated: 0,
            people_deactivated: 0,
            rejected_profiles: 0,
            conflicts: 0,
            distribution: RoleDistribution::default(),
            usage: CallUsage::default(),
            from_checkpoint: false,
        }
    }
}

/// Per-call credit price of each provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreditRates {
    pub company: f64,
    pub people: f64,
}

impl CreditRates {
    pub fn from_config(company: &ProviderConfig, people: &ProviderConfig) -> Self {
        Self {
            company: company.credits_per_call,
            people: people.credits_per_call,
        }
    }
}

impl Default for CreditRates {
    fn default() -> Self {
        Self {
            company: 1.0,
            people: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditUsage {
    pub company: f64,
    pub people: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub companies: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Not dispatched because the run was cancelled.
    pub pending: usize,
    pub from_checkpoint: usize,
    pub people_added: usize,
    pub people_updated: usize,
    pub people_deactivated: usize,
    pub rejected_profiles: usize,
    pub conflicts: usize,
}

/// Summary of one invocation of a run. Lists every company of the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub workspace_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub totals: RunTotals,
    pub usage: CallUsage,
    pub credits: CreditUsage,
    pub distribution: RoleDistribution,
    pub companies: Vec<CompanyOutcome>,
}

impl RunReport {
    /// Reduce per-company outcomes into totals.
    pub fn build(
        run_id: &str,
        workspace_id: &str,
        started_at: DateTime<Utc>,
        cancelled: bool,
        companies: Vec<CompanyOutcome>,
        rates: CreditRates,
    ) -> Self {
        let mut totals = RunTotals {
            companies: companies.len(),
            ..RunTotals::default()
        };
        let mut usage = CallUsage::default();
        let mut distribution = RoleDistribution::default();

        for c in &companies {
            match c.state {
                CheckpointState::Success => totals.success += 1,
                CheckpointState::Failed => totals.failed += 1,
                CheckpointState::Skipped => totals.skipped += 1,
                CheckpointState::Pending => totals.pending += 1,
            }
            if c.from_checkpoint {
                totals.from_checkpoint += 1;
            }
            totals.people_added += c.people_added;
            totals.people_updated += c.people_updated;
            totals.people_deactivated += c.people_deactivated;
            totals.rejected_profiles += c.rejected_profiles;
            totals.conflicts += c.conflicts;
            usage += c.usage;
            distribution.merge(&c.distribution);
        }

        let company = f64::from(usage.company_calls) * rates.company;
        let people = f64::from(usage.people_calls) * rates.people;

        Self {
            run_id: run_id.to_string(),
            workspace_id: workspace_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            cancelled,
            totals,
            usage,
            credits: CreditUsage {
                company,
                people,
                total: company + people,
            },
            distribution,
            companies,
        }
    }

    /// Outcomes keyed by unit, for resuming a run.
    pub fn outcomes_by_key(&self) -> HashMap<&str, &CompanyOutcome> {
        self.companies
            .iter()
            .map(|c| (c.unit_key.as_str(), c))
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BuyerGroupError::validation(format!("encode run report: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| BuyerGroupError::validation(format!("decode run report: {e}")))
    }
}
