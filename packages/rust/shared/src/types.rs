//! Core domain types: companies, people, buyer groups, and checkpoints.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BuyerGroupError;

// ---------------------------------------------------------------------------
// CompanyTarget
// ---------------------------------------------------------------------------

/// One company to process, as supplied by the caller of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyTarget {
    /// Company display name as the caller knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Company website or bare domain, in any common spelling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl CompanyTarget {
    pub fn new(name: Option<&str>, domain: Option<&str>) -> Self {
        Self {
            name: name.map(String::from),
            domain: domain.map(String::from),
        }
    }

    /// Short label for logs and reports.
    pub fn label(&self) -> String {
        match (&self.name, &self.domain) {
            (Some(n), Some(d)) => format!("{n} ({d})"),
            (Some(n), None) => n.clone(),
            (None, Some(d)) => d.clone(),
            (None, None) => "<empty target>".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Company
// ---------------------------------------------------------------------------

/// Canonical company record, keyed by the provider's own identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    /// Canonical external id assigned by the company data provider.
    pub id: String,
    /// Owning workspace (tenant).
    pub workspace_id: String,
    /// Display name.
    pub name: String,
    /// Normalized domain (no scheme, no `www.`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// When the resolver last refreshed this record.
    pub resolved_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Classification enums
// ---------------------------------------------------------------------------

/// Purchasing-committee role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuyerGroupRole {
    DecisionMaker,
    Champion,
    Influencer,
    Stakeholder,
}

impl BuyerGroupRole {
    /// Storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecisionMaker => "decision_maker",
            Self::Champion => "champion",
            Self::Influencer => "influencer",
            Self::Stakeholder => "stakeholder",
        }
    }

    /// Influence follows directly from the role.
    pub fn influence_level(&self) -> InfluenceLevel {
        match self {
            Self::DecisionMaker | Self::Champion => InfluenceLevel::High,
            Self::Influencer => InfluenceLevel::Medium,
            Self::Stakeholder => InfluenceLevel::Low,
        }
    }
}

impl fmt::Display for BuyerGroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::DecisionMaker => "Decision Maker",
            Self::Champion => "Champion",
            Self::Influencer => "Influencer",
            Self::Stakeholder => "Stakeholder",
        };
        f.write_str(label)
    }
}

impl FromStr for BuyerGroupRole {
    type Err = BuyerGroupError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "decision_maker" => Ok(Self::DecisionMaker),
            "champion" => Ok(Self::Champion),
            "influencer" => Ok(Self::Influencer),
            "stakeholder" => Ok(Self::Stakeholder),
            other => Err(BuyerGroupError::validation(format!(
                "unknown buyer group role {other:?}"
            ))),
        }
    }
}

/// Coarse influence level derived from the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfluenceLevel {
    High,
    Medium,
    Low,
}

impl InfluenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl FromStr for InfluenceLevel {
    type Err = BuyerGroupError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(BuyerGroupError::validation(format!(
                "unknown influence level {other:?}"
            ))),
        }
    }
}

/// Outreach ordering for sales follow-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl EngagementPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl FromStr for EngagementPriority {
    type Err = BuyerGroupError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(BuyerGroupError::validation(format!(
                "unknown engagement priority {other:?}"
            ))),
        }
    }
}

/// Output of the role classifier for one title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub role: BuyerGroupRole,
    pub influence_level: InfluenceLevel,
    /// 0–100.
    pub decision_power: u8,
    pub engagement_priority: EngagementPriority,
    /// Name of the rule that fired, `None` for the fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
}

// ---------------------------------------------------------------------------
// Person
// ---------------------------------------------------------------------------

/// One provenance entry: which source enriched the record, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStamp {
    pub source: String,
    pub enriched_at: DateTime<Utc>,
}

/// A contact at a company, owned by a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    /// Local identifier (UUID v7). Immutable.
    pub id: String,
    pub workspace_id: String,
    /// Canonical id of the current employer.
    pub company_id: String,
    /// Identity-match key: the normalized full name at creation time.
    pub match_key: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub professional_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    /// The people provider's profile id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    pub role: BuyerGroupRole,
    pub influence_level: InfluenceLevel,
    pub decision_power: u8,
    pub engagement_priority: EngagementPriority,
    /// Whether the provider currently reports this person as employed at `company_id`.
    pub employment_active: bool,
    /// One stamp per distinct enrichment source.
    #[serde(default)]
    pub sources: Vec<SourceStamp>,
    pub last_enriched_at: DateTime<Utc>,
    /// Immutable.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Person {
    /// Generate a new time-sortable local identifier.
    pub fn new_id() -> String {
        Uuid::now_v7().to_string()
    }

    /// Append `source` to provenance, or refresh its timestamp if already present.
    pub fn record_source(&mut self, source: &str, at: DateTime<Utc>) {
        match self.sources.iter_mut().find(|s| s.source == source) {
            Some(stamp) => stamp.enriched_at = at,
            None => self.sources.push(SourceStamp {
                source: source.to_string(),
                enriched_at: at,
            }),
        }
        self.last_enriched_at = at;
    }

    /// Overwrite the classification-derived fields.
    pub fn apply_classification(&mut self, c: &Classification) {
        self.role = c.role;
        self.influence_level = c.influence_level;
        self.decision_power = c.decision_power;
        self.engagement_priority = c.engagement_priority;
    }
}

/// Normalize a full name into the identity-match key: lowercase, punctuation
/// dropped (except inner hyphens and apostrophes), whitespace collapsed.
pub fn name_match_key(full_name: &str) -> String {
    full_name
        .split_whitespace()
        .map(|token| {
            token
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '\'')
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a full name into `(first, last)` using the first and last tokens.
/// Single-token names have no last name.
pub fn split_full_name(full_name: &str) -> (Option<String>, Option<String>) {
    let tokens: Vec<&str> = full_name.split_whitespace().collect();
    match tokens.as_slice() {
        [] => (None, None),
        [only] => (Some((*only).to_string()), None),
        [first, .., last] => (Some((*first).to_string()), Some((*last).to_string())),
    }
}

// ---------------------------------------------------------------------------
// BuyerGroup
// ---------------------------------------------------------------------------

/// Count of members per role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDistribution {
    pub decision_makers: usize,
    pub champions: usize,
    pub influencers: usize,
    pub stakeholders: usize,
}

impl RoleDistribution {
    pub fn add(&mut self, role: BuyerGroupRole) {
        match role {
            BuyerGroupRole::DecisionMaker => self.decision_makers += 1,
            BuyerGroupRole::Champion => self.champions += 1,
            BuyerGroupRole::Influencer => self.influencers += 1,
            BuyerGroupRole::Stakeholder => self.stakeholders += 1,
        }
    }

    pub fn merge(&mut self, other: &RoleDistribution) {
        self.decision_makers += other.decision_makers;
        self.champions += other.champions;
        self.influencers += other.influencers;
        self.stakeholders += other.stakeholders;
    }

    pub fn total(&self) -> usize {
        self.decision_makers + self.champions + self.influencers + self.stakeholders
    }
}

/// One member of a buyer group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerGroupMember {
    pub person_id: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub role: BuyerGroupRole,
    pub decision_power: u8,
    pub engagement_priority: EngagementPriority,
}

impl From<&Person> for BuyerGroupMember {
    fn from(p: &Person) -> Self {
        Self {
            person_id: p.id.clone(),
            full_name: p.full_name.clone(),
            title: p.title.clone(),
            role: p.role,
            decision_power: p.decision_power,
            engagement_priority: p.engagement_priority,
        }
    }
}

/// The purchasing committee of one company, recomputed on every discovery run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyerGroup {
    pub workspace_id: String,
    pub company_id: String,
    /// Ordered by role, then decision power (desc), then name.
    pub members: Vec<BuyerGroupMember>,
    pub distribution: RoleDistribution,
    pub total_members: usize,
    pub computed_at: DateTime<Utc>,
}

impl BuyerGroup {
    /// Build a group from its members; distribution and total are derived here
    /// so they can never disagree.
    pub fn from_members(
        workspace_id: &str,
        company_id: &str,
        mut members: Vec<BuyerGroupMember>,
        computed_at: DateTime<Utc>,
    ) -> Self {
        members.sort_by(|a, b| {
            a.role
                .cmp(&b.role)
                .then(b.decision_power.cmp(&a.decision_power))
                .then(a.full_name.cmp(&b.full_name))
                .then(a.person_id.cmp(&b.person_id))
        });

        let mut distribution = RoleDistribution::default();
        for m in &members {
            distribution.add(m.role);
        }

        Self {
            workspace_id: workspace_id.to_string(),
            company_id: company_id.to_string(),
            total_members: members.len(),
            members,
            distribution,
            computed_at,
        }
    }

    /// `total_members` equals the sum of the role distribution and the member count.
    pub fn is_consistent(&self) -> bool {
        self.total_members == self.distribution.total() && self.total_members == self.members.len()
    }
}

// ---------------------------------------------------------------------------
// ProcessingCheckpoint
// ---------------------------------------------------------------------------

/// Persisted state of one company within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointState {
    Pending,
    Success,
    Failed,
    Skipped,
}

impl CheckpointState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for CheckpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointState {
    type Err = BuyerGroupError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(BuyerGroupError::validation(format!(
                "unknown checkpoint state {other:?}"
            ))),
        }
    }
}

/// One row per company per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingCheckpoint {
    pub run_id: String,
    /// Stable key of the company target within the run.
    pub unit_key: String,
    pub state: CheckpointState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub retry_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingCheckpoint {
    pub fn pending(run_id: &str, unit_key: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            unit_key: unit_key.to_string(),
            state: CheckpointState::Pending,
            reason: None,
            retry_count: 0,
            updated_at: Utc::now(),
        }
    }

    /// Same outcome, ignoring the timestamp. Used for idempotent writes.
    pub fn same_outcome(&self, other: &ProcessingCheckpoint) -> bool {
        self.state == other.state
            && self.reason == other.reason
            && self.retry_count == other.retry_count
    }
}
