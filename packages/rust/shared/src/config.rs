//! Application configuration for the buyer-group core.
//!
//! User config lives at `~/.buyergroup/buyergroup.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BuyerGroupError, Result};
use crate::types::BuyerGroupRole;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "buyergroup.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".buyergroup";

// ---------------------------------------------------------------------------
// Config structs (matching buyergroup.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Tenant and database location.
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// External data providers.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Batch scheduling, retries, checkpoints.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Role classification rule table.
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

/// `[workspace]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Tenant id every record is scoped to.
    #[serde(default = "default_workspace_id")]
    pub id: String,

    /// libSQL database file. `~` expands to the home directory.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            id: default_workspace_id(),
            database_path: default_database_path(),
        }
    }
}

fn default_workspace_id() -> String {
    "default".into()
}
fn default_database_path() -> String {
    "~/.buyergroup/buyergroup.db".into()
}

/// `[providers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Company resolution provider.
    #[serde(default = "ProviderConfig::company_defaults")]
    pub company: ProviderConfig,

    /// Employee search and profile collection provider.
    #[serde(default = "ProviderConfig::people_defaults")]
    pub people: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            company: ProviderConfig::company_defaults(),
            people: ProviderConfig::people_defaults(),
        }
    }
}

/// `[providers.company]` / `[providers.people]` sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API base URL. Required unless the snapshot provider is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Maximum in-flight calls to this provider.
    #[serde(default = "default_provider_concurrency")]
    pub concurrency: u32,

    /// Minimum ms between two calls to this provider.
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,

    /// Credits billed per call, for the run report.
    #[serde(default = "default_credits_per_call")]
    pub credits_per_call: f64,

    /// Page size for paginated endpoints.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: default_api_key_env(),
            concurrency: default_provider_concurrency(),
            min_interval_ms: default_min_interval(),
            credits_per_call: default_credits_per_call(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    fn company_defaults() -> Self {
        Self {
            api_key_env: "BUYERGROUP_COMPANY_API_KEY".into(),
            concurrency: 2,
            ..Self::default()
        }
    }

    fn people_defaults() -> Self {
        Self {
            api_key_env: "BUYERGROUP_PEOPLE_API_KEY".into(),
            ..Self::default()
        }
    }
}

fn default_api_key_env() -> String {
    "BUYERGROUP_API_KEY".into()
}
fn default_provider_concurrency() -> u32 {
    4
}
fn default_min_interval() -> u64 {
    100
}
fn default_credits_per_call() -> f64 {
    1.0
}
fn default_page_size() -> u32 {
    100
}
fn default_timeout_secs() -> u64 {
    30
}

/// Where checkpoints are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// `checkpoints` table in the workspace database.
    #[default]
    Database,
    /// One JSON file per run under `checkpoint_dir`.
    File,
    /// Process-local; nothing survives a restart.
    Memory,
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Companies processed in parallel.
    #[serde(default = "default_unit_concurrency")]
    pub concurrency: u32,

    #[serde(default)]
    pub checkpoint_backend: CheckpointBackend,

    /// Directory for the `file` backend. Defaults to `~/.buyergroup/checkpoints`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_dir: Option<String>,

    /// Retry policy for provider calls.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_unit_concurrency(),
            checkpoint_backend: CheckpointBackend::default(),
            checkpoint_dir: None,
            retry: RetryConfig::default(),
        }
    }
}

fn default_unit_concurrency() -> u32 {
    4
}

/// `[orchestrator.retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Backoff growth factor between attempts.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    2.0
}

/// `[resolver]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Candidates below this relevance are never selected.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_min_confidence() -> f64 {
    0.6
}

/// `[discovery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Minimum normalized-Levenshtein similarity for a fuzzy employer match.
    #[serde(default = "default_employer_similarity")]
    pub employer_similarity: f64,

    /// Provenance label stamped on enriched people.
    #[serde(default = "default_source_label")]
    pub source: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            employer_similarity: default_employer_similarity(),
            source: default_source_label(),
        }
    }
}

fn default_employer_similarity() -> f64 {
    0.8
}
fn default_source_label() -> String {
    "people-provider".into()
}

/// `[classifier]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Role assigned when no rule matches.
    #[serde(default = "default_fallback_role")]
    pub default_role: BuyerGroupRole,

    #[serde(default = "default_fallback_power")]
    pub default_decision_power: u8,

    /// Ordered rule table, first match wins.
    #[serde(default = "default_rules")]
    pub rules: Vec<ClassifierRule>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            default_role: default_fallback_role(),
            default_decision_power: default_fallback_power(),
            rules: default_rules(),
        }
    }
}

fn default_fallback_role() -> BuyerGroupRole {
    BuyerGroupRole::Stakeholder
}
fn default_fallback_power() -> u8 {
    40
}

/// `[[classifier.rules]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierRule {
    pub name: String,
    pub role: BuyerGroupRole,
    /// 0–100.
    pub decision_power: u8,
    /// Title must contain at least one of these (word-bounded, case-insensitive).
    pub keywords: Vec<String>,
    /// If non-empty, title or department must also contain one of these.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    /// Any hit in the title vetoes the rule.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl ClassifierRule {
    fn new(name: &str, role: BuyerGroupRole, decision_power: u8, keywords: &[&str]) -> Self {
        Self {
            name: name.into(),
            role,
            decision_power,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            requires: Vec::new(),
            exclude: Vec::new(),
        }
    }

    fn requiring(mut self, words: &[&str]) -> Self {
        self.requires = words.iter().map(|k| k.to_string()).collect();
        self
    }

    fn excluding(mut self, words: &[&str]) -> Self {
        self.exclude = words.iter().map(|k| k.to_string()).collect();
        self
    }
}

/// Built-in rule table.
pub fn default_rules() -> Vec<ClassifierRule> {
    use BuyerGroupRole::*;
    vec![
        ClassifierRule::new("chief-executive", DecisionMaker, 95, &["chief executive", "ceo"]),
        ClassifierRule::new(
            "president-owner",
            DecisionMaker,
            90,
            &["president", "owner", "founder", "co-founder", "cofounder"],
        )
        // A product owner is a delivery role, not a business owner.
        .excluding(&["vice president", "vice-president", "product owner"]),
        ClassifierRule::new(
            "operational-c-level",
            DecisionMaker,
            88,
            &[
                "coo",
                "cfo",
                "cpo",
                "chief operating officer",
                "chief financial officer",
                "chief procurement officer",
                "chief purchasing officer",
            ],
        ),
        ClassifierRule::new("chief-operational", DecisionMaker, 88, &["chief", "cxo"])
            .requiring(&["procurement", "purchasing", "operations", "operating"])
            .excluding(&["chief of staff"]),
        ClassifierRule::new(
            "vice-president",
            DecisionMaker,
            90,
            &["vice president", "vice-president", "vp", "svp", "evp"],
        ),
        ClassifierRule::new("director", DecisionMaker, 85, &["director", "head of"]),
        ClassifierRule::new("chief-technology", Champion, 75, &["chief technology", "cto"]),
        ClassifierRule::new(
            "delivery-lead",
            Champion,
            70,
            &["engineering manager", "project manager", "team lead", "tech lead"],
        ),
        ClassifierRule::new("technical-manager", Champion, 65, &["manager"]).requiring(&[
            "it",
            "technical",
            "technology",
            "engineering",
            "software",
            "systems",
            "infrastructure",
            "data",
            "security",
        ]),
        ClassifierRule::new("expert", Influencer, 60, &["architect", "expert"]),
        ClassifierRule::new(
            "senior-individual",
            Influencer,
            55,
            &["senior", "sr", "specialist", "consultant"],
        ),
    ]
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Reject settings that would make a run meaningless. Fatal before any unit starts.
    pub fn validate(&self) -> Result<()> {
        if self.workspace.id.trim().is_empty() {
            return Err(BuyerGroupError::config("workspace.id must not be empty"));
        }
        for (name, provider) in [
            ("company", &self.providers.company),
            ("people", &self.providers.people),
        ] {
            if provider.concurrency == 0 {
                return Err(BuyerGroupError::config(format!(
                    "providers.{name}.concurrency must be > 0"
                )));
            }
            if provider.page_size == 0 {
                return Err(BuyerGroupError::config(format!(
                    "providers.{name}.page_size must be > 0"
                )));
            }
            if provider.credits_per_call < 0.0 {
                return Err(BuyerGroupError::config(format!(
                    "providers.{name}.credits_per_call must not be negative"
                )));
            }
        }
        if self.orchestrator.concurrency == 0 {
            return Err(BuyerGroupError::config(
                "orchestrator.concurrency must be > 0",
            ));
        }
        let retry = &self.orchestrator.retry;
        if retry.max_attempts == 0 {
            return Err(BuyerGroupError::config(
                "orchestrator.retry.max_attempts must be > 0",
            ));
        }
        if retry.multiplier < 1.0 {
            return Err(BuyerGroupError::config(
                "orchestrator.retry.multiplier must be >= 1.0",
            ));
        }
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            return Err(BuyerGroupError::config(
                "orchestrator.retry.initial_backoff_ms must not exceed max_backoff_ms",
            ));
        }
        check_unit_interval("resolver.min_confidence", self.resolver.min_confidence)?;
        check_unit_interval(
            "discovery.employer_similarity",
            self.discovery.employer_similarity,
        )?;
        if self.classifier.default_decision_power > 100 {
            return Err(BuyerGroupError::config(
                "classifier.default_decision_power must be <= 100",
            ));
        }
        Ok(())
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(BuyerGroupError::config(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.buyergroup/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BuyerGroupError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.buyergroup/buyergroup.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| BuyerGroupError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BuyerGroupError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| BuyerGroupError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BuyerGroupError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = render_config(&AppConfig::default())?;

    std::fs::write(&path, content).map_err(|e| BuyerGroupError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Serialize a config back to TOML.
pub fn render_config(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| BuyerGroupError::config(e.to_string()))
}

/// Read a provider's API key from the env var its config names.
pub fn provider_api_key(name: &str, provider: &ProviderConfig) -> Result<String> {
    let var_name = &provider.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(BuyerGroupError::config(format!(
            "{name} provider API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check both provider keys are present. Fails the run before any unit starts.
pub fn validate_api_keys(config: &AppConfig) -> Result<()> {
    provider_api_key("company", &config.providers.company)?;
    provider_api_key("people", &config.providers.people)?;
    Ok(())
}
