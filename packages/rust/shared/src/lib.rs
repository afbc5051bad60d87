//! Shared types, error model, configuration and retry policy for the
//! buyer-group workspace.
//!
//! This crate is the foundation depended on by all other buyergroup crates.
//! It provides:
//! - [`BuyerGroupError`]: the unified error type
//! - Domain types ([`Company`], [`Person`], [`BuyerGroup`], [`ProcessingCheckpoint`])
//! - Configuration ([`AppConfig`], config loading)
//! - [`RetryPolicy`]: bounded exponential backoff for provider calls

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CheckpointBackend, ClassifierConfig, ClassifierRule, DiscoveryConfig,
    OrchestratorConfig, ProviderConfig, ProvidersConfig, ResolverConfig, RetryConfig,
    WorkspaceConfig, config_dir, config_file_path, default_rules, expand_home, init_config,
    load_config, load_config_from, provider_api_key, render_config, validate_api_keys,
};
pub use error::{BuyerGroupError, Result};
pub use retry::{RetryOutcome, RetryPolicy};
pub use types::{
    BuyerGroup, BuyerGroupMember, BuyerGroupRole, CheckpointState, Classification, Company,
    CompanyTarget, EngagementPriority, InfluenceLevel, Person, ProcessingCheckpoint,
    RoleDistribution, SourceStamp, name_match_key, split_full_name,
};
