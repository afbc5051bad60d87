//! Core pipeline orchestration and domain logic for buyer-group discovery.
//!
//! This crate ties together company resolution, employee discovery, role
//! classification, reconciliation and persistence into resumable batch runs
//! (e.g., [`Orchestrator::run`]).

pub mod orchestrator;
pub mod pipeline;
pub mod reconcile;
pub mod report;

pub use orchestrator::{Orchestrator, RunOptions, derive_run_id, unit_key};
pub use pipeline::{ProgressReporter, SilentProgress, UnitPipeline};
pub use reconcile::{
    ClassifiedEmployee, CompositeName, ExactEmail, ExactName, Identity, MatchHit, MatchStrategy,
    MatcherRegistry, ReconcilePlan, Reconciler,
};
pub use report::{CompanyOutcome, CreditRates, CreditUsage, RunReport, RunTotals};
