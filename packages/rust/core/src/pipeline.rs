//! One unit of work: target → resolve → discover → classify → reconcile →
//! commit. Errors stop at the unit boundary and become the unit's outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use buyergroup_classifier::RoleClassifier;
use buyergroup_discovery::{CompanyResolver, EmployeeDiscoverer};
use buyergroup_providers::{CompanyDataProvider, PeopleDataProvider, Throttled};
use buyergroup_shared::{AppConfig, CheckpointState, Company, CompanyTarget, Result, RetryPolicy};
use buyergroup_storage::{CommitSummary, Storage, UnitWrite};
use chrono::Utc;

use crate::reconcile::{ClassifiedEmployee, MatcherRegistry, ReconcilePlan, Reconciler};
use crate::report::{CompanyOutcome, RunReport};

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called once the batch is known. `already_done` units come from checkpoints.
    fn run_started(&self, run_id: &str, total: usize, already_done: usize);
    /// Called when a worker picks up a unit.
    fn unit_started(&self, unit_key: &str);
    /// Called after a unit's checkpoint is written.
    fn unit_finished(&self, outcome: &CompanyOutcome);
    /// Called when the run completes.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn run_started(&self, _run_id: &str, _total: usize, _already_done: usize) {}
    fn unit_started(&self, _unit_key: &str) {}
    fn unit_finished(&self, _outcome: &CompanyOutcome) {}
    fn done(&self, _report: &RunReport) {}
}

/// Components one worker needs to process a company end-to-end.
///
/// Different targets can resolve to the same company; their reconcile and
/// commit steps run one at a time per company id.
pub struct UnitPipeline {
    workspace_id: String,
    resolver: CompanyResolver,
    discoverer: EmployeeDiscoverer,
    classifier: RoleClassifier,
    reconciler: Reconciler,
    storage: Arc<Storage>,
    company_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UnitPipeline {
    pub fn new(
        workspace_id: impl Into<String>,
        resolver: CompanyResolver,
        discoverer: EmployeeDiscoverer,
        classifier: RoleClassifier,
        reconciler: Reconciler,
        storage: Arc<Storage>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            resolver,
            discoverer,
            classifier,
            reconciler,
            storage,
            company_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the pipeline from configuration. Each provider gets its own
    /// throttled pool.
    pub fn from_config(
        config: &AppConfig,
        company_provider: Arc<dyn CompanyDataProvider>,
        people_provider: Arc<dyn PeopleDataProvider>,
        storage: Arc<Storage>,
    ) -> Result<Self> {
        config.validate()?;
        let retry = RetryPolicy::from(&config.orchestrator.retry);

        let company_pool: Arc<dyn CompanyDataProvider> = Arc::new(Throttled::from_config(
            company_provider,
            &config.providers.company,
        ));
        let people_pool: Arc<dyn PeopleDataProvider> = Arc::new(Throttled::from_config(
            people_provider,
            &config.providers.people,
        ));

        Ok(Self::new(
            config.workspace.id.clone(),
            CompanyResolver::new(company_pool, retry.clone(), config.resolver.min_confidence),
            EmployeeDiscoverer::new(people_pool, retry, config.discovery.employer_similarity),
            RoleClassifier::new(&config.classifier)?,
            Reconciler::new(MatcherRegistry::default(), config.discovery.source.clone()),
            storage,
        ))
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Process one company. Never fails: errors become a `failed` or
    /// `skipped` outcome with the reason recorded.
    #[instrument(skip_all, fields(unit = %unit_key))]
    pub async fn run_unit(&self, unit_key: &str, target: &CompanyTarget) -> CompanyOutcome {
        let start = Instant::now();
        let mut outcome = CompanyOutcome::new(unit_key, target, CheckpointState::Pending);

        match self.process(target, &mut outcome).await {
            Ok(()) => {
                outcome.state = CheckpointState::Success;
                info!(
                    company_id = outcome.company_id.as_deref().unwrap_or_default(),
                    members = outcome.distribution.total(),
                    added = outcome.people_added,
                    updated = outcome.people_updated,
                    retries = outcome.usage.retries,
                    elapsed_ms = start.elapsed().as_millis(),
                    "unit succeeded"
                );
            }
            Err(e) if e.is_permanent() => {
                outcome.state = CheckpointState::Skipped;
                info!(reason = %e, "unit skipped");
                outcome.reason = Some(e.to_string());
            }
            Err(e) => {
                outcome.state = CheckpointState::Failed;
                warn!(error = %e, retries = outcome.usage.retries, "unit failed");
                outcome.reason = Some(e.to_string());
            }
        }
        outcome.retry_count = outcome.usage.retries;
        outcome
    }

    async fn process(&self, target: &CompanyTarget, outcome: &mut CompanyOutcome) -> Result<()> {
        // --- Resolve ---
        let company = self
            .resolver
            .resolve(&self.workspace_id, target, &mut outcome.usage)
            .await?;
        outcome.company_id = Some(company.id.clone());
        outcome.company_name = Some(company.name.clone());

        // --- Discover ---
        let mut stream = self.discoverer.discover(&company);
        let discovered = stream.collect_all().await;
        outcome.usage += stream.usage();
        outcome.rejected_profiles = stream.rejections().len();
        let discovered = discovered?;

        // --- Classify ---
        let classified: Vec<ClassifiedEmployee> = discovered
            .into_iter()
            .map(|employee| {
                let classification = self
                    .classifier
                    .classify(employee.title().unwrap_or_default(), employee.department());
                ClassifiedEmployee {
                    employee,
                    classification,
                }
            })
            .collect();

        // --- Reconcile + commit ---
        let lock = self.company_lock(&company.id).await;
        let _guard = lock.lock().await;

        let committed = RetryPolicy::persistence()
            .execute("reconcile unit", || self.reconcile(&company, &classified))
            .await;
        outcome.usage.retries += committed.retries;
        let (plan, summary) = committed.result?;

        outcome.people_added = plan.created;
        outcome.people_updated = plan.updated;
        outcome.people_deactivated = summary.deactivated;
        outcome.conflicts = plan.conflicts;
        outcome.distribution = plan.group.distribution;
        Ok(())
    }

    async fn company_lock(&self, company_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.company_locks.lock().await;
        locks.entry(company_id.to_string()).or_default().clone()
    }

    /// Load, plan and commit against fresh state. A retry re-plans instead
    /// of replaying a plan built on rows that may have changed.
    async fn reconcile(
        &self,
        company: &Company,
        classified: &[ClassifiedEmployee],
    ) -> Result<(ReconcilePlan, CommitSummary)> {
        let existing = self
            .storage
            .list_people(&self.workspace_id, &company.id)
            .await?;
        debug!(company_id = %company.id, existing = existing.len(), "reconciling");

        let plan = self
            .reconciler
            .plan(company, &existing, classified.to_vec(), Utc::now());
        let summary = self
            .storage
            .commit_unit(&UnitWrite {
                company,
                people: &plan.people,
                deactivate: &plan.deactivate,
                group: &plan.group,
            })
            .await?;
        Ok((plan, summary))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::Path;

    use buyergroup_providers::SnapshotProvider;
    use buyergroup_shared::BuyerGroupRole;
    use uuid::Uuid;

    pub(crate) async fn temp_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("bg_core_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open test db"))
    }

    pub(crate) fn snapshot() -> Arc<SnapshotProvider> {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures/snapshot/dataset.json");
        Arc::new(SnapshotProvider::load(&path, 3).expect("load snapshot fixture"))
    }

    pub(crate) fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.workspace.id = "ws".into();
        config.providers.company.min_interval_ms = 0;
        config.providers.people.min_interval_ms = 0;
        config.orchestrator.retry.initial_backoff_ms = 0;
        config.orchestrator.retry.max_backoff_ms = 0;
        config
    }

    pub(crate) async fn snapshot_pipeline(storage: Arc<Storage>) -> UnitPipeline {
        let provider = snapshot();
        UnitPipeline::from_config(&test_config(), provider.clone(), provider, storage)
            .expect("build pipeline")
    }

    #[tokio::test]
    async fn acme_unit_builds_buyer_group() {
        let storage = temp_storage().await;
        let pipeline = snapshot_pipeline(storage.clone()).await;

        let outcome = pipeline
            .run_unit("acme.io", &CompanyTarget::new(None, Some("https://www.acme.io")))
            .await;
        assert_eq!(outcome.state, CheckpointState::Success, "{:?}", outcome.reason);
        assert_eq!(outcome.company_id.as_deref(), Some("co-acme"));
        assert_eq!(outcome.people_added, 5);
        assert_eq!(outcome.rejected_profiles, 2);

        let group = storage
            .get_buyer_group("ws", "co-acme")
            .await
            .expect("read group")
            .expect("group stored");
        assert!(group.is_consistent());
        assert_eq!(group.total_members, 5);
        assert_eq!(group.members[0].role, BuyerGroupRole::DecisionMaker);
        assert_eq!(group.distribution.decision_makers, 2);
        // Former and moved employees never appear.
        let names: Vec<&str> = group.members.iter().map(|m| m.full_name.as_str()).collect();
        assert!(!names.contains(&"Sam Lee"));
        assert!(!names.contains(&"Chris Park"));
    }

    #[tokio::test]
    async fn second_pass_adds_no_people() {
        let storage = temp_storage().await;
        let pipeline = snapshot_pipeline(storage.clone()).await;
        let target = CompanyTarget::new(Some("Acme"), None);

        let first = pipeline.run_unit("acme", &target).await;
        let before = storage.get_buyer_group("ws", "co-acme").await.unwrap().unwrap();
        let second = pipeline.run_unit("acme", &target).await;
        let after = storage.get_buyer_group("ws", "co-acme").await.unwrap().unwrap();

        assert_eq!(first.state, CheckpointState::Success);
        assert_eq!(second.state, CheckpointState::Success);
        assert_eq!(second.people_added, 0);
        assert_eq!(second.people_updated, first.people_added);
        assert_eq!(storage.count_people("ws").await.unwrap(), 5);
        assert_eq!(before.members, after.members);
    }

    #[tokio::test]
    async fn company_without_employees_gets_empty_group() {
        let storage = temp_storage().await;
        let pipeline = snapshot_pipeline(storage.clone()).await;
        let outcome = pipeline
            .run_unit("hooli.example", &CompanyTarget::new(None, Some("hooli.example")))
            .await;
        assert_eq!(outcome.state, CheckpointState::Success);

        let group = storage
            .get_buyer_group("ws", "co-hooli")
            .await
            .unwrap()
            .expect("empty group stored");
        assert_eq!(group.total_members, 0);
        assert!(group.is_consistent());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn targets_resolving_to_one_company_commit_in_turn() {
        for _ in 0..5 {
            let storage = temp_storage().await;
            let pipeline = Arc::new(snapshot_pipeline(storage.clone()).await);

            let by_name = {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    pipeline
                        .run_unit("name:acme", &CompanyTarget::new(Some("Acme"), None))
                        .await
                })
            };
            let by_domain = {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    pipeline
                        .run_unit("acme.io", &CompanyTarget::new(None, Some("acme.io")))
                        .await
                })
            };
            let a = by_name.await.expect("join name unit");
            let b = by_domain.await.expect("join domain unit");

            assert_eq!(a.state, CheckpointState::Success, "{:?}", a.reason);
            assert_eq!(b.state, CheckpointState::Success, "{:?}", b.reason);
            // One unit creates, the other updates the same rows.
            assert_eq!(a.people_added + b.people_added, 5);
            assert_eq!(storage.count_people("ws").await.unwrap(), 5);
            let group = storage.get_buyer_group("ws", "co-acme").await.unwrap().unwrap();
            assert_eq!(group.total_members, 5);
        }
    }

    #[tokio::test]
    async fn unknown_company_is_skipped() {
        let storage = temp_storage().await;
        let pipeline = snapshot_pipeline(storage).await;
        let outcome = pipeline
            .run_unit("nowhere.example", &CompanyTarget::new(None, Some("nowhere.example")))
            .await;
        assert_eq!(outcome.state, CheckpointState::Skipped);
        assert!(outcome.reason.is_some());
    }

    #[tokio::test]
    async fn invalid_domain_is_skipped() {
        let storage = temp_storage().await;
        let pipeline = snapshot_pipeline(storage).await;
        let outcome = pipeline
            .run_unit("bad", &CompanyTarget::new(None, Some("not a domain")))
            .await;
        assert_eq!(outcome.state, CheckpointState::Skipped);
    }
}
