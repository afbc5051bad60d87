//! Batch orchestration: a bounded pool of workers drains a queue of company
//! units, checkpointing each terminal outcome before taking the next unit.
//!
//! Restarting the same batch (same run id) skips every unit already terminal.
//! Cancellation stops dispatch only; in-flight units finish and checkpoint.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use buyergroup_discovery::normalize_domain;
use buyergroup_shared::{
    AppConfig, BuyerGroupError, CheckpointState, CompanyTarget, ProcessingCheckpoint, Result,
    RetryPolicy, name_match_key,
};
use buyergroup_storage::CheckpointStore;
use chrono::Utc;

use crate::pipeline::{ProgressReporter, UnitPipeline};
use crate::report::{CompanyOutcome, CreditRates, RunReport};

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Explicit run id; derived from the batch when absent.
    pub run_id: Option<String>,
    /// Put `failed` units back in the queue.
    pub retry_failed: bool,
}

/// Stable checkpoint key of a target: its normalized domain, else its
/// normalized name.
pub fn unit_key(target: &CompanyTarget) -> String {
    if let Some(Ok(normalized)) = target.domain.as_deref().map(normalize_domain) {
        return normalized;
    }
    if let Some(name) = target.name.as_deref() {
        let key = name_match_key(name);
        if !key.is_empty() {
            return format!("name:{key}");
        }
    }
    match target.domain.as_deref().map(|d| d.trim().to_lowercase()) {
        Some(d) if !d.is_empty() => format!("invalid:{d}"),
        _ => "invalid:<empty>".to_string(),
    }
}

/// Run id from the workspace and the batch's unit keys, independent of order.
pub fn derive_run_id(workspace_id: &str, unit_keys: &[String]) -> String {
    let mut keys: Vec<&str> = unit_keys.iter().map(String::as_str).collect();
    keys.sort_unstable();
    keys.dedup();

    let mut hasher = Sha256::new();
    hasher.update(workspace_id.as_bytes());
    for key in keys {
        hasher.update(b"\n");
        hasher.update(key.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("run-{}", &digest[..16])
}

struct Unit {
    index: usize,
    key: String,
    target: CompanyTarget,
}

/// Drives [`UnitPipeline`] over a batch of companies.
pub struct Orchestrator {
    pipeline: Arc<UnitPipeline>,
    checkpoints: Arc<dyn CheckpointStore>,
    concurrency: usize,
    rates: CreditRates,
}

impl Orchestrator {
    pub fn new(
        pipeline: Arc<UnitPipeline>,
        checkpoints: Arc<dyn CheckpointStore>,
        concurrency: usize,
        rates: CreditRates,
    ) -> Result<Self> {
        if concurrency == 0 {
            return Err(BuyerGroupError::config("orchestrator concurrency must be > 0"));
        }
        Ok(Self {
            pipeline,
            checkpoints,
            concurrency,
            rates,
        })
    }

    pub fn from_config(
        config: &AppConfig,
        pipeline: Arc<UnitPipeline>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        Self::new(
            pipeline,
            checkpoints,
            config.orchestrator.concurrency as usize,
            CreditRates::from_config(&config.providers.company, &config.providers.people),
        )
    }

    /// Process `targets`, resuming any earlier invocation with the same run id.
    ///
    /// Fails only when the checkpoint store cannot be read or seeded; every
    /// per-company problem is reported in the returned [`RunReport`].
    #[instrument(skip_all, fields(targets = targets.len()))]
    pub async fn run(
        &self,
        targets: &[CompanyTarget],
        options: &RunOptions,
        progress: Arc<dyn ProgressReporter>,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let workspace_id = self.pipeline.workspace_id().to_string();

        // --- Plan units ---
        let mut seen = HashSet::new();
        let mut units: Vec<Unit> = Vec::new();
        for target in targets {
            let key = unit_key(target);
            if !seen.insert(key.clone()) {
                warn!(unit = %key, target = %target.label(), "duplicate target ignored");
                continue;
            }
            units.push(Unit {
                index: units.len(),
                key,
                target: target.clone(),
            });
        }
        let keys: Vec<String> = units.iter().map(|u| u.key.clone()).collect();
        let labels: Vec<(String, CompanyTarget)> = units
            .iter()
            .map(|u| (u.key.clone(), u.target.clone()))
            .collect();
        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| derive_run_id(&workspace_id, &keys));

        // --- Checkpoints ---
        if options.retry_failed {
            let reset = self.checkpoints.reset_failed(&run_id).await?;
            info!(%run_id, reset, "failed units re-queued");
        }
        self.checkpoints.seed_pending(&run_id, &keys).await?;
        let states: HashMap<String, ProcessingCheckpoint> = self
            .checkpoints
            .load(&run_id)
            .await?
            .into_iter()
            .map(|cp| (cp.unit_key.clone(), cp))
            .collect();
        let previous = self.previous_report(&run_id).await;
        let previous_outcomes = previous
            .as_ref()
            .map(|r| r.outcomes_by_key())
            .unwrap_or_default();

        let mut outcomes: Vec<Option<CompanyOutcome>> = vec![None; units.len()];
        let mut queue = VecDeque::new();
        for unit in units {
            match states.get(&unit.key) {
                Some(cp) if cp.state.is_terminal() => {
                    let mut outcome = match previous_outcomes.get(unit.key.as_str()) {
                        Some(prev) if prev.state == cp.state => (*prev).clone(),
                        _ => {
                            let mut o = CompanyOutcome::new(&unit.key, &unit.target, cp.state);
                            o.reason = cp.reason.clone();
                            o.retry_count = cp.retry_count;
                            o
                        }
                    };
                    outcome.from_checkpoint = true;
                    outcomes[unit.index] = Some(outcome);
                }
                _ => queue.push_back(unit),
            }
        }

        let already_done = outcomes.iter().filter(|o| o.is_some()).count();
        info!(
            %run_id,
            units = outcomes.len(),
            already_done,
            queued = queue.len(),
            concurrency = self.concurrency,
            "starting run"
        );
        progress.run_started(&run_id, outcomes.len(), already_done);

        // --- Workers ---
        let worker_count = self.concurrency.min(queue.len());
        let queue = Arc::new(Mutex::new(queue));
        let mut handles = Vec::new();
        for _ in 0..worker_count {
            let worker = Worker {
                run_id: run_id.clone(),
                pipeline: self.pipeline.clone(),
                checkpoints: self.checkpoints.clone(),
                queue: queue.clone(),
                progress: progress.clone(),
                cancel: cancel.clone(),
            };
            handles.push(tokio::spawn(worker.drain()));
        }

        for handle in handles {
            match handle.await {
                Ok(finished) => {
                    for (index, outcome) in finished {
                        outcomes[index] = Some(outcome);
                    }
                }
                Err(e) => error!(error = %e, "worker task failed"),
            }
        }

        // --- Report ---
        let cancelled = cancel.is_cancelled();
        let companies: Vec<CompanyOutcome> = outcomes
            .into_iter()
            .zip(labels)
            .map(|(slot, (key, target))| {
                slot.unwrap_or_else(|| {
                    // Never dispatched, or lost with a crashed worker.
                    let mut o = CompanyOutcome::new(&key, &target, CheckpointState::Pending);
                    o.reason = Some(if cancelled {
                        "run cancelled before dispatch".into()
                    } else {
                        "not processed".into()
                    });
                    o
                })
            })
            .collect();

        let report = RunReport::build(
            &run_id,
            &workspace_id,
            started_at,
            cancelled,
            companies,
            self.rates,
        );
        self.save_report(&report).await;

        info!(
            %run_id,
            success = report.totals.success,
            failed = report.totals.failed,
            skipped = report.totals.skipped,
            pending = report.totals.pending,
            credits = report.credits.total,
            "run finished"
        );
        progress.done(&report);
        Ok(report)
    }

    async fn previous_report(&self, run_id: &str) -> Option<RunReport> {
        match self.pipeline.storage().get_run_report(run_id).await {
            Ok(Some(json)) => match RunReport::from_json(&json) {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(%run_id, error = %e, "ignoring unreadable earlier report");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(%run_id, error = %e, "could not load earlier report");
                None
            }
        }
    }

    async fn save_report(&self, report: &RunReport) {
        let json = match report.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "run report not stored");
                return;
            }
        };
        let storage = self.pipeline.storage();
        let saved = RetryPolicy::persistence()
            .execute("save run report", || {
                storage.save_run_report(&report.run_id, &report.workspace_id, &json)
            })
            .await;
        if let Err(e) = saved.result {
            error!(run_id = %report.run_id, error = %e, "run report not stored");
        }
    }
}

/// One pool member. Finishes a unit and its checkpoint before taking the next.
struct Worker {
    run_id: String,
    pipeline: Arc<UnitPipeline>,
    checkpoints: Arc<dyn CheckpointStore>,
    queue: Arc<Mutex<VecDeque<Unit>>>,
    progress: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
}

impl Worker {
    async fn drain(self) -> Vec<(usize, CompanyOutcome)> {
        let mut finished = Vec::new();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(unit) = self.queue.lock().await.pop_front() else {
                break;
            };

            self.progress.unit_started(&unit.key);
            let outcome = self.pipeline.run_unit(&unit.key, &unit.target).await;

            let checkpoint = ProcessingCheckpoint {
                run_id: self.run_id.clone(),
                unit_key: unit.key.clone(),
                state: outcome.state,
                reason: outcome.reason.clone(),
                retry_count: outcome.retry_count,
                updated_at: Utc::now(),
            };
            let checkpoints = &self.checkpoints;
            let recorded = RetryPolicy::persistence()
                .execute("record checkpoint", || checkpoints.record(&checkpoint))
                .await;
            if let Err(e) = recorded.result {
                // The unit reruns on restart; its writes are idempotent.
                error!(unit = %unit.key, error = %e, "checkpoint not recorded");
            }

            self.progress.unit_finished(&outcome);
            finished.push((unit.index, outcome));
        }
        finished
    }
}
