//! Per-run processing checkpoints.
//!
//! A run writes one checkpoint per company target. On restart the orchestrator
//! loads them and skips every unit already in a terminal state. Three
//! interchangeable backends: the result database, a JSON file per run, and
//! process memory (tests, dry runs).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use buyergroup_shared::{
    BuyerGroupError, CheckpointState, ProcessingCheckpoint, Result,
};
use chrono::Utc;
use libsql::params;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{Storage, db_err, parse_ts};

/// Durable per-unit state for a run.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// All checkpoints of a run, ordered by unit key.
    async fn load(&self, run_id: &str) -> Result<Vec<ProcessingCheckpoint>>;

    /// Create `pending` rows for keys that have no checkpoint yet.
    async fn seed_pending(&self, run_id: &str, unit_keys: &[String]) -> Result<()>;

    /// Store a terminal outcome. Writing the same outcome twice is a no-op.
    async fn record(&self, checkpoint: &ProcessingCheckpoint) -> Result<()>;

    /// Move `failed` units back to `pending`. Returns how many moved.
    async fn reset_failed(&self, run_id: &str) -> Result<usize>;
}

fn ensure_terminal(cp: &ProcessingCheckpoint) -> Result<()> {
    if !cp.state.is_terminal() {
        return Err(BuyerGroupError::validation(format!(
            "checkpoint {}/{} recorded as {}",
            cp.run_id, cp.unit_key, cp.state
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Database backend
// ---------------------------------------------------------------------------

#[async_trait]
impl CheckpointStore for Storage {
    async fn load(&self, run_id: &str) -> Result<Vec<ProcessingCheckpoint>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT run_id, unit_key, state, reason, retry_count, updated_at
                 FROM checkpoints WHERE run_id = ?1 ORDER BY unit_key",
                params![run_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(ProcessingCheckpoint {
                run_id: row.get::<String>(0).map_err(db_err)?,
                unit_key: row.get::<String>(1).map_err(db_err)?,
                state: row.get::<String>(2).map_err(db_err)?.parse()?,
                reason: row.get::<String>(3).ok(),
                retry_count: row.get::<u32>(4).map_err(db_err)?,
                updated_at: parse_ts(&row.get::<String>(5).map_err(db_err)?)?,
            });
        }
        Ok(results)
    }

    async fn seed_pending(&self, run_id: &str, unit_keys: &[String]) -> Result<()> {
        self.check_writable()?;
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        for key in unit_keys {
            conn.execute(
                "INSERT INTO checkpoints (run_id, unit_key, state, reason, retry_count, updated_at)
                 VALUES (?1, ?2, 'pending', NULL, 0, ?3)
                 ON CONFLICT(run_id, unit_key) DO NOTHING",
                params![run_id, key.as_str(), now.as_str()],
            )
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn record(&self, cp: &ProcessingCheckpoint) -> Result<()> {
        ensure_terminal(cp)?;
        self.check_writable()?;
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "INSERT INTO checkpoints (run_id, unit_key, state, reason, retry_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(run_id, unit_key) DO UPDATE SET
                   state = excluded.state,
                   reason = excluded.reason,
                   retry_count = excluded.retry_count,
                   updated_at = excluded.updated_at
                 WHERE checkpoints.state != excluded.state
                    OR checkpoints.reason IS NOT excluded.reason
                    OR checkpoints.retry_count != excluded.retry_count",
                params![
                    cp.run_id.as_str(),
                    cp.unit_key.as_str(),
                    cp.state.as_str(),
                    cp.reason.as_deref(),
                    i64::from(cp.retry_count),
                    cp.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        debug!(unit = %cp.unit_key, state = %cp.state, changed, "checkpoint recorded");
        Ok(())
    }

    async fn reset_failed(&self, run_id: &str) -> Result<usize> {
        self.check_writable()?;
        let conn = self.conn.lock().await;
        let moved = conn
            .execute(
                "UPDATE checkpoints SET state = 'pending', updated_at = ?1
                 WHERE run_id = ?2 AND state = 'failed'",
                params![Utc::now().to_rfc3339(), run_id],
            )
            .await
            .map_err(db_err)?;
        Ok(moved as usize)
    }
}

// ---------------------------------------------------------------------------
// In-memory map shared by the file and memory backends
// ---------------------------------------------------------------------------

type RunMap = BTreeMap<String, ProcessingCheckpoint>;

fn seed(map: &mut RunMap, run_id: &str, unit_keys: &[String]) -> bool {
    let mut changed = false;
    for key in unit_keys {
        if !map.contains_key(key) {
            map.insert(key.clone(), ProcessingCheckpoint::pending(run_id, key));
            changed = true;
        }
    }
    changed
}

fn upsert(map: &mut RunMap, cp: &ProcessingCheckpoint) -> bool {
    match map.get(&cp.unit_key) {
        Some(existing) if existing.same_outcome(cp) => false,
        _ => {
            map.insert(cp.unit_key.clone(), cp.clone());
            true
        }
    }
}

fn reset(map: &mut RunMap) -> usize {
    let now = Utc::now();
    let mut moved = 0;
    for cp in map.values_mut().filter(|cp| cp.state == CheckpointState::Failed) {
        cp.state = CheckpointState::Pending;
        cp.updated_at = now;
        moved += 1;
    }
    moved
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// One JSON document per run at `<dir>/<run_id>.json`.
///
/// Every change rewrites the whole document through a temp file and a rename,
/// so a crash leaves either the old or the new state on disk.
pub struct FileCheckpointStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| BuyerGroupError::io(&dir, e))?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    /// Run ids become file names, so they stay inside the checkpoint dir.
    fn path_for(&self, run_id: &str) -> Result<PathBuf> {
        let safe = !run_id.is_empty()
            && !run_id.starts_with('.')
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !safe {
            return Err(BuyerGroupError::validation(format!(
                "run id {run_id:?} is not usable as a checkpoint file name"
            )));
        }
        Ok(self.dir.join(format!("{run_id}.json")))
    }

    async fn read_run(&self, path: &Path) -> Result<RunMap> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RunMap::new()),
            Err(e) => return Err(BuyerGroupError::io(path, e)),
        };
        let list: Vec<ProcessingCheckpoint> = serde_json::from_str(&raw).map_err(|e| {
            BuyerGroupError::Persistence(format!("corrupt checkpoint file {}: {e}", path.display()))
        })?;
        Ok(list.into_iter().map(|cp| (cp.unit_key.clone(), cp)).collect())
    }

    async fn write_run(&self, path: &Path, map: &RunMap) -> Result<()> {
        let list: Vec<&ProcessingCheckpoint> = map.values().collect();
        let json = serde_json::to_string_pretty(&list)
            .map_err(|e| BuyerGroupError::Persistence(format!("encode checkpoints: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| BuyerGroupError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| BuyerGroupError::io(path, e))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, run_id: &str) -> Result<Vec<ProcessingCheckpoint>> {
        let _guard = self.lock.lock().await;
        let map = self.read_run(&self.path_for(run_id)?).await?;
        Ok(map.into_values().collect())
    }

    async fn seed_pending(&self, run_id: &str, unit_keys: &[String]) -> Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.path_for(run_id)?;
        let mut map = self.read_run(&path).await?;
        if seed(&mut map, run_id, unit_keys) {
            self.write_run(&path, &map).await?;
        }
        Ok(())
    }

    async fn record(&self, cp: &ProcessingCheckpoint) -> Result<()> {
        ensure_terminal(cp)?;
        let _guard = self.lock.lock().await;
        let path = self.path_for(&cp.run_id)?;
        let mut map = self.read_run(&path).await?;
        if upsert(&mut map, cp) {
            self.write_run(&path, &map).await?;
        }
        Ok(())
    }

    async fn reset_failed(&self, run_id: &str) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let path = self.path_for(run_id)?;
        let mut map = self.read_run(&path).await?;
        let moved = reset(&mut map);
        if moved > 0 {
            self.write_run(&path, &map).await?;
        }
        Ok(moved)
    }
}

// ---------------------------------------------------------------------------
// Memory backend
// ---------------------------------------------------------------------------

/// Process-local checkpoints; lost on exit.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    runs: Mutex<HashMap<String, RunMap>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, run_id: &str) -> Result<Vec<ProcessingCheckpoint>> {
        let runs = self.runs.lock().await;
        Ok(runs
            .get(run_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn seed_pending(&self, run_id: &str, unit_keys: &[String]) -> Result<()> {
        let mut runs = self.runs.lock().await;
        seed(runs.entry(run_id.to_string()).or_default(), run_id, unit_keys);
        Ok(())
    }

    async fn record(&self, cp: &ProcessingCheckpoint) -> Result<()> {
        ensure_terminal(cp)?;
        let mut runs = self.runs.lock().await;
        upsert(runs.entry(cp.run_id.clone()).or_default(), cp);
        Ok(())
    }

    async fn reset_failed(&self, run_id: &str) -> Result<usize> {
        let mut runs = self.runs.lock().await;
        Ok(runs.get_mut(run_id).map(reset).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn outcome(run: &str, key: &str, state: CheckpointState, retries: u32) -> ProcessingCheckpoint {
        ProcessingCheckpoint {
            state,
            retry_count: retries,
            reason: (state != CheckpointState::Success).then(|| "boom".to_string()),
            ..ProcessingCheckpoint::pending(run, key)
        }
    }

    /// Same scenario against any backend.
    async fn exercise(store: &dyn CheckpointStore) {
        store
            .seed_pending("run-1", &keys(&["acme.io", "globex.com", "initech.com"]))
            .await
            .expect("seed");

        store
            .record(&outcome("run-1", "acme.io", CheckpointState::Success, 3))
            .await
            .expect("record success");
        store
            .record(&outcome("run-1", "globex.com", CheckpointState::Failed, 5))
            .await
            .expect("record failed");

        // Seeding again never resets progress.
        store
            .seed_pending("run-1", &keys(&["acme.io", "globex.com", "initech.com"]))
            .await
            .expect("reseed");

        let loaded = store.load("run-1").await.expect("load");
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].unit_key, "acme.io");
        assert_eq!(loaded[0].state, CheckpointState::Success);
        assert_eq!(loaded[0].retry_count, 3);
        assert_eq!(loaded[1].state, CheckpointState::Failed);
        assert_eq!(loaded[1].reason.as_deref(), Some("boom"));
        assert_eq!(loaded[2].state, CheckpointState::Pending);

        assert_eq!(store.reset_failed("run-1").await.expect("reset"), 1);
        let loaded = store.load("run-1").await.expect("reload");
        assert_eq!(loaded[1].state, CheckpointState::Pending);

        // Other runs are independent.
        assert!(store.load("run-2").await.expect("load other").is_empty());

        // Pending is not a recordable outcome.
        let err = store
            .record(&ProcessingCheckpoint::pending("run-1", "acme.io"))
            .await
            .unwrap_err();
        assert!(matches!(err, BuyerGroupError::Validation { .. }));
    }

    #[tokio::test]
    async fn database_backend() {
        let storage = crate::tests::test_storage().await;
        exercise(&storage).await;
    }

    #[tokio::test]
    async fn file_backend() {
        let dir = std::env::temp_dir().join(format!("bg_cp_{}", Uuid::now_v7()));
        let store = FileCheckpointStore::new(&dir).expect("create dir");
        exercise(&store).await;
        assert!(dir.join("run-1.json").exists());
        assert!(!dir.join("run-1.json.tmp").exists());
    }

    #[tokio::test]
    async fn file_backend_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("bg_cp_{}", Uuid::now_v7()));
        {
            let store = FileCheckpointStore::new(&dir).expect("create dir");
            store
                .record(&outcome("r", "acme.io", CheckpointState::Skipped, 0))
                .await
                .expect("record");
        }
        let store = FileCheckpointStore::new(&dir).expect("reopen");
        let loaded = store.load("r").await.expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].state, CheckpointState::Skipped);
    }

    #[tokio::test]
    async fn file_backend_rejects_path_like_run_ids() {
        let dir = std::env::temp_dir().join(format!("bg_cp_{}", Uuid::now_v7()));
        let store = FileCheckpointStore::new(&dir).expect("create dir");
        for bad in ["../x", "a/b", "a\\b", "..", ".hidden", ""] {
            let err = store.seed_pending(bad, &keys(&["acme.io"])).await.unwrap_err();
            assert!(matches!(err, BuyerGroupError::Validation { .. }), "{bad:?}");
            assert!(store.load(bad).await.is_err(), "{bad:?}");
        }
        assert!(!dir.parent().expect("tmp parent").join("x.json").exists());

        store
            .seed_pending("nightly-42.v2", &keys(&["acme.io"]))
            .await
            .expect("plain run id");
        assert!(dir.join("nightly-42.v2.json").exists());
    }

    #[tokio::test]
    async fn memory_backend() {
        exercise(&MemoryCheckpointStore::new()).await;
    }

    #[tokio::test]
    async fn identical_outcome_keeps_first_timestamp() {
        let store = MemoryCheckpointStore::new();
        let first = outcome("r", "acme.io", CheckpointState::Success, 1);
        store.record(&first).await.expect("first");
        let mut again = first.clone();
        again.updated_at = first.updated_at + chrono::Duration::seconds(30);
        store.record(&again).await.expect("again");
        let loaded = store.load("r").await.expect("load");
        assert_eq!(loaded[0].updated_at, first.updated_at);
    }
}
