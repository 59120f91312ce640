//! The artifact & history store.
//!
//! A durable, append-only record of evaluation runs and compiled programs
//! with indexed lookups. Records are immutable once written; deletion is a
//! tombstone in the index; history never rewrites. Writes are two-step:
//! record to a temp path, fsync, rename into place, then append to the
//! index atomically. Reads never block on writes.
//!
//! Layout under the root directory:
//!
//! ```text
//! index.json              # evaluation run index
//! runs/<run_id>.json      # one file per run
//! artifacts/index.json    # compiled program index
//! artifacts/active.json   # prompt id -> active artifact id
//! artifacts/<version>/    # one package directory per artifact
//! ```

use crate::error::{StudioError, StudioResult};
use crate::eval::EvaluationRun;
use crate::logging::{log_debug, log_info};
use crate::program::CompiledProgram;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One line of the evaluation run index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunIndexEntry {
    pub run_id: String,
    pub prompt_id: String,
    pub dataset_id: String,
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    #[serde(default)]
    pub tombstone: bool,
}

/// One line of the artifact index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactIndexEntry {
    pub artifact_id: String,
    pub prompt_id: String,
    pub metric_name: String,
    pub metric_value: f64,
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    #[serde(default)]
    pub tombstone: bool,
}

/// Regression severity bands over the drop fraction:
/// <1% none, 1-5% low, 5-10% medium, >10% high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionSeverity {
    None,
    Low,
    Medium,
    High,
}

impl RegressionSeverity {
    fn from_drop(drop_fraction: f64) -> Self {
        if drop_fraction < 0.01 {
            RegressionSeverity::None
        } else if drop_fraction <= 0.05 {
            RegressionSeverity::Low
        } else if drop_fraction <= 0.10 {
            RegressionSeverity::Medium
        } else {
            RegressionSeverity::High
        }
    }
}

/// Result of a regression query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionReport {
    pub metric_name: String,
    pub regression_detected: bool,
    /// (baseline - recent) / baseline; zero when baseline is empty or zero.
    pub drop_fraction: f64,
    pub severity: RegressionSeverity,
    pub recent_mean: f64,
    pub baseline_mean: f64,
    pub window: usize,
}

/// Trend direction classified from the least-squares slope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
}

/// Result of a trend query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub metric_name: String,
    /// (timestamp, value) in chronological order.
    pub points: Vec<(DateTime<Utc>, f64)>,
    /// Least-squares slope per run.
    pub slope: f64,
    pub direction: TrendDirection,
}

/// Durable store rooted at a directory.
///
/// Concurrent readers are always safe; in-process writers serialize on the
/// index mutexes, and each index update is an atomic rename.
pub struct HistoryStore {
    root: PathBuf,
    run_index: Mutex<()>,
    artifact_index: Mutex<()>,
    /// Last timestamp handed out; keeps run stamps monotone in-process.
    clock: Mutex<DateTime<Utc>>,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore").field("root", &self.root).finish()
    }
}

impl HistoryStore {
    pub fn open(root: impl Into<PathBuf>) -> StudioResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("runs"))
            .and_then(|()| fs::create_dir_all(root.join("artifacts")))
            .map_err(|e| StudioError::store("failed to create store layout", Some(e)))?;
        log_debug!(root = %root.display(), "History store opened");
        Ok(Self {
            root,
            run_index: Mutex::new(()),
            artifact_index: Mutex::new(()),
            clock: Mutex::new(DateTime::<Utc>::MIN_UTC),
        })
    }

    /// UTC timestamp guaranteed monotone within this process.
    fn monotonic_now(&self) -> DateTime<Utc> {
        let mut clock = self.clock.lock().unwrap_or_else(|p| p.into_inner());
        let mut now = Utc::now();
        if now <= *clock {
            now = *clock + chrono::Duration::microseconds(1);
        }
        *clock = now;
        now
    }

    fn run_index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn artifact_index_path(&self) -> PathBuf {
        self.root.join("artifacts").join("index.json")
    }

    fn active_map_path(&self) -> PathBuf {
        self.root.join("artifacts").join("active.json")
    }

    // =========================================================================
    // Evaluation runs
    // =========================================================================

    /// Persist an evaluation run. Returns the run id.
    pub fn save_evaluation(&self, run: &EvaluationRun) -> StudioResult<String> {
        let mut run = run.clone();
        run.timestamp = self.monotonic_now();

        let path = self.root.join("runs").join(format!("{}.json", run.run_id));
        write_record(&path, &run)?;

        {
            let _guard = self.run_index.lock().unwrap_or_else(|p| p.into_inner());
            let mut index: Vec<RunIndexEntry> = read_json_or_default(&self.run_index_path());
            index.push(RunIndexEntry {
                run_id: run.run_id.clone(),
                prompt_id: run.prompt_id.clone(),
                dataset_id: run.dataset_id.clone(),
                timestamp: run.timestamp,
                path: path.clone(),
                tombstone: false,
            });
            write_record(&self.run_index_path(), &index)?;
        }

        log_info!(run_id = %run.run_id, prompt_id = %run.prompt_id, "Evaluation run saved");
        Ok(run.run_id)
    }

    /// Load one run by id.
    pub fn load_run(&self, run_id: &str) -> StudioResult<EvaluationRun> {
        let entry = self
            .run_entries()
            .into_iter()
            .find(|e| e.run_id == run_id && !e.tombstone)
            .ok_or_else(|| StudioError::store(format!("run '{run_id}' not found"), None))?;
        read_json(&entry.path)
    }

    fn run_entries(&self) -> Vec<RunIndexEntry> {
        read_json_or_default(&self.run_index_path())
    }

    /// Reverse-chronological runs for a prompt.
    pub fn get_prompt_history(&self, prompt_id: &str, limit: usize) -> StudioResult<Vec<EvaluationRun>> {
        self.history_where(|e| e.prompt_id == prompt_id, limit)
    }

    /// Reverse-chronological runs for a dataset.
    pub fn get_dataset_history(
        &self,
        dataset_id: &str,
        limit: usize,
    ) -> StudioResult<Vec<EvaluationRun>> {
        self.history_where(|e| e.dataset_id == dataset_id, limit)
    }

    fn history_where<F>(&self, matches: F, limit: usize) -> StudioResult<Vec<EvaluationRun>>
    where
        F: Fn(&RunIndexEntry) -> bool,
    {
        let mut entries: Vec<RunIndexEntry> = self
            .run_entries()
            .into_iter()
            .filter(|e| !e.tombstone && matches(e))
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
        entries
            .into_iter()
            .take(limit)
            .map(|e| read_json(&e.path))
            .collect()
    }

    /// Tombstone a run. The record file stays on disk; the index entry is
    /// marked, never removed.
    pub fn delete_run(&self, run_id: &str) -> StudioResult<()> {
        let _guard = self.run_index.lock().unwrap_or_else(|p| p.into_inner());
        let mut index: Vec<RunIndexEntry> = read_json_or_default(&self.run_index_path());
        let Some(entry) = index.iter_mut().find(|e| e.run_id == run_id) else {
            return Err(StudioError::store(format!("run '{run_id}' not found"), None));
        };
        entry.tombstone = true;
        write_record(&self.run_index_path(), &index)
    }

    // =========================================================================
    // Regression and trend queries
    // =========================================================================

    /// Compare the mean of the most recent `window` runs against the mean
    /// of all earlier runs of this prompt.
    pub fn detect_regression(
        &self,
        prompt_id: &str,
        metric_name: &str,
        threshold: f64,
        window: usize,
    ) -> StudioResult<RegressionReport> {
        let series = self.metric_series(prompt_id, metric_name)?;
        if series.len() <= window || window == 0 {
            return Ok(RegressionReport {
                metric_name: metric_name.to_string(),
                regression_detected: false,
                drop_fraction: 0.0,
                severity: RegressionSeverity::None,
                recent_mean: mean(series.iter().map(|(_, v)| *v)),
                baseline_mean: 0.0,
                window,
            });
        }

        let split = series.len() - window;
        let baseline_mean = mean(series[..split].iter().map(|(_, v)| *v));
        let recent_mean = mean(series[split..].iter().map(|(_, v)| *v));
        let drop_fraction = if baseline_mean.abs() < f64::EPSILON {
            0.0
        } else {
            ((baseline_mean - recent_mean) / baseline_mean).max(0.0)
        };
        let regression_detected = drop_fraction > threshold;

        Ok(RegressionReport {
            metric_name: metric_name.to_string(),
            regression_detected,
            drop_fraction,
            severity: if regression_detected {
                RegressionSeverity::from_drop(drop_fraction)
            } else {
                RegressionSeverity::None
            },
            recent_mean,
            baseline_mean,
            window,
        })
    }

    /// Time series plus least-squares slope for one metric of one prompt.
    /// Direction is classified at |slope| > 0.01 per run.
    pub fn get_trend(
        &self,
        prompt_id: &str,
        metric_name: &str,
        limit: usize,
    ) -> StudioResult<TrendReport> {
        let mut series = self.metric_series(prompt_id, metric_name)?;
        if series.len() > limit {
            series.drain(..series.len() - limit);
        }

        let slope = least_squares_slope(&series.iter().map(|(_, v)| *v).collect::<Vec<_>>());
        let direction = if slope > 0.01 {
            TrendDirection::Improving
        } else if slope < -0.01 {
            TrendDirection::Declining
        } else {
            TrendDirection::Stable
        };

        Ok(TrendReport {
            metric_name: metric_name.to_string(),
            points: series,
            slope,
            direction,
        })
    }

    /// Chronological (timestamp, value) pairs for one metric of one prompt.
    fn metric_series(
        &self,
        prompt_id: &str,
        metric_name: &str,
    ) -> StudioResult<Vec<(DateTime<Utc>, f64)>> {
        let mut entries: Vec<RunIndexEntry> = self
            .run_entries()
            .into_iter()
            .filter(|e| !e.tombstone && e.prompt_id == prompt_id)
            .collect();
        entries.sort_by_key(|e| e.timestamp);

        let mut series = Vec::with_capacity(entries.len());
        for entry in entries {
            let run: EvaluationRun = read_json(&entry.path)?;
            if let Some(value) = run.metrics.get(metric_name) {
                series.push((entry.timestamp, *value));
            }
        }
        Ok(series)
    }

    // =========================================================================
    // Artifacts
    // =========================================================================

    /// Persist a compiled program as a versioned package directory.
    ///
    /// Layout: `metadata.json`, `signature.json`, `program.rs`,
    /// `compiled_program.bin`, `optimizer_config.json`,
    /// `eval_results.json`, `demos/`.
    pub fn save_artifact(
        &self,
        prompt_id: &str,
        program: &CompiledProgram,
        eval_results: Option<&EvaluationRun>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> StudioResult<String> {
        let _guard = self.artifact_index.lock().unwrap_or_else(|p| p.into_inner());

        let timestamp = self.monotonic_now();
        let artifact_id = self.next_artifact_id(timestamp);
        let dir = self.root.join("artifacts").join(&artifact_id);
        fs::create_dir_all(dir.join("demos"))
            .map_err(|e| StudioError::store("failed to create artifact package", Some(e)))?;

        let mut meta = metadata;
        meta.insert(
            "artifact_id".to_string(),
            serde_json::Value::String(artifact_id.clone()),
        );
        meta.insert(
            "prompt_id".to_string(),
            serde_json::Value::String(prompt_id.to_string()),
        );
        meta.insert(
            "metric".to_string(),
            serde_json::json!({ "name": program.metric_name, "value": program.metric_value }),
        );
        meta.insert(
            "target_lm".to_string(),
            serde_json::Value::String(program.target_lm.clone()),
        );

        write_record(&dir.join("metadata.json"), &meta)?;
        write_record(&dir.join("signature.json"), &program.signatures)?;
        write_text(&dir.join("program.rs"), &program.program_code)?;
        // The optimizer output, serialized whole for byte-exact reloads.
        let serialized = serde_json::to_vec(program)
            .map_err(|e| StudioError::store(format!("artifact serialization failed: {e}"), None))?;
        write_bytes(&dir.join("compiled_program.bin"), &serialized)?;
        write_record(&dir.join("optimizer_config.json"), &program.optimizer_params)?;
        if let Some(results) = eval_results {
            write_record(&dir.join("eval_results.json"), results)?;
        }
        for (i, demo) in program.demonstrations.iter().enumerate() {
            write_record(&dir.join("demos").join(format!("demo_{i:03}.json")), demo)?;
        }

        let mut index: Vec<ArtifactIndexEntry> =
            read_json_or_default(&self.artifact_index_path());
        index.push(ArtifactIndexEntry {
            artifact_id: artifact_id.clone(),
            prompt_id: prompt_id.to_string(),
            metric_name: program.metric_name.clone(),
            metric_value: program.metric_value,
            timestamp,
            path: dir,
            tombstone: false,
        });
        write_record(&self.artifact_index_path(), &index)?;

        // A freshly saved artifact becomes the active one for its prompt.
        self.set_active(prompt_id, &artifact_id)?;

        log_info!(artifact_id = %artifact_id, prompt_id = %prompt_id, "Artifact saved");
        Ok(artifact_id)
    }

    /// `v_YYYYMMDD_NNN` with NNN monotone per UTC day.
    fn next_artifact_id(&self, timestamp: DateTime<Utc>) -> String {
        let date = format!(
            "{:04}{:02}{:02}",
            timestamp.year(),
            timestamp.month(),
            timestamp.day()
        );
        let prefix = format!("v_{date}_");
        let index: Vec<ArtifactIndexEntry> = read_json_or_default(&self.artifact_index_path());
        let max_n = index
            .iter()
            .filter_map(|e| e.artifact_id.strip_prefix(&prefix))
            .filter_map(|n| n.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        format!("{prefix}{:03}", max_n + 1)
    }

    /// Load a compiled program back from its package.
    pub fn load_artifact(&self, artifact_id: &str) -> StudioResult<CompiledProgram> {
        let entry = self
            .artifact_entries()
            .into_iter()
            .find(|e| e.artifact_id == artifact_id && !e.tombstone)
            .ok_or_else(|| {
                StudioError::store(format!("artifact '{artifact_id}' not found"), None)
            })?;
        let bytes = fs::read(entry.path.join("compiled_program.bin"))
            .map_err(|e| StudioError::store("failed to read artifact payload", Some(e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StudioError::store(format!("corrupt artifact payload: {e}"), None))
    }

    /// Every live artifact index entry, in insertion order.
    pub fn list_artifacts(&self) -> Vec<ArtifactIndexEntry> {
        self.artifact_entries()
            .into_iter()
            .filter(|e| !e.tombstone)
            .collect()
    }

    fn artifact_entries(&self) -> Vec<ArtifactIndexEntry> {
        read_json_or_default(&self.artifact_index_path())
    }

    /// The active artifact id for a prompt, if one was ever recorded.
    pub fn active_artifact(&self, prompt_id: &str) -> Option<String> {
        let map: BTreeMap<String, String> = read_json_or_default(&self.active_map_path());
        map.get(prompt_id).cloned()
    }

    fn set_active(&self, prompt_id: &str, artifact_id: &str) -> StudioResult<()> {
        let mut map: BTreeMap<String, String> = read_json_or_default(&self.active_map_path());
        map.insert(prompt_id.to_string(), artifact_id.to_string());
        write_record(&self.active_map_path(), &map)
    }

    /// Point a prompt back at an earlier artifact and return it. History is
    /// untouched; only the active pointer moves.
    pub fn rollback(&self, prompt_id: &str, to_artifact_id: &str) -> StudioResult<CompiledProgram> {
        let _guard = self.artifact_index.lock().unwrap_or_else(|p| p.into_inner());
        let program = self.load_artifact(to_artifact_id)?;
        let owned = self
            .artifact_entries()
            .iter()
            .any(|e| e.artifact_id == to_artifact_id && e.prompt_id == prompt_id);
        if !owned {
            return Err(StudioError::store(
                format!("artifact '{to_artifact_id}' does not belong to prompt '{prompt_id}'"),
                None,
            ));
        }
        self.set_active(prompt_id, to_artifact_id)?;
        log_info!(prompt_id = %prompt_id, artifact_id = %to_artifact_id, "Rolled back");
        Ok(program)
    }
}

// =============================================================================
// Atomic file plumbing
// =============================================================================

/// Write a serializable record: temp file, fsync, rename into place.
fn write_record<T: Serialize>(path: &Path, value: &T) -> StudioResult<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| StudioError::store(format!("serialization failed: {e}"), None))?;
    write_bytes(path, &bytes)
}

fn write_text(path: &Path, text: &str) -> StudioResult<()> {
    write_bytes(path, text.as_bytes())
}

fn write_bytes(path: &Path, bytes: &[u8]) -> StudioResult<()> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)
        .map_err(|e| StudioError::store(format!("failed to create {}", tmp.display()), Some(e)))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| StudioError::store(format!("failed to write {}", tmp.display()), Some(e)))?;
    drop(file);
    fs::rename(&tmp, path)
        .map_err(|e| StudioError::store(format!("failed to commit {}", path.display()), Some(e)))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> StudioResult<T> {
    let bytes = fs::read(path)
        .map_err(|e| StudioError::store(format!("failed to read {}", path.display()), Some(e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| StudioError::store(format!("corrupt record {}: {e}", path.display()), None))
}

fn read_json_or_default<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> T {
    fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let collected: Vec<f64> = values.collect();
    if collected.is_empty() {
        0.0
    } else {
        collected.iter().sum::<f64>() / collected.len() as f64
    }
}

/// Least-squares slope of a series indexed 0..n. Zero for fewer than two
/// points.
fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}
