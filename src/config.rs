use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{QaError, Result};

// all-MiniLM-L6-v2 output width
pub const DEFAULT_DIM: usize = 384;

/// SRP index geometry. Changing any field invalidates every stored signature,
/// so the index must be rebuilt from the record lists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub dim: usize,
    pub n_planes: usize,
    pub n_bands: usize,
    pub seed: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { dim: DEFAULT_DIM, n_planes: 64, n_bands: 8, seed: 42 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    pub min_similarity: f32,
    /// At or below this many questions the LSH stage is skipped and every
    /// question is scored.
    pub exhaustive_threshold: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { top_k: 5, min_similarity: 0.75, exhaustive_threshold: 200 }
    }
}

/// Hybrid answer-linking policy:
/// `score = similarity_weight * cos + recency_weight * exp(-|dt| / tau_secs)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkPolicy {
    pub similarity_weight: f32,
    pub recency_weight: f32,
    pub tau_secs: f64,
    pub min_score: f32,
    /// How many of a channel's most recent questions are considered.
    pub window: usize,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            similarity_weight: 0.7,
            recency_weight: 0.3,
            tau_secs: 300.0,
            min_score: 0.55,
            window: 30,
        }
    }
}

impl LinkPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(QaError::Configuration("link window must be non-zero".into()));
        }
        if !(self.tau_secs > 0.0) {
            return Err(QaError::Configuration(format!("tau_secs must be positive, got {}", self.tau_secs)));
        }
        if !self.similarity_weight.is_finite() || !self.recency_weight.is_finite() {
            return Err(QaError::Configuration("link weights must be finite".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub index: IndexConfig,
    pub search: SearchConfig,
    pub link: LinkPolicy,
    /// Best-answer text longer than this many characters is cut and marked with an ellipsis.
    pub max_answer_len: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            index: IndexConfig::default(),
            search: SearchConfig::default(),
            link: LinkPolicy::default(),
            max_answer_len: 800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub data_dir: PathBuf,
    /// fsync the record log after every append.
    pub strict_durability: bool,
    /// 0 disables the background snapshot thread.
    pub snapshot_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            data_dir: PathBuf::from("qalink_data"),
            strict_durability: true,
            snapshot_interval_secs: 600,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("records.log")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshot")
    }
}
