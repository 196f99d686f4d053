use serde::Deserialize;
use sqlx::SqlitePool;
use std::{fs, path::PathBuf};
use std::sync::{OnceLock, RwLock};
use toml;

use crate::repository::{RepositoryError, SqlitePreferencesRepository};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigLoadingError {
    #[error("Failed to read the config (./config.toml): {0}")]
    FailedToReadConfig(String),

    #[error("Failed to parse the config: {0}")]
    FailedToParseConfig(#[from] toml::de::Error)
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub library: LibraryConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub matching: Thresholds
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf
}

#[derive(Debug, Deserialize)]
pub struct LibraryConfig {
    pub music_path: PathBuf,
    pub vector_index_path: PathBuf
}

fn default_max_concurrent_files() -> usize { 10 }
fn default_commit_interval() -> usize { 50 }
fn default_touch_batch_size() -> usize { 400 }
fn default_vector_batch_size() -> usize { 100 }
fn default_missing_chunk_size() -> usize { 500 }
fn default_progress_interval() -> usize { 100 }
fn default_work_fuzzy_max_works() -> i64 { 500 }
fn default_work_fuzzy_threshold() -> f64 { 0.85 }

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,

    /// Buffers flush only when the processed counter crosses a multiple of
    /// this interval AND something actually changed since the last flush.
    #[serde(default = "default_commit_interval")]
    pub commit_interval: usize,

    #[serde(default = "default_touch_batch_size")]
    pub touch_batch_size: usize,

    #[serde(default = "default_vector_batch_size")]
    pub vector_batch_size: usize,

    #[serde(default = "default_missing_chunk_size")]
    pub missing_chunk_size: usize,

    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,

    #[serde(default = "default_work_fuzzy_max_works")]
    pub work_fuzzy_max_works: i64,

    #[serde(default = "default_work_fuzzy_threshold")]
    pub work_fuzzy_threshold: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_files: default_max_concurrent_files(),
            commit_interval: default_commit_interval(),
            touch_batch_size: default_touch_batch_size(),
            vector_batch_size: default_vector_batch_size(),
            missing_chunk_size: default_missing_chunk_size(),
            progress_interval: default_progress_interval(),
            work_fuzzy_max_works: default_work_fuzzy_max_works(),
            work_fuzzy_threshold: default_work_fuzzy_threshold(),
        }
    }
}

fn default_artist_auto() -> f64 { 0.85 }
fn default_artist_review() -> f64 { 0.70 }
fn default_title_auto() -> f64 { 0.80 }
fn default_title_review() -> f64 { 0.70 }
fn default_vector_strong() -> f64 { 0.15 }
fn default_title_vector() -> f64 { 0.90 }
fn default_title_vector_dist() -> f64 { 0.35 }

/// Matching thresholds. Similarities are in [0, 1] (higher is closer);
/// vector values are cosine distances (lower is closer).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_artist_auto")]
    pub artist_auto: f64,

    #[serde(default = "default_artist_review")]
    pub artist_review: f64,

    #[serde(default = "default_title_auto")]
    pub title_auto: f64,

    #[serde(default = "default_title_review")]
    pub title_review: f64,

    #[serde(default = "default_vector_strong")]
    pub vector_strong: f64,

    /// Minimum title similarity a vector-strong candidate must still clear.
    /// Derived as 0.8 x title_review unless set explicitly.
    #[serde(default)]
    pub vector_title_guard: Option<f64>,

    #[serde(default = "default_title_vector")]
    pub title_vector: f64,

    #[serde(default = "default_title_vector_dist")]
    pub title_vector_dist: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            artist_auto: default_artist_auto(),
            artist_review: default_artist_review(),
            title_auto: default_title_auto(),
            title_review: default_title_review(),
            vector_strong: default_vector_strong(),
            vector_title_guard: None,
            title_vector: default_title_vector(),
            title_vector_dist: default_title_vector_dist(),
        }
    }
}

impl Thresholds {
    pub fn effective_vector_title_guard(&self) -> f64 {
        self.vector_title_guard.unwrap_or(self.title_review * 0.8)
    }

    pub fn validate(&self) -> Result<(), ThresholdError> {
        if self.artist_review > self.artist_auto || self.title_review > self.title_auto {
            return Err(ThresholdError::ReviewAboveAuto);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ThresholdError {
    #[error("Review thresholds must not exceed auto-accept thresholds.")]
    ReviewAboveAuto,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

const THRESHOLD_KEYS: &[(&str, fn(&Thresholds) -> f64)] = &[
    ("match_artist_auto", |t| t.artist_auto),
    ("match_artist_review", |t| t.artist_review),
    ("match_title_auto", |t| t.title_auto),
    ("match_title_review", |t| t.title_review),
    ("match_vector_strong", |t| t.vector_strong),
    ("match_title_vector", |t| t.title_vector),
    ("match_title_vector_dist", |t| t.title_vector_dist),
];

/// In-memory threshold snapshot with write-through persistence: updates hit
/// the settings table first, then swap the snapshot. Readers never see a
/// half-written state.
pub struct MatchSettings {
    inner: RwLock<Thresholds>,
}

impl MatchSettings {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { inner: RwLock::new(thresholds) }
    }

    /// Config-file defaults overlaid with whatever the settings table holds.
    pub async fn load(pool: &SqlitePool, defaults: Thresholds) -> Result<Self, ThresholdError> {
        let repo = SqlitePreferencesRepository::new();
        let stored = repo.settings_all(pool).await?;

        let mut thresholds = defaults;
        let parse = |key: &str| stored.get(key).and_then(|v| v.parse::<f64>().ok());

        if let Some(v) = parse("match_artist_auto") { thresholds.artist_auto = v; }
        if let Some(v) = parse("match_artist_review") { thresholds.artist_review = v; }
        if let Some(v) = parse("match_title_auto") { thresholds.title_auto = v; }
        if let Some(v) = parse("match_title_review") { thresholds.title_review = v; }
        if let Some(v) = parse("match_vector_strong") { thresholds.vector_strong = v; }
        if let Some(v) = parse("match_vector_title_guard") { thresholds.vector_title_guard = Some(v); }
        if let Some(v) = parse("match_title_vector") { thresholds.title_vector = v; }
        if let Some(v) = parse("match_title_vector_dist") { thresholds.title_vector_dist = v; }

        thresholds.validate()?;
        Ok(Self::new(thresholds))
    }

    pub fn snapshot(&self) -> Thresholds {
        *self.inner.read().expect("threshold lock poisoned")
    }

    /// Persists the new thresholds and swaps the snapshot. The derived
    /// vector-title-guard is recomputed and stored alongside, like the rest.
    pub async fn update(&self, pool: &SqlitePool, new: Thresholds) -> Result<(), ThresholdError> {
        new.validate()?;

        let repo = SqlitePreferencesRepository::new();
        let mut conn = pool.acquire().await.map_err(RepositoryError::from_sqlx_error)?;

        for (key, getter) in THRESHOLD_KEYS {
            repo.settings_set(&mut conn, key, &getter(&new).to_string()).await?;
        }
        repo.settings_set(
            &mut conn,
            "match_vector_title_guard",
            &new.effective_vector_title_guard().to_string(),
        ).await?;

        let mut guard = self.inner.write().expect("threshold lock poisoned");
        *guard = new;

        Ok(())
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigLoadingError> {
        let config_str = fs::read_to_string("config.toml").map_err(|err| ConfigLoadingError::FailedToReadConfig(err.to_string()))?;
        let config: Config = toml::from_str(&config_str)?;

        Ok(config)
    }
}

pub fn get_config() -> Result<&'static Config, ConfigLoadingError> {
    static CONFIG: OnceLock<Result<Config, ConfigLoadingError>> = OnceLock::new();

    let result = CONFIG.get_or_init(|| {
        Config::load()
    });

    match result {
        Ok(config) => Ok(config),
        Err(err) => Err(err.clone())
    }
}
