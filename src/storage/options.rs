use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::storage::index::DEFAULT_HEAD_BATCH;
use crate::storage::replay::MAX_REPLAY_VERSIONS;
use crate::types::{LogIndexError, Result};

/// Background vacuum configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VacuumCfg {
    /// Number of worker threads started by [`super::VacuumDaemon`].
    pub workers: usize,
    /// Sleep between bucket visits.
    pub tick_interval: Duration,
    /// Minimum spacing between two full passes over the same bucket.
    pub bucket_cooldown: Duration,
    /// Minimum spacing between two consolidation attempts on the same head.
    pub head_cooldown: Duration,
    /// Heads snapshotted per structural-lock hold.
    pub batch_size: usize,
    /// Cap on LSNs folded into one consolidated image.
    pub max_replay_versions: usize,
}

impl Default for VacuumCfg {
    fn default() -> Self {
        Self {
            workers: 1,
            tick_interval: Duration::from_millis(1),
            bucket_cooldown: Duration::from_secs(60),
            head_cooldown: Duration::from_secs(120),
            batch_size: DEFAULT_HEAD_BATCH,
            max_replay_versions: MAX_REPLAY_VERSIONS,
        }
    }
}

impl VacuumCfg {
    /// Sets the worker thread count.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the sleep between bucket visits.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the per-bucket cooldown.
    pub fn bucket_cooldown(mut self, cooldown: Duration) -> Self {
        self.bucket_cooldown = cooldown;
        self
    }

    /// Sets the per-head cooldown.
    pub fn head_cooldown(mut self, cooldown: Duration) -> Self {
        self.head_cooldown = cooldown;
        self
    }

    /// Sets the head snapshot batch size.
    pub fn batch_size(mut self, batch: usize) -> Self {
        self.batch_size = batch;
        self
    }

    /// Sets the per-pass replay cap.
    pub fn max_replay_versions(mut self, max: usize) -> Self {
        self.max_replay_versions = max;
        self
    }

    /// Rejects settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(LogIndexError::Config("vacuum.workers must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(LogIndexError::Config(
                "vacuum.batch_size must be positive".into(),
            ));
        }
        if self.max_replay_versions == 0 {
            return Err(LogIndexError::Config(
                "vacuum.max_replay_versions must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Parses the `[vacuum]` table of a TOML document. Missing keys keep
    /// their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(src).map_err(|err| LogIndexError::Config(err.to_string()))?;
        let cfg = raw.vacuum.apply(Self::default());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads and parses a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            LogIndexError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    vacuum: RawVacuum,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVacuum {
    workers: Option<usize>,
    tick_interval_ms: Option<u64>,
    bucket_cooldown_ms: Option<u64>,
    head_cooldown_ms: Option<u64>,
    batch_size: Option<usize>,
    max_replay_versions: Option<usize>,
}

impl RawVacuum {
    fn apply(self, mut cfg: VacuumCfg) -> VacuumCfg {
        if let Some(workers) = self.workers {
            cfg.workers = workers;
        }
        if let Some(ms) = self.tick_interval_ms {
            cfg.tick_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.bucket_cooldown_ms {
            cfg.bucket_cooldown = Duration::from_millis(ms);
        }
        if let Some(ms) = self.head_cooldown_ms {
            cfg.head_cooldown = Duration::from_millis(ms);
        }
        if let Some(batch) = self.batch_size {
            cfg.batch_size = batch;
        }
        if let Some(max) = self.max_replay_versions {
            cfg.max_replay_versions = max;
        }
        cfg
    }
}
