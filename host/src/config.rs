//! Host configuration, read from TOML.
//!
//! ```toml
//! call_queue_capacity = 64
//! inbound_capacity = 64
//! outbound_capacity = 64
//! completion_capacity = 256
//! unmatched_log = "warn"
//! pending_warn_threshold = 10000
//! ```
//!
//! Every key is optional. Capacities are non-zero by type.

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tether_engine::UnmatchedLog;
use thiserror::Error;

const DEFAULT_QUEUE_CAPACITY: NonZeroUsize = NonZeroUsize::new(64).unwrap();

const DEFAULT_COMPLETION_CAPACITY: NonZeroUsize = NonZeroUsize::new(256).unwrap();

const fn default_queue_capacity() -> NonZeroUsize {
    DEFAULT_QUEUE_CAPACITY
}

const fn default_completion_capacity() -> NonZeroUsize {
    DEFAULT_COMPLETION_CAPACITY
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Channel sizing and observability knobs for a [`Host`](crate::Host).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Bound on calls queued by handles but not yet dispatched.
    #[serde(default = "default_queue_capacity")]
    call_queue_capacity: NonZeroUsize,
    #[serde(default = "default_queue_capacity")]
    inbound_capacity: NonZeroUsize,
    #[serde(default = "default_queue_capacity")]
    outbound_capacity: NonZeroUsize,
    /// Bound on completed effects not yet read by the application.
    #[serde(default = "default_completion_capacity")]
    completion_capacity: NonZeroUsize,
    #[serde(default)]
    unmatched_log: UnmatchedLog,
    /// Warn whenever the pending count climbs to this value.
    #[serde(default)]
    pending_warn_threshold: Option<NonZeroUsize>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            call_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            inbound_capacity: DEFAULT_QUEUE_CAPACITY,
            outbound_capacity: DEFAULT_QUEUE_CAPACITY,
            completion_capacity: DEFAULT_COMPLETION_CAPACITY,
            unmatched_log: UnmatchedLog::default(),
            pending_warn_threshold: None,
        }
    }
}

impl HostConfig {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_unmatched_log(mut self, level: UnmatchedLog) -> Self {
        self.unmatched_log = level;
        self
    }

    pub fn with_pending_warn_threshold(mut self, threshold: NonZeroUsize) -> Self {
        self.pending_warn_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn call_queue_capacity(&self) -> usize {
        self.call_queue_capacity.get()
    }

    #[must_use]
    pub fn inbound_capacity(&self) -> usize {
        self.inbound_capacity.get()
    }

    #[must_use]
    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity.get()
    }

    #[must_use]
    pub fn completion_capacity(&self) -> usize {
        self.completion_capacity.get()
    }

    #[must_use]
    pub fn unmatched_log(&self) -> UnmatchedLog {
        self.unmatched_log
    }

    #[must_use]
    pub fn pending_warn_threshold(&self) -> Option<usize> {
        self.pending_warn_threshold.map(NonZeroUsize::get)
    }
}
