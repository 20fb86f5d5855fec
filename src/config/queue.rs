//! Errata queue configuration.

use std::env;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::error::AppResult;

/// Default stack size for worker threads (2 MiB).
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Environment variable overriding `worker_count`.
pub const ENV_WORKER_COUNT: &str = "ERRATA_QUEUE_WORKERS";
/// Environment variable overriding `max_work_items`.
pub const ENV_MAX_WORK_ITEMS: &str = "ERRATA_QUEUE_MAX_WORK_ITEMS";
/// Environment variable overriding `thread_stack_size`.
pub const ENV_STACK_SIZE: &str = "ERRATA_QUEUE_STACK_SIZE";
/// Environment variable overriding `notification_delay_minutes`.
pub const ENV_NOTIFICATION_DELAY: &str = "ERRATA_QUEUE_NOTIFICATION_DELAY_MINUTES";

/// Configuration for the task queue and the errata scheduling cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of worker slots (and threads).
    pub worker_count: usize,
    /// Maximum queue rows selected per scheduling cycle.
    pub max_work_items: usize,
    /// Stack size for each worker thread, in bytes.
    pub thread_stack_size: usize,
    /// Worker thread name prefix; also used as the queue name in logs.
    pub thread_name_prefix: String,
    /// Delay written into notification markers.
    pub notification_delay_minutes: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            max_work_items: 100,
            thread_stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: "errata-queue".into(),
            notification_delay_minutes: 0,
        }
    }
}

impl QueueConfig {
    /// Configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker slots.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the per-cycle candidate limit.
    #[must_use]
    pub const fn with_max_work_items(mut self, max_work_items: usize) -> Self {
        self.max_work_items = max_work_items;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, thread_stack_size: usize) -> Self {
        self.thread_stack_size = thread_stack_size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the notification marker delay.
    #[must_use]
    pub const fn with_notification_delay_minutes(mut self, minutes: i64) -> Self {
        self.notification_delay_minutes = minutes;
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_work_items == 0 {
            return Err("max_work_items must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        if self.notification_delay_minutes < 0 {
            return Err("notification_delay_minutes must not be negative".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `ERRATA_QUEUE_*` environment overrides on top of `self`.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse.
    pub fn apply_env(mut self) -> Result<Self, String> {
        if let Some(v) = read_env(ENV_WORKER_COUNT)? {
            self.worker_count = v;
        }
        if let Some(v) = read_env(ENV_MAX_WORK_ITEMS)? {
            self.max_work_items = v;
        }
        if let Some(v) = read_env(ENV_STACK_SIZE)? {
            self.thread_stack_size = v;
        }
        if let Some(v) = read_env(ENV_NOTIFICATION_DELAY)? {
            self.notification_delay_minutes = v;
        }
        Ok(self)
    }

    /// Defaults overridden by the environment (loading `.env` first).
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let cfg = Self::default().apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("{name}: {e}")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(format!("{name}: {e}")),
    }
}

/// Load configuration from an optional JSON file, then apply environment
/// overrides (including a `.env` file, if present) and validate.
///
/// # Errors
///
/// Fails if the file cannot be read or parsed, an override is malformed, or
/// the result does not validate.
pub fn load(path: Option<&Path>) -> AppResult<QueueConfig> {
    let _ = dotenvy::dotenv();
    let base = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading queue config {}", path.display()))?;
            serde_json::from_str::<QueueConfig>(&raw)
                .with_context(|| format!("parsing queue config {}", path.display()))?
        }
        None => QueueConfig::default(),
    };
    let cfg = base.apply_env().map_err(anyhow::Error::msg)?;
    cfg.validate()
        .map_err(anyhow::Error::msg)
        .context("validating queue config")?;
    Ok(cfg)
}
