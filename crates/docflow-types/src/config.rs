//! Configuration types for docflow.
//!
//! `DocflowConfig` represents `docflow.toml` in the data directory: queue
//! layout, activity routing, per-activity retry policy, engine timing and
//! collaborator endpoints. Every field has a default matching a single-host
//! deployment, so an empty file is a valid configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::workflow::{ActivityType, RetryPolicy};

/// Queue that holds PDF extraction tasks by default.
pub const PDF_EXTRACTION_QUEUE: &str = "pdf-extraction";
/// Queue that holds OCR and NER tasks by default.
pub const ML_PROCESSING_QUEUE: &str = "ml-processing";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocflowConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    /// Queue name -> queue settings.
    #[serde(default = "default_queues")]
    pub queues: BTreeMap<String, QueueConfig>,

    #[serde(default)]
    pub routes: RouteConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub services: ServicesConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for DocflowConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            queues: default_queues(),
            routes: RouteConfig::default(),
            retry: RetryConfig::default(),
            services: ServicesConfig::default(),
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

fn default_queues() -> BTreeMap<String, QueueConfig> {
    BTreeMap::from([
        (PDF_EXTRACTION_QUEUE.to_string(), QueueConfig { max_concurrency: 5 }),
        (ML_PROCESSING_QUEUE.to_string(), QueueConfig { max_concurrency: 10 }),
    ])
}

impl DocflowConfig {
    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, queue) in &self.queues {
            if queue.max_concurrency == 0 {
                return Err(ConfigError::ZeroConcurrency(name.clone()));
            }
        }

        for activity in ActivityType::ALL {
            let queue = self.routes.queue_for(activity);
            if queue.is_empty() {
                return Err(ConfigError::MissingRoute(activity.to_string()));
            }
            if !self.queues.contains_key(queue) {
                return Err(ConfigError::UnknownQueue {
                    activity: activity.to_string(),
                    queue: queue.to_string(),
                });
            }

            let policy = self.retry.policy_for(activity);
            if policy.max_attempts == 0 {
                return Err(ConfigError::ZeroAttempts(activity.to_string()));
            }
            if policy.multiplier < 1.0 {
                return Err(ConfigError::Invalid {
                    field: format!("retry.{activity}.multiplier"),
                    reason: "must be at least 1.0".to_string(),
                });
            }
            if policy.attempt_timeout_secs == 0 {
                return Err(ConfigError::Invalid {
                    field: format!("retry.{activity}.attempt_timeout_secs"),
                    reason: "must be greater than zero".to_string(),
                });
            }
            // The lease is renewed after each attempt and must outlive the backoff.
            if Duration::from_millis(policy.max_backoff_ms) >= self.visibility_timeout(activity) {
                return Err(ConfigError::Invalid {
                    field: format!("retry.{activity}.max_backoff_ms"),
                    reason: "must be shorter than the lease visibility timeout \
                             (attempt_timeout_secs + engine.lease_margin_secs)"
                        .to_string(),
                });
            }
        }

        if self.engine.lease_margin_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "engine.lease_margin_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.database.reader_connections == 0 {
            return Err(ConfigError::Invalid {
                field: "database.reader_connections".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.engine.run_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "engine.run_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Lease visibility timeout for an activity: its attempt deadline plus
    /// the configured margin, so a live attempt is never reclaimed.
    pub fn visibility_timeout(&self, activity: ActivityType) -> Duration {
        self.retry.policy_for(activity).attempt_timeout()
            + Duration::from_secs(self.engine.lease_margin_secs)
    }
}

/// Engine timing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Overall deadline for one run, measured from submission (default 3600).
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// How often a driver re-evaluates a run without a wake-up event (default 500).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Added to the attempt deadline to form the lease visibility timeout (default 30).
    #[serde(default = "default_lease_margin_secs")]
    pub lease_margin_secs: u64,
}

fn default_run_timeout_secs() -> u64 {
    3_600
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_lease_margin_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_margin_secs: default_lease_margin_secs(),
        }
    }
}

impl EngineConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Settings for one named task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of unexpired leases held at once.
    pub max_concurrency: u32,
}

/// Activity type -> queue name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    #[serde(default = "default_pdf_queue")]
    pub extract: String,
    #[serde(default = "default_ml_queue")]
    pub ocr: String,
    #[serde(default = "default_ml_queue")]
    pub ner: String,
}

fn default_pdf_queue() -> String {
    PDF_EXTRACTION_QUEUE.to_string()
}

fn default_ml_queue() -> String {
    ML_PROCESSING_QUEUE.to_string()
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            extract: default_pdf_queue(),
            ocr: default_ml_queue(),
            ner: default_ml_queue(),
        }
    }
}

impl RouteConfig {
    pub fn queue_for(&self, activity: ActivityType) -> &str {
        match activity {
            ActivityType::Extract => &self.extract,
            ActivityType::Ocr => &self.ocr,
            ActivityType::Ner => &self.ner,
        }
    }
}

/// Per-activity retry policies.
///
/// A table that is present but partial falls back to the `RetryPolicy`
/// field defaults, not to the activity-specific defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_extract_policy")]
    pub extract: RetryPolicy,
    #[serde(default)]
    pub ocr: RetryPolicy,
    #[serde(default)]
    pub ner: RetryPolicy,
}

fn default_extract_policy() -> RetryPolicy {
    RetryPolicy::with_attempt_timeout(300)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            extract: default_extract_policy(),
            ocr: RetryPolicy::default(),
            ner: RetryPolicy::default(),
        }
    }
}

impl RetryConfig {
    pub fn policy_for(&self, activity: ActivityType) -> &RetryPolicy {
        match activity {
            ActivityType::Extract => &self.extract,
            ActivityType::Ocr => &self.ocr,
            ActivityType::Ner => &self.ner,
        }
    }
}

/// Endpoints of the OCR and NER collaborator services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_ocr_url")]
    pub ocr_url: String,

    #[serde(default = "default_ner_url")]
    pub ner_url: String,

    /// Directory holding the pdfium shared library; system lookup when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdfium_path: Option<PathBuf>,
}

fn default_ocr_url() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_ner_url() -> String {
    "http://127.0.0.1:8002".to_string()
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            ocr_url: default_ocr_url(),
            ner_url: default_ner_url(),
            pdfium_path: None,
        }
    }
}

/// Locations of durable state. Relative to the data directory when unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

/// SQLite connection settings. `serve` and `worker` processes on one host
/// share the database file, so writers wait on each other's locks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// How long a connection waits for another process's write lock (default 5000).
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Size of the read-only connection pool (default 8).
    #[serde(default = "default_reader_connections")]
    pub reader_connections: u32,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_reader_connections() -> u32 {
    8
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            reader_connections: default_reader_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
