//! Exporter configuration.

use crate::error::ConfigError;
use crate::span::CanonicalCode;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Environment variable consulted by [`ExporterOptions::from_env`].
pub const INSTRUMENTATION_KEY_ENV: &str = "APPINSIGHTS_INSTRUMENTATIONKEY";

/// Mapping from canonical status codes to the result-code strings reported
/// when a span carries no HTTP status code.
///
/// `Ok` maps to `"0"` and `Unknown` to `"2"`. Every other code maps to its
/// registry number unless overridden.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultCodeTable {
    overrides: BTreeMap<CanonicalCode, String>,
}

impl ResultCodeTable {
    /// Replaces the result code reported for `code`.
    ///
    /// `Ok` and `Unknown` are fixed by the ingestion contract and cannot be
    /// overridden; attempts are ignored.
    pub fn with_code(mut self, code: CanonicalCode, result_code: impl Into<String>) -> Self {
        if !matches!(code, CanonicalCode::Ok | CanonicalCode::Unknown) {
            self.overrides.insert(code, result_code.into());
        }
        self
    }

    /// Result code string for a canonical status code.
    pub fn lookup(&self, code: CanonicalCode) -> String {
        self.overrides
            .get(&code)
            .cloned()
            .unwrap_or_else(|| (code as i32).to_string())
    }
}

/// Configuration for the local retry storage.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Cooldown before a freshly persisted batch becomes eligible for retry.
    ///
    /// Default: 60s
    pub minimum_retry_interval: Duration,

    /// How long a record stays hidden from other readers once claimed by
    /// `get()`. A retransmission that fails simply lets this lapse.
    ///
    /// Default: 15s
    pub claim_lease: Duration,

    /// Age after which an unfinished `.tmp` write is considered abandoned.
    ///
    /// Default: 60s
    pub write_timeout: Duration,

    /// Records older than this are dropped. `None` keeps records until they
    /// are delivered.
    ///
    /// Default: None
    pub retention_period: Option<Duration>,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            minimum_retry_interval: Duration::from_secs(60),
            claim_lease: Duration::from_secs(15),
            write_timeout: Duration::from_secs(60),
            retention_period: None,
        }
    }
}

impl StorageOptions {
    /// Sets the retry cooldown.
    pub fn with_minimum_retry_interval(mut self, interval: Duration) -> Self {
        self.minimum_retry_interval = interval;
        self
    }

    /// Sets the claim lease.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Sets the abandoned-write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the retention period.
    pub fn with_retention_period(mut self, retention: Duration) -> Self {
        self.retention_period = Some(retention);
        self
    }
}

/// Top-level exporter configuration.
#[derive(Debug, Clone)]
pub struct ExporterOptions {
    /// Instrumentation key copied into every envelope.
    pub instrumentation_key: String,
    /// Root directory of the retry storage, created if absent.
    pub storage_path: PathBuf,
    /// Retry storage behavior.
    pub storage: StorageOptions,
    /// Canonical status to result-code mapping.
    pub result_codes: ResultCodeTable,
}

impl ExporterOptions {
    /// Options for `instrumentation_key` with the default storage location
    /// under the system temp directory.
    pub fn new(instrumentation_key: impl Into<String>) -> Self {
        let instrumentation_key = instrumentation_key.into();
        let storage_path = default_storage_path(&instrumentation_key);
        Self {
            instrumentation_key,
            storage_path,
            storage: StorageOptions::default(),
            result_codes: ResultCodeTable::default(),
        }
    }

    /// Reads the instrumentation key from `APPINSIGHTS_INSTRUMENTATIONKEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let key = std::env::var(INSTRUMENTATION_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingInstrumentationKey)?;
        Ok(Self::new(key.trim()))
    }

    /// Sets the storage root.
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    /// Sets the storage options.
    pub fn with_storage(mut self, storage: StorageOptions) -> Self {
        self.storage = storage;
        self
    }

    /// Sets the result-code table.
    pub fn with_result_codes(mut self, result_codes: ResultCodeTable) -> Self {
        self.result_codes = result_codes;
        self
    }

    /// Checks the options before an exporter is built from them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instrumentation_key.trim().is_empty() {
            return Err(ConfigError::MissingInstrumentationKey);
        }
        if Uuid::parse_str(&self.instrumentation_key).is_err() {
            return Err(ConfigError::InvalidInstrumentationKey(
                self.instrumentation_key.clone(),
            ));
        }
        if self.storage.claim_lease.is_zero() {
            return Err(ConfigError::InvalidDuration {
                field: "claim_lease",
                reason: "must be greater than zero",
            });
        }
        if self.storage.retention_period.is_some_and(|r| r.is_zero()) {
            return Err(ConfigError::InvalidDuration {
                field: "retention_period",
                reason: "must be greater than zero when set",
            });
        }
        Ok(())
    }
}

fn default_storage_path(instrumentation_key: &str) -> PathBuf {
    std::env::temp_dir().join(format!("azure-monitor-exporter-{instrumentation_key}"))
}
