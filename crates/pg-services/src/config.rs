//! Session configuration loaded via OrthoConfig.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::error::ServicesError;

/// Standard libpq variable naming an already running server.
pub const PGHOST_VAR: &str = "PGHOST";

/// Configuration values controlling how PostgreSQL is provisioned.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "PG_SERVICES")]
pub struct ServicesSettings {
    /// Host of an existing server; local provisioning is skipped when set.
    pub host: Option<String>,
    /// Directory holding the cluster and the setup script.
    pub base_dir: Option<PathBuf>,
    /// Directory searched for the PostgreSQL tools before `PATH`.
    pub bin_dir: Option<PathBuf>,
    /// Milliseconds to wait for the server to accept connections.
    #[ortho_config(default = 30_000)]
    pub readiness_timeout_ms: u64,
    /// Milliseconds between readiness polls.
    #[ortho_config(default = 100)]
    pub poll_interval_ms: u64,
}

impl Default for ServicesSettings {
    fn default() -> Self {
        Self {
            host: None,
            base_dir: None,
            bin_dir: None,
            readiness_timeout_ms: 30_000,
            poll_interval_ms: 100,
        }
    }
}

impl ServicesSettings {
    /// Load settings from `PG_SERVICES_*` variables and configuration files,
    /// falling back to `PGHOST` for the host.
    ///
    /// # Errors
    ///
    /// Returns [`ServicesError::Config`] when the sources cannot be merged.
    pub fn load() -> Result<Self, ServicesError> {
        let settings = Self::load_from_iter([OsString::from("pg-services")]).map_err(|err| {
            ServicesError::Config {
                message: err.to_string(),
            }
        })?;
        Ok(settings.with_pghost(std::env::var(PGHOST_VAR).ok()))
    }

    /// Use `pghost` as the host unless one is configured explicitly.
    ///
    /// Empty values are ignored, matching how libpq treats an empty `PGHOST`.
    #[must_use]
    pub fn with_pghost(mut self, pghost: Option<String>) -> Self {
        if self.host.is_none() {
            self.host = pghost.filter(|value| !value.is_empty());
        }
        self
    }

    /// Configured external host, if any.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Configured base directory as a UTF-8 path.
    ///
    /// # Errors
    ///
    /// Returns [`ServicesError::Config`] when the path is not valid UTF-8.
    pub fn base_dir(&self) -> Result<Option<Utf8PathBuf>, ServicesError> {
        utf8_path(self.base_dir.as_ref(), "base_dir")
    }

    /// Configured tool directory as a UTF-8 path.
    ///
    /// # Errors
    ///
    /// Returns [`ServicesError::Config`] when the path is not valid UTF-8.
    pub fn bin_dir(&self) -> Result<Option<Utf8PathBuf>, ServicesError> {
        utf8_path(self.bin_dir.as_ref(), "bin_dir")
    }

    /// How long the watcher waits for the server to accept connections.
    #[must_use]
    pub const fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    /// Delay between readiness polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn utf8_path(
    path: Option<&PathBuf>,
    field: &str,
) -> Result<Option<Utf8PathBuf>, ServicesError> {
    path.map(|value| {
        Utf8PathBuf::from_path_buf(value.clone()).map_err(|raw| ServicesError::Config {
            message: format!("{field} is not valid UTF-8: {}", raw.display()),
        })
    })
    .transpose()
}
