//! Session-scoped PostgreSQL provisioning.
//!
//! [`PostgresSession`] resolves the host every other helper talks to. When a
//! host is configured it is used as-is; otherwise a private cluster is
//! initialised in the session directory and started under a [`Watcher`],
//! with the Unix socket placed in the data directory so the data directory
//! doubles as the `psql -h` host.
//!
//! Dropping the session stops the server before removing its files.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;
use tracing::info;

use crate::command::{CommandRunner, SystemRunner};
use crate::config::ServicesSettings;
use crate::data_dir::DataDir;
use crate::error::ServicesError;
use crate::initdb::initdb;
use crate::readiness::ReadinessChecker;
use crate::setup_sql::{write_default_setup_sql, write_setup_sql};
use crate::template::TemplateCache;
use crate::watcher::{ProcessWatcher, ServiceSpec, Watcher};

const SESSION_DIR_PREFIX: &str = "pg-services-";

/// The `postgres` server command for a cluster in `data_dir`.
///
/// ```text
/// postgres -D <dir> -k <dir> -F -h "" --log_min_messages=PANIC
/// ```
///
/// | Flag                        | Purpose                                  |
/// |-----------------------------|------------------------------------------|
/// | `-D <dir>`                  | Cluster to serve                         |
/// | `-k <dir>`                  | Unix socket directory                    |
/// | `-F`                        | Disable `fsync`                          |
/// | `-h ""`                     | No TCP listener; sockets only            |
/// | `--log_min_messages=PANIC`  | Keep the server quiet                    |
#[must_use]
pub fn server_spec(data_dir: &Utf8Path) -> ServiceSpec {
    ServiceSpec::new(
        "postgres",
        [
            "-D",
            data_dir.as_str(),
            "-k",
            data_dir.as_str(),
            "-F",
            "-h",
            "",
            "--log_min_messages=PANIC",
        ],
    )
}

/// A provisioned PostgreSQL host plus the session directory around it.
pub struct PostgresSession {
    // Field order is drop order: stop the server, then delete its files.
    watcher: Option<Box<dyn Watcher>>,
    data_dir: Option<DataDir>,
    _scratch: Option<TempDir>,
    base_dir: Utf8PathBuf,
    host: String,
    runner: Arc<dyn CommandRunner>,
}

impl PostgresSession {
    /// Provision using real processes configured from `settings`.
    ///
    /// # Errors
    ///
    /// Returns the first failing step: directory setup, `initdb`, or the
    /// server never becoming ready.
    pub fn start(settings: &ServicesSettings) -> Result<Self, ServicesError> {
        let bin_dir = settings.bin_dir()?;
        let runner = Arc::new(SystemRunner::with_bin_dir(bin_dir.clone()));
        let watcher = ProcessWatcher::new(bin_dir)
            .with_timeout(settings.readiness_timeout())
            .with_poll_interval(settings.poll_interval());
        Self::start_with(settings, runner, Box::new(watcher))
    }

    /// Provision with explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns the first failing step: directory setup, `initdb`, or the
    /// watcher failing to bring the server up.
    pub fn start_with(
        settings: &ServicesSettings,
        runner: Arc<dyn CommandRunner>,
        mut watcher: Box<dyn Watcher>,
    ) -> Result<Self, ServicesError> {
        let (scratch, base_dir) = session_base(settings)?;

        if let Some(host) = settings.host() {
            info!(%host, "using configured PostgreSQL host");
            return Ok(Self {
                watcher: None,
                data_dir: None,
                _scratch: scratch,
                base_dir,
                host: host.to_owned(),
                runner,
            });
        }

        let data_dir = DataDir::create(&base_dir)?;
        initdb(runner.as_ref(), data_dir.path())?;

        let checker = ReadinessChecker::new(Arc::clone(&runner), data_dir.path().as_str());
        watcher.start(&server_spec(data_dir.path()), &mut || checker.is_ready())?;
        info!(data_dir = %data_dir.path(), "PostgreSQL is accepting connections");

        Ok(Self {
            host: data_dir.path().to_string(),
            watcher: Some(watcher),
            data_dir: Some(data_dir),
            _scratch: scratch,
            base_dir,
            runner,
        })
    }

    /// Host to pass to `psql -h` and friends.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// True when the session reuses a configured server.
    #[must_use]
    pub const fn is_external(&self) -> bool {
        self.watcher.is_none()
    }

    /// Directory holding the cluster and the setup script.
    #[must_use]
    pub fn base_dir(&self) -> &Utf8Path {
        &self.base_dir
    }

    /// Cluster directory, absent for configured hosts.
    #[must_use]
    pub fn data_dir(&self) -> Option<&Utf8Path> {
        self.data_dir.as_ref().map(DataDir::path)
    }

    /// Readiness probe against `database` on this host.
    #[must_use]
    pub fn checker(&self, database: &str) -> ReadinessChecker {
        ReadinessChecker::new(Arc::clone(&self.runner), self.host.as_str())
            .with_database(database)
    }

    /// Template cache bound to this host.
    #[must_use]
    pub fn template_cache(&self) -> TemplateCache {
        TemplateCache::new(Arc::clone(&self.runner), self.host.as_str())
    }

    /// Write `contents` as the session's `setup.sql`.
    ///
    /// # Errors
    ///
    /// Returns [`ServicesError::Io`] when the file cannot be written.
    pub fn write_setup_sql(&self, contents: &str) -> Result<Utf8PathBuf, ServicesError> {
        write_setup_sql(&self.base_dir, contents)
    }

    /// Write the default `setup.sql` and make sure its template exists.
    ///
    /// # Errors
    ///
    /// Returns the failing write or template step.
    pub fn default_template(&self) -> Result<String, ServicesError> {
        let script = write_default_setup_sql(&self.base_dir)?;
        self.template_cache().ensure_template(&script)
    }
}

impl std::fmt::Debug for PostgresSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSession")
            .field("host", &self.host)
            .field("base_dir", &self.base_dir)
            .field("external", &self.is_external())
            .finish_non_exhaustive()
    }
}

fn session_base(
    settings: &ServicesSettings,
) -> Result<(Option<TempDir>, Utf8PathBuf), ServicesError> {
    if let Some(base) = settings.base_dir()? {
        return Ok((None, base));
    }
    let scratch = tempfile::Builder::new()
        .prefix(SESSION_DIR_PREFIX)
        .tempdir()
        .map_err(|err| {
            ServicesError::io(std::env::temp_dir().to_string_lossy().into_owned(), &err)
        })?;
    let base = Utf8PathBuf::from_path_buf(scratch.path().to_path_buf()).map_err(|raw| {
        ServicesError::Config {
            message: format!("session directory is not valid UTF-8: {}", raw.display()),
        }
    })?;
    Ok((Some(scratch), base))
}
