//! Content-addressed template databases.
//!
//! A template database is named after the MD5 digest of the SQL script that
//! populates it, so an unchanged script maps to a database that already
//! exists and can be cloned without re-running the script. New templates are
//! built under a `-tmp` name and only renamed into place once the script has
//! run to completion inside a single transaction.
//!
//! Existence is checked by running the readiness query against the template
//! name, which cannot tell a missing database from an unreachable one. Within
//! one process the check-then-create sequence is serialised; sessions in
//! separate processes can still race on the same name.

use std::sync::{Arc, Mutex, OnceLock};

use camino::Utf8Path;
use cap_std::ambient_authority;
use cap_std::fs::Dir;
use md5::{Digest, Md5};
use tracing::{debug, info};

use crate::command::{CommandRunner, Invocation, run_checked};
use crate::error::ServicesError;
use crate::readiness::{DEFAULT_DATABASE, ReadinessChecker};

/// Prefix shared by every template database name.
pub const TEMPLATE_NAME_PREFIX: &str = "pytest-services-template-";

const SCRATCH_SUFFIX: &str = "-tmp";
const RUNNING_SUFFIX: &str = "-running";

static TEMPLATE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Template database name for a setup script's bytes.
///
/// # Examples
///
/// ```
/// use pg_services::template_database_name;
///
/// assert_eq!(
///     template_database_name(b"CREATE TABLE example (x int)"),
///     "pytest-services-template-1425fb5b3fe9188c08adefcccfee0d22"
/// );
/// ```
#[must_use]
pub fn template_database_name(setup_sql: &[u8]) -> String {
    let digest = Md5::digest(setup_sql);
    format!("{TEMPLATE_NAME_PREFIX}{}", hex::encode(digest))
}

/// Name of the scratch database a template is built in.
#[must_use]
pub fn scratch_database_name(template: &str) -> String {
    format!("{template}{SCRATCH_SUFFIX}")
}

/// Name of the working database cloned from `template`.
#[must_use]
pub fn running_database_name(template: &str) -> String {
    format!("{template}{RUNNING_SUFFIX}")
}

/// Read a setup script through a capability handle on its parent directory.
///
/// # Errors
///
/// Returns [`ServicesError::Io`] when the file cannot be read.
pub fn read_setup_script(path: &Utf8Path) -> Result<Vec<u8>, ServicesError> {
    let Some(file_name) = path.file_name() else {
        return Err(ServicesError::Io {
            path: path.to_owned(),
            message: "setup script path must name a file".to_owned(),
        });
    };
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| ServicesError::io(parent, &err))?;
    dir.read(file_name).map_err(|err| ServicesError::io(path, &err))
}

/// Creates template databases on one server and clones working copies.
#[derive(Clone)]
pub struct TemplateCache {
    runner: Arc<dyn CommandRunner>,
    host: String,
}

impl TemplateCache {
    /// Cache operating against the server reachable at `host`.
    pub fn new(runner: Arc<dyn CommandRunner>, host: impl Into<String>) -> Self {
        Self {
            runner,
            host: host.into(),
        }
    }

    /// Host passed to every tool invocation.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// True when the readiness query succeeds against `database`.
    #[must_use]
    pub fn database_exists(&self, database: &str) -> bool {
        ReadinessChecker::new(Arc::clone(&self.runner), self.host.as_str())
            .with_database(database)
            .is_ready()
    }

    /// Make sure the template for the script at `setup_sql` exists and
    /// return its name.
    ///
    /// # Errors
    ///
    /// Returns the first failing step. Nothing is rolled back; a scratch
    /// database left behind is recreated by the next attempt.
    pub fn ensure_template(&self, setup_sql: &Utf8Path) -> Result<String, ServicesError> {
        let script = read_setup_script(setup_sql)?;
        let name = template_database_name(&script);

        let _lock = TEMPLATE_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|err| err.into_inner());

        if self.database_exists(&name) {
            debug!(template = %name, "template database already exists");
            return Ok(name);
        }

        let scratch = scratch_database_name(&name);
        self.create_scratch_database(&scratch)?;

        debug!(template = %name, script = %setup_sql, "populating template database");
        run_checked(
            self.runner.as_ref(),
            &Invocation::new("psql").args([
                "-1",
                "-v",
                "ON_ERROR_STOP=1",
                "-h",
                self.host.as_str(),
                "-f",
                setup_sql.as_str(),
                scratch.as_str(),
            ]),
        )?;

        let rename = format!("ALTER DATABASE \"{scratch}\" RENAME TO \"{name}\"");
        run_checked(
            self.runner.as_ref(),
            &Invocation::new("psql").args([
                "-h",
                self.host.as_str(),
                "-c",
                rename.as_str(),
                DEFAULT_DATABASE,
            ]),
        )?;

        info!(template = %name, "template database created");
        Ok(name)
    }

    /// Create `database` as a copy of `template`.
    ///
    /// # Errors
    ///
    /// Returns [`ServicesError::CommandFailed`] when `createdb` fails.
    pub fn clone_database(&self, template: &str, database: &str) -> Result<(), ServicesError> {
        debug!(%template, %database, "cloning database from template");
        run_checked(
            self.runner.as_ref(),
            &Invocation::new("createdb")
                .args(["-h", self.host.as_str(), "-T", template, database]),
        )
        .map(drop)
    }

    /// Drop `database` if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`ServicesError::CommandFailed`] when `dropdb` fails.
    pub fn drop_database(&self, database: &str) -> Result<(), ServicesError> {
        run_checked(
            self.runner.as_ref(),
            &Invocation::new("dropdb")
                .args(["-h", self.host.as_str(), "--if-exists", database]),
        )
        .map(drop)
    }

    /// Replace the `-running` working copy of `template` with a fresh clone
    /// and return its name.
    ///
    /// # Errors
    ///
    /// Returns the failing `dropdb` or `createdb` step.
    pub fn create_running_database(&self, template: &str) -> Result<String, ServicesError> {
        let database = running_database_name(template);
        self.drop_database(&database)?;
        self.clone_database(template, &database)?;
        Ok(database)
    }

    fn create_scratch_database(&self, scratch: &str) -> Result<(), ServicesError> {
        let create = Invocation::new("createdb").args(["-h", self.host.as_str(), scratch]);
        if let Err(err) = run_checked(self.runner.as_ref(), &create) {
            debug!(database = %scratch, error = %err, "recreating leftover scratch database");
            run_checked(
                self.runner.as_ref(),
                &Invocation::new("dropdb").args(["-h", self.host.as_str(), scratch]),
            )?;
            run_checked(self.runner.as_ref(), &create)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for TemplateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateCache")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}
