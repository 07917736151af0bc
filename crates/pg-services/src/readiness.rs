//! Readiness probe for a PostgreSQL server.
//!
//! The server starts listening on its socket before it is fully able to serve
//! queries, so waiting for the socket file is not enough. Instead the probe
//! runs a trivial query and only reports ready once `psql` exits cleanly and
//! prints the expected literal.

use std::sync::Arc;

use tracing::debug;

use crate::command::{CommandRunner, Invocation};

/// Query issued by the probe.
pub const READY_QUERY: &str = "SELECT 'YAY';";

/// Literal the probe expects on stdout.
pub const READY_MARKER: &str = "YAY";

/// Maintenance database every cluster carries.
pub const DEFAULT_DATABASE: &str = "postgres";

/// Polling predicate reporting whether a database accepts queries.
///
/// The checker performs a single attempt per call; retries belong to
/// whoever polls it.
#[derive(Clone)]
pub struct ReadinessChecker {
    runner: Arc<dyn CommandRunner>,
    host: String,
    database: String,
}

impl ReadinessChecker {
    /// Checker against the maintenance database on `host`.
    pub fn new(runner: Arc<dyn CommandRunner>, host: impl Into<String>) -> Self {
        Self {
            runner,
            host: host.into(),
            database: DEFAULT_DATABASE.to_owned(),
        }
    }

    /// Target `database` instead of the maintenance database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Database the probe connects to.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The `psql` invocation used by [`ReadinessChecker::is_ready`].
    #[must_use]
    pub fn invocation(&self) -> Invocation {
        Invocation::new("psql").args([
            "-h",
            self.host.as_str(),
            "-c",
            READY_QUERY,
            "-t",
            "-A",
            self.database.as_str(),
        ])
    }

    /// Run the probe once.
    ///
    /// Tools that cannot be found or started count as "not ready".
    #[must_use]
    pub fn is_ready(&self) -> bool {
        match self.runner.run(&self.invocation()) {
            Ok(output) => output.success() && output.stdout.contains(READY_MARKER),
            Err(err) => {
                debug!(error = %err, database = %self.database, "readiness probe could not run");
                false
            }
        }
    }
}

impl std::fmt::Debug for ReadinessChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessChecker")
            .field("host", &self.host)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}
