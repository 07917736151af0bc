//! Shared helpers for integration tests that need real PostgreSQL tools.
//!
//! Suites that depend on a live cluster can be skipped in environments where
//! the cluster cannot be started. Missing binaries and running as root (which
//! `initdb` refuses) always skip; any other setup failure panics unless
//! `SKIP_TEST_CLUSTER` is truthy, so CI breakage is not masked.

use pg_services::{PostgresSession, ServicesError, ServicesSettings, resolve_binary};

const REQUIRED_TOOLS: [&str; 5] = ["initdb", "postgres", "psql", "createdb", "dropdb"];

/// Returns true when the `SKIP_TEST_CLUSTER` environment variable is set to a
/// truthy value ("1", "true", "yes", case-insensitive).
pub fn should_skip_test_cluster() -> bool {
    std::env::var("SKIP_TEST_CLUSTER")
        .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn skip<T>(reason: impl std::fmt::Display) -> Option<T> {
    eprintln!("SKIP-TEST-CLUSTER: {reason}");
    None
}

fn refuses_root(err: &ServicesError) -> bool {
    matches!(err, ServicesError::CommandFailed { stderr, .. } if stderr.contains("root"))
}

/// Settings for a private cluster, ignoring any `PGHOST` in the environment.
pub fn local_settings() -> ServicesSettings {
    ServicesSettings {
        readiness_timeout_ms: 60_000,
        poll_interval_ms: 50,
        ..ServicesSettings::default()
    }
}

/// Start a private cluster, or return `None` when the environment cannot
/// host one.
pub fn local_session() -> Option<PostgresSession> {
    if let Some(missing) = REQUIRED_TOOLS
        .iter()
        .find(|tool| resolve_binary(tool, None).is_err())
    {
        return skip(format!("{missing} is not installed"));
    }

    match PostgresSession::start(&local_settings()) {
        Ok(session) => Some(session),
        Err(err) if refuses_root(&err) => skip(format!("initdb refuses to run as root: {err}")),
        Err(err) if should_skip_test_cluster() => skip(err),
        Err(err) => {
            panic!("Test cluster setup failed: {err}. Set SKIP_TEST_CLUSTER=1 to skip.")
        }
    }
}
