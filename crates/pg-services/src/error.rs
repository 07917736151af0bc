//! Error types for the pg-services crate.
//!
//! Every failure while provisioning a cluster or a template database is fatal
//! to the session setup, so a single semantic enum covers the whole chain.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while provisioning PostgreSQL for a test session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServicesError {
    /// A required PostgreSQL executable could not be located.
    #[error("can't find PostgreSQL {name}")]
    BinaryNotFound {
        /// Name of the executable that was looked up.
        name: String,
    },

    /// The executable was found but the process could not be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Description of the spawn failure.
        message: String,
    },

    /// A tool exited unsuccessfully.
    #[error("{command} {}:\n{stdout}\nand error:\n{stderr}", describe_exit(*.status))]
    CommandFailed {
        /// Rendered command line.
        command: String,
        /// Exit code, absent when the process was terminated by a signal.
        status: Option<i32>,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// A filesystem operation failed.
    #[error("filesystem error at '{path}': {message}")]
    Io {
        /// Path involved in the failed operation.
        path: Utf8PathBuf,
        /// Description of the I/O error.
        message: String,
    },

    /// The server did not accept connections within the readiness budget.
    #[error("{program} was not ready after {waited_ms} ms")]
    ReadinessTimeout {
        /// Program being waited on.
        program: String,
        /// Milliseconds spent polling.
        waited_ms: u128,
    },

    /// The server process exited before it became ready.
    #[error("{program} {} before becoming ready:\n{output}", describe_exit(*.status))]
    ServerExited {
        /// Program that exited.
        program: String,
        /// Exit code, absent when the process was terminated by a signal.
        status: Option<i32>,
        /// Tail of what the server wrote to stdout and stderr.
        output: String,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },
}

fn describe_exit(status: Option<i32>) -> String {
    status.map_or_else(
        || "was terminated by a signal".to_owned(),
        |code| format!("exited with status {code}"),
    )
}

impl ServicesError {
    pub(crate) fn io(path: impl Into<Utf8PathBuf>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
