//! Ephemeral PostgreSQL clusters and template databases for test suites.
//!
//! This crate shells out to the standard PostgreSQL tools to give a test
//! session its own server and a cache of pre-populated template databases.
//!
//! # Overview
//!
//! - [`PostgresSession`] creates a private data directory, runs `initdb`,
//!   starts `postgres` under a [`Watcher`] and blocks until the
//!   [`ReadinessChecker`] sees the server answer queries. A configured host
//!   (or `PGHOST`) skips all of that.
//! - [`TemplateCache`] names a template database after the MD5 digest of its
//!   setup script, builds it once under a scratch name and renames it into
//!   place, so later runs with the same script reuse it.
//!
//! # Prerequisites
//!
//! `initdb`, `postgres`, `psql`, `createdb` and `dropdb` must be on `PATH` or
//! in the directory named by `PG_SERVICES_BIN_DIR`.
//!
//! # Example
//!
//! ```no_run
//! use pg_services::{PostgresSession, ServicesSettings};
//!
//! let settings = ServicesSettings::load()?;
//! let session = PostgresSession::start(&settings)?;
//! let script = session.write_setup_sql("CREATE TABLE example (x int)")?;
//! let cache = session.template_cache();
//! let template = cache.ensure_template(&script)?;
//! let database = cache.create_running_database(&template)?;
//! assert!(session.checker(&database).is_ready());
//! # Ok::<(), pg_services::ServicesError>(())
//! ```

pub mod cli;
mod command;
mod config;
mod data_dir;
mod error;
mod initdb;
mod provision;
mod readiness;
mod setup_sql;
mod template;
mod watcher;

pub use command::{
    CommandOutput, CommandRunner, Invocation, SystemRunner, resolve_binary, run_checked,
};
pub use config::{PGHOST_VAR, ServicesSettings};
pub use data_dir::{DATA_DIR_NAME, DataDir};
pub use error::ServicesError;
pub use initdb::{initdb, initdb_invocation};
pub use provision::{PostgresSession, server_spec};
pub use readiness::{DEFAULT_DATABASE, READY_MARKER, READY_QUERY, ReadinessChecker};
pub use setup_sql::{DEFAULT_SETUP_SQL, SETUP_SQL_FILE, write_default_setup_sql, write_setup_sql};
pub use template::{
    TEMPLATE_NAME_PREFIX, TemplateCache, read_setup_script, running_database_name,
    scratch_database_name, template_database_name,
};
pub use watcher::{
    DEFAULT_POLL_INTERVAL, DEFAULT_READINESS_TIMEOUT, DEFAULT_STOP_TIMEOUT, ProcessWatcher,
    ServiceSpec, Shutdown, Watcher,
};
