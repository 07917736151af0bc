//! Argument parsing and command logic for the `pg-services` binary.
//!
//! The binary only installs logging, parses [`Cli`] and delegates here, so the
//! commands can be exercised without spawning a process.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::command::CommandRunner;
use crate::config::ServicesSettings;
use crate::error::ServicesError;
use crate::template::TemplateCache;

/// Ephemeral PostgreSQL clusters and template databases.
#[derive(Debug, Parser)]
#[command(name = "pg-services", version)]
pub struct Cli {
    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands of the `pg-services` binary.
#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Start a private cluster and hold it until stdin is closed.
    Serve {
        /// Setup script whose template should be created once the server is up.
        #[arg(long)]
        setup_sql: Option<Utf8PathBuf>,
    },
    /// Ensure the template for a setup script exists on the configured host.
    Template {
        /// Setup script to hash and apply.
        #[arg(long)]
        script: Utf8PathBuf,
        /// Also create a fresh `-running` clone of the template.
        #[arg(long)]
        clone: bool,
    },
}

/// Databases produced by the `template` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateReport {
    /// Name of the ensured template database.
    pub template: String,
    /// Name of the fresh clone, when one was requested.
    pub running: Option<String>,
}

impl TemplateReport {
    /// Lines the binary prints, template first.
    #[must_use]
    pub fn lines(&self) -> Vec<&str> {
        std::iter::once(self.template.as_str())
            .chain(self.running.as_deref())
            .collect()
    }
}

/// Host the `template` command targets.
///
/// # Errors
///
/// Returns [`ServicesError::Config`] when neither `PG_SERVICES_HOST` nor
/// `PGHOST` named a server.
pub fn configured_host(settings: &ServicesSettings) -> Result<&str, ServicesError> {
    settings.host().ok_or_else(|| ServicesError::Config {
        message: "no host configured; set PGHOST or PG_SERVICES_HOST".to_owned(),
    })
}

/// Ensure the template for `script` on the configured host, optionally
/// followed by a `-running` clone.
///
/// # Errors
///
/// Returns the missing-host error or the first failing template step.
pub fn run_template(
    settings: &ServicesSettings,
    runner: Arc<dyn CommandRunner>,
    script: &Utf8Path,
    clone: bool,
) -> Result<TemplateReport, ServicesError> {
    let host = configured_host(settings)?;
    let cache = TemplateCache::new(runner, host);
    let template = cache.ensure_template(script)?;
    let running = if clone {
        Some(cache.create_running_database(&template)?)
    } else {
        None
    };
    info!(%host, %template, ?running, "template ready");
    Ok(TemplateReport { template, running })
}

#[cfg(test)]
mod tests {
    //! Unit tests for the binary's parsing and command logic.

    use std::sync::Mutex;

    use rstest::rstest;

    use super::*;
    use crate::command::{CommandOutput, Invocation, MockCommandRunner};
    use crate::setup_sql::write_setup_sql;
    use crate::template::{running_database_name, template_database_name};

    #[rstest]
    #[case::serve(&["pg-services", "serve"], Command::Serve { setup_sql: None })]
    #[case::serve_with_script(
        &["pg-services", "serve", "--setup-sql", "setup.sql"],
        Command::Serve { setup_sql: Some(Utf8PathBuf::from("setup.sql")) }
    )]
    #[case::template(
        &["pg-services", "template", "--script", "setup.sql"],
        Command::Template { script: Utf8PathBuf::from("setup.sql"), clone: false }
    )]
    #[case::template_clone(
        &["pg-services", "template", "--script", "setup.sql", "--clone"],
        Command::Template { script: Utf8PathBuf::from("setup.sql"), clone: true }
    )]
    fn parses_subcommands(#[case] args: &[&str], #[case] expected: Command) {
        let cli = Cli::try_parse_from(args).expect("arguments should parse");
        assert_eq!(cli.command, expected);
    }

    #[test]
    fn template_requires_a_script() {
        assert!(Cli::try_parse_from(["pg-services", "template"]).is_err());
    }

    #[test]
    fn template_without_host_is_a_config_error() {
        let err = run_template(
            &ServicesSettings::default(),
            Arc::new(MockCommandRunner::new()),
            Utf8Path::new("setup.sql"),
            false,
        )
        .expect_err("no host configured");

        assert!(matches!(err, ServicesError::Config { .. }));
        assert!(err.to_string().contains("PGHOST"));
    }

    /// Runner for a server that already holds every template.
    fn cached_server(log: Arc<Mutex<Vec<Invocation>>>) -> MockCommandRunner {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(move |invocation| {
            log.lock().expect("log lock").push(invocation.clone());
            match invocation.program() {
                "psql" => Ok(CommandOutput::ok().with_stdout("YAY\n")),
                "createdb" | "dropdb" => Ok(CommandOutput::ok()),
                other => panic!("unexpected tool {other}"),
            }
        });
        runner
    }

    #[rstest]
    #[case::template_only(false, &["psql"])]
    #[case::with_clone(true, &["psql", "dropdb", "createdb"])]
    fn template_command_reports_databases(#[case] clone: bool, #[case] tools: &[&str]) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf-8 temp path");
        let script = write_setup_sql(&base, "CREATE TABLE example (x int)").expect("script");
        let settings = ServicesSettings {
            host: Some("/run/pg".to_owned()),
            ..ServicesSettings::default()
        };
        let log = Arc::new(Mutex::new(Vec::new()));

        let runner = Arc::new(cached_server(Arc::clone(&log)));

        let report = run_template(&settings, runner, &script, clone).expect("template command");

        let template = template_database_name(b"CREATE TABLE example (x int)");
        assert_eq!(report.template, template);
        assert_eq!(report.running, clone.then(|| running_database_name(&template)));
        assert_eq!(report.lines().len(), if clone { 2 } else { 1 });

        let invocations = log.lock().expect("log lock");
        let programs: Vec<&str> = invocations.iter().map(Invocation::program).collect();
        assert_eq!(programs, tools);
        assert!(invocations.iter().all(|invocation| {
            invocation
                .arguments()
                .windows(2)
                .any(|pair| pair == ["-h", "/run/pg"])
        }));
    }
}
