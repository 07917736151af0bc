//! Command-line front end for provisioning PostgreSQL test services.
//!
//! `serve` provisions a throwaway cluster, prints its host and keeps it alive
//! until standard input closes. `template` makes sure the template database
//! for a setup script exists on the configured host and prints its name.

use std::io::{self, Read, Write};
use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8Path;
use clap::Parser;
use pg_services::cli::{Cli, Command, run_template};
use pg_services::{PostgresSession, ServicesError, ServicesSettings, SystemRunner};
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

fn main() -> ExitCode {
    if let Err(err) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .with_writer(io::stderr)
        .try_init()
    {
        warn!(error = %err, "tracing init failed");
    }

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Err(write_err) = writeln!(io::stderr().lock(), "{err}") {
                drop(write_err);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), ServicesError> {
    let settings = ServicesSettings::load()?;
    match cli.command {
        Command::Serve { setup_sql } => serve(&settings, setup_sql.as_deref()),
        Command::Template { script, clone } => {
            let runner = Arc::new(SystemRunner::with_bin_dir(settings.bin_dir()?));
            let report = run_template(&settings, runner, &script, clone)?;
            report.lines().into_iter().for_each(write_line);
            Ok(())
        }
    }
}

fn serve(
    settings: &ServicesSettings,
    setup_sql: Option<&Utf8Path>,
) -> Result<(), ServicesError> {
    let session = PostgresSession::start(settings)?;
    write_line(session.host());
    if let Some(script) = setup_sql {
        let name = session.template_cache().ensure_template(script)?;
        write_line(&name);
    }

    let mut sink = Vec::new();
    if let Err(err) = io::stdin().lock().read_to_end(&mut sink) {
        warn!(error = %err, "stdin closed with an error; shutting down");
    }
    drop(session);
    Ok(())
}

fn write_line(message: &str) {
    if let Err(err) = writeln!(io::stdout().lock(), "{message}") {
        drop(err);
    }
}
