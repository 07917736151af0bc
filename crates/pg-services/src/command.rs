//! Subprocess execution for the PostgreSQL command-line tools.
//!
//! All tool invocations flow through [`CommandRunner`] so that the readiness
//! checker and the template cache can be exercised without a PostgreSQL
//! installation. [`SystemRunner`] is the implementation backed by real
//! processes.

use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::error::ServicesError;

/// A tool invocation: program name, arguments and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl Invocation {
    /// Start an invocation of `program`, resolved at run time.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append a single argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child process.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program name as given to [`Invocation::new`].
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments in order.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Extra environment variables.
    #[must_use]
    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, absent when the process was terminated by a signal.
    pub status: Option<i32>,
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

impl CommandOutput {
    /// A successful, silent result.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            status: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit code and stderr.
    #[must_use]
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Builder-style setter for stdout.
    #[must_use]
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// True when the process exited with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Port for running PostgreSQL command-line tools to completion.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    /// Run the invocation, capturing stdout and stderr.
    ///
    /// A non-zero exit is reported through [`CommandOutput::status`], not as
    /// an error; errors cover tools that cannot be found or started.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ServicesError>;
}

/// Run `invocation` and turn a non-zero exit into [`ServicesError::CommandFailed`].
///
/// # Errors
///
/// Propagates runner errors and reports unsuccessful exits.
pub fn run_checked(
    runner: &dyn CommandRunner,
    invocation: &Invocation,
) -> Result<CommandOutput, ServicesError> {
    let output = runner.run(invocation)?;
    if output.success() {
        return Ok(output);
    }
    Err(ServicesError::CommandFailed {
        command: invocation.to_string(),
        status: output.status,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Locate `name`, preferring `bin_dir` and falling back to `PATH`.
///
/// # Errors
///
/// Returns [`ServicesError::BinaryNotFound`] when neither location has it.
pub fn resolve_binary(name: &str, bin_dir: Option<&Utf8Path>) -> Result<PathBuf, ServicesError> {
    if let Some(dir) = bin_dir {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        if let Ok(path) = which::which_in(name, Some(dir.as_str()), cwd) {
            return Ok(path);
        }
    }
    which::which(name).map_err(|_| ServicesError::BinaryNotFound {
        name: name.to_owned(),
    })
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    bin_dir: Option<Utf8PathBuf>,
}

impl SystemRunner {
    /// Runner resolving tools through `PATH` only.
    #[must_use]
    pub const fn new() -> Self {
        Self { bin_dir: None }
    }

    /// Runner that looks in `bin_dir` before `PATH`.
    #[must_use]
    pub fn with_bin_dir(bin_dir: Option<Utf8PathBuf>) -> Self {
        Self { bin_dir }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ServicesError> {
        let program = resolve_binary(invocation.program(), self.bin_dir.as_deref())?;
        debug!(command = %invocation, "running PostgreSQL tool");

        let mut command = Command::new(&program);
        command
            .args(invocation.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in invocation.env_vars() {
            command.env(key, value);
        }

        let output = command.output().map_err(|err| ServicesError::Spawn {
            program: invocation.program().to_owned(),
            message: err.to_string(),
        })?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command = %invocation, status = ?result.status, "PostgreSQL tool finished");
        Ok(result)
    }
}
