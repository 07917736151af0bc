//! Launching supervised service processes and waiting for readiness.
//!
//! A [`Watcher`] starts a long-running service and blocks until a readiness
//! callback reports success. [`ProcessWatcher`] is a deliberately small
//! implementation: it owns the children it spawned, polls the callback on a
//! fixed interval and gives up after a timeout.
//!
//! Services are stopped with `SIGINT` (PostgreSQL's fast shutdown, which
//! releases its shared memory) and only killed when they outlive the stop
//! timeout. Their combined stdout and stderr go to an unnamed temporary file
//! so an early exit can be reported with what the service printed.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use tracing::{debug, info, warn};

use crate::command::resolve_binary;
use crate::error::ServicesError;

/// Default readiness budget.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay between readiness polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default time a service gets to exit after `SIGINT` before it is killed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

const OUTPUT_TAIL_LINES: usize = 20;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Program and arguments of a service to supervise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Executable name, resolved like any other tool.
    pub program: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
}

impl ServiceSpec {
    /// Build a spec from a program name and its arguments.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Port for starting a service and blocking until it is ready.
pub trait Watcher: Send {
    /// Start `spec` and poll `checker` until it returns `true`.
    ///
    /// # Errors
    ///
    /// Implementations report start failures, early exits and timeouts.
    fn start(
        &mut self,
        spec: &ServiceSpec,
        checker: &mut dyn FnMut() -> bool,
    ) -> Result<(), ServicesError>;
}

/// How a supervised service ended when it was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The service exited on its own after the stop request.
    Graceful(Option<i32>),
    /// The service outlived the stop timeout and was killed.
    Forced,
}

#[derive(Debug)]
struct Service {
    program: String,
    child: Child,
    output: File,
}

/// [`Watcher`] that owns child processes for its lifetime.
#[derive(Debug)]
pub struct ProcessWatcher {
    bin_dir: Option<Utf8PathBuf>,
    timeout: Duration,
    poll_interval: Duration,
    stop_timeout: Duration,
    services: Vec<Service>,
}

impl Default for ProcessWatcher {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ProcessWatcher {
    /// Watcher resolving programs in `bin_dir` first, then `PATH`.
    #[must_use]
    pub fn new(bin_dir: Option<Utf8PathBuf>) -> Self {
        Self {
            bin_dir,
            timeout: DEFAULT_READINESS_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            services: Vec::new(),
        }
    }

    /// Override the readiness budget.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the delay between polls.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Override how long a stopped service may take to exit.
    #[must_use]
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Number of services currently owned by the watcher.
    #[must_use]
    pub fn running(&self) -> usize {
        self.services.len()
    }

    /// Stop and reap every owned service, newest first.
    pub fn stop_all(&mut self) -> Vec<Shutdown> {
        let mut outcomes = Vec::with_capacity(self.services.len());
        while let Some(mut service) = self.services.pop() {
            outcomes.push(stop_child(&service.program, &mut service.child, self.stop_timeout));
        }
        outcomes
    }

    fn spawn(&self, spec: &ServiceSpec) -> Result<Service, ServicesError> {
        let program = resolve_binary(&spec.program, self.bin_dir.as_deref())?;
        let spawn_error = |err: std::io::Error| ServicesError::Spawn {
            program: spec.program.clone(),
            message: err.to_string(),
        };
        let output = tempfile::tempfile().map_err(spawn_error)?;
        let stdout = output.try_clone().map_err(spawn_error)?;
        let stderr = output.try_clone().map_err(spawn_error)?;

        info!(program = %spec.program, args = ?spec.args, "starting service");
        let child = Command::new(program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(spawn_error)?;
        Ok(Service {
            program: spec.program.clone(),
            child,
            output,
        })
    }
}

impl Watcher for ProcessWatcher {
    fn start(
        &mut self,
        spec: &ServiceSpec,
        checker: &mut dyn FnMut() -> bool,
    ) -> Result<(), ServicesError> {
        let mut service = self.spawn(spec)?;
        let started = Instant::now();

        loop {
            match service.child.try_wait() {
                Ok(Some(status)) => {
                    return Err(ServicesError::ServerExited {
                        program: spec.program.clone(),
                        status: status.code(),
                        output: output_tail(&mut service.output),
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    stop_child(&spec.program, &mut service.child, self.stop_timeout);
                    return Err(ServicesError::Spawn {
                        program: spec.program.clone(),
                        message: err.to_string(),
                    });
                }
            }

            if checker() {
                info!(
                    program = %spec.program,
                    elapsed_ms = started.elapsed().as_millis(),
                    "service is ready"
                );
                self.services.push(service);
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= self.timeout {
                stop_child(&spec.program, &mut service.child, self.stop_timeout);
                return Err(ServicesError::ReadinessTimeout {
                    program: spec.program.clone(),
                    waited_ms: waited.as_millis(),
                });
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl Drop for ProcessWatcher {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Ask `child` to stop, wait up to `stop_timeout`, then kill it.
fn stop_child(program: &str, child: &mut Child, stop_timeout: Duration) -> Shutdown {
    request_stop(program, child);
    let deadline = Instant::now() + stop_timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(program, status = ?status.code(), "service stopped");
                return Shutdown::Graceful(status.code());
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(STOP_POLL_INTERVAL),
            Ok(None) => break,
            Err(err) => {
                warn!(program, error = %err, "failed to poll stopping service");
                break;
            }
        }
    }

    warn!(program, "service did not stop in time; killing it");
    if let Err(err) = child.kill() {
        debug!(program, error = %err, "service already stopped");
    }
    if let Err(err) = child.wait() {
        warn!(program, error = %err, "failed to reap service");
    }
    Shutdown::Forced
}

/// Send `SIGINT`, PostgreSQL's fast shutdown request.
#[cfg(unix)]
fn request_stop(program: &str, child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        warn!(program, pid = child.id(), "pid out of range; cannot signal service");
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGINT) {
        debug!(program, pid, error = %err, "could not signal service");
    }
}

/// Without signals there is no gentler request than the kill that follows.
#[cfg(not(unix))]
fn request_stop(program: &str, child: &Child) {
    debug!(program, pid = child.id(), "no stop signal on this platform");
}

fn output_tail(output: &mut File) -> String {
    let mut raw = Vec::new();
    if let Err(err) = output
        .seek(SeekFrom::Start(0))
        .and_then(|_| output.read_to_end(&mut raw))
    {
        debug!(error = %err, "could not read service output");
        return String::new();
    }
    let text = String::from_utf8_lossy(&raw);
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines.into_iter().skip(skip).collect::<Vec<_>>().join("\n")
}
