//! Cluster initialisation with `initdb`.

use camino::Utf8Path;
use tracing::{debug, error};

use crate::command::{CommandRunner, Invocation, run_checked};
use crate::error::ServicesError;

/// The `initdb` invocation for `data_dir`.
///
/// ```text
/// PGOPTIONS=-F initdb -E utf-8 -D <data_dir> -A trust
/// ```
///
/// | Flag           | Purpose                                      |
/// |----------------|----------------------------------------------|
/// | `-E utf-8`     | Template database encoding                   |
/// | `-D <dir>`     | Cluster location                             |
/// | `-A trust`     | No passwords for local connections           |
/// | `PGOPTIONS=-F` | Skip `fsync` while bootstrapping             |
#[must_use]
pub fn initdb_invocation(data_dir: &Utf8Path) -> Invocation {
    Invocation::new("initdb")
        .args(["-E", "utf-8", "-D", data_dir.as_str(), "-A", "trust"])
        .env("PGOPTIONS", "-F")
}

/// Install a new database cluster into `data_dir`.
///
/// # Errors
///
/// Returns [`ServicesError::BinaryNotFound`] when `initdb` is missing and
/// [`ServicesError::CommandFailed`] when it exits unsuccessfully.
pub fn initdb(runner: &dyn CommandRunner, data_dir: &Utf8Path) -> Result<(), ServicesError> {
    debug!(%data_dir, "creating PostgreSQL cluster with initdb");
    match run_checked(runner, &initdb_invocation(data_dir)) {
        Ok(_) => {
            debug!(%data_dir, "PostgreSQL cluster was initialized");
            Ok(())
        }
        Err(err @ ServicesError::CommandFailed { .. }) => {
            error!(
                error = %err,
                "initdb failed; ensure AppArmor allows PostgreSQL to use /run/shm/**"
            );
            Err(err)
        }
        Err(err) => Err(err),
    }
}
