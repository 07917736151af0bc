//! Private data directory for a throwaway PostgreSQL cluster.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::Dir;
use tracing::{debug, warn};

use crate::error::ServicesError;

/// Name of the cluster directory inside the session base directory.
pub const DATA_DIR_NAME: &str = "postgres";

/// Exclusively owned cluster directory, removed recursively on drop.
///
/// Anything left at the same location by an earlier run is removed before
/// the directory is created.
#[derive(Debug)]
pub struct DataDir {
    base: Dir,
    path: Utf8PathBuf,
}

impl DataDir {
    /// Create `<base>/postgres`, creating `base` as needed.
    ///
    /// # Errors
    ///
    /// Returns [`ServicesError::Io`] when the directories cannot be prepared.
    pub fn create(base: &Utf8Path) -> Result<Self, ServicesError> {
        let path = base.join(DATA_DIR_NAME);
        debug!(%path, "making postgres base dir");

        Dir::create_ambient_dir_all(base, ambient_authority())
            .map_err(|err| ServicesError::io(base, &err))?;
        let base_dir = Dir::open_ambient_dir(base, ambient_authority())
            .map_err(|err| ServicesError::io(base, &err))?;

        remove_cluster_dir(&base_dir).map_err(|err| ServicesError::io(path.as_path(), &err))?;
        base_dir
            .create_dir(DATA_DIR_NAME)
            .map_err(|err| ServicesError::io(path.as_path(), &err))?;

        Ok(Self {
            base: base_dir,
            path,
        })
    }

    /// Location of the cluster directory.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for DataDir {
    fn drop(&mut self) {
        match remove_cluster_dir(&self.base) {
            Ok(()) => debug!(path = %self.path, "removed postgres base dir"),
            Err(err) => warn!(path = %self.path, error = %err, "failed to remove postgres base dir"),
        }
    }
}

fn remove_cluster_dir(base: &Dir) -> io::Result<()> {
    match base.remove_dir_all(DATA_DIR_NAME) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
