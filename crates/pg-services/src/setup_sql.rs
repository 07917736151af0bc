//! Session-scoped setup script used to populate template databases.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::{Dir, OpenOptions};

use crate::error::ServicesError;

/// File name of the generated setup script.
pub const SETUP_SQL_FILE: &str = "setup.sql";

/// Script written when a session does not supply its own.
pub const DEFAULT_SETUP_SQL: &str = "CREATE TABLE example (x int)";

/// Write `contents` to `<base>/setup.sql`, replacing any previous script.
///
/// # Errors
///
/// Returns [`ServicesError::Io`] when the file cannot be written.
pub fn write_setup_sql(base: &Utf8Path, contents: &str) -> Result<Utf8PathBuf, ServicesError> {
    let path = base.join(SETUP_SQL_FILE);
    Dir::create_ambient_dir_all(base, ambient_authority())
        .map_err(|err| ServicesError::io(base, &err))?;
    let dir = Dir::open_ambient_dir(base, ambient_authority())
        .map_err(|err| ServicesError::io(base, &err))?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    let mut file = dir
        .open_with(SETUP_SQL_FILE, &options)
        .map_err(|err| ServicesError::io(path.as_path(), &err))?;
    file.write_all(contents.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|err| ServicesError::io(path.as_path(), &err))?;

    Ok(path)
}

/// Write [`DEFAULT_SETUP_SQL`] to `<base>/setup.sql`.
///
/// # Errors
///
/// Returns [`ServicesError::Io`] when the file cannot be written.
pub fn write_default_setup_sql(base: &Utf8Path) -> Result<Utf8PathBuf, ServicesError> {
    write_setup_sql(base, DEFAULT_SETUP_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{read_setup_script, template_database_name};

    #[test]
    fn default_script_hashes_to_documented_template() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf-8 path");

        let path = write_default_setup_sql(&base).expect("write script");
        let bytes = read_setup_script(&path).expect("read script");

        assert_eq!(path, base.join("setup.sql"));
        assert_eq!(
            template_database_name(&bytes),
            "pytest-services-template-1425fb5b3fe9188c08adefcccfee0d22"
        );
    }

    #[test]
    fn rewriting_replaces_previous_contents() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let base = Utf8PathBuf::from_path_buf(tmp.path().join("nested")).expect("utf-8 path");

        write_setup_sql(&base, "CREATE TABLE a_much_longer_name (x int)").expect("first");
        let path = write_setup_sql(&base, "SELECT 1").expect("second");

        assert_eq!(read_setup_script(&path).expect("read"), b"SELECT 1");
    }
}
