use std::fs;
use std::path::{Path, PathBuf};

/// Well-known entries of a PostgreSQL data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDirectoryPaths {
    pub config: PathBuf,
    /// Holds one directory per database, named after its oid.
    pub databases: PathBuf,
    pub tablespaces: PathBuf,
    pub pid: PathBuf,
    pub pgcow_version: PathBuf,
}

/// `DataDirectory` is a read-only view over a PostgreSQL data directory.
#[derive(Debug, Clone)]
pub struct DataDirectory {
    path: PathBuf,
}

impl DataDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DataDirectory { path: path.into() }
    }

    pub fn paths(&self) -> DataDirectoryPaths {
        DataDirectoryPaths {
            config: self.path.join("postgresql.conf"),
            databases: self.path.join("base"),
            tablespaces: self.path.join("pg_tblspc"),
            pid: self.path.join("postmaster.pid"),
            pgcow_version: self.path.join("pgcow.version"),
        }
    }

    /// Get the `(oid, path)` of every database directory, sorted by oid.
    pub fn database_directories(&self) -> Vec<(String, PathBuf)> {
        let databases = self.paths().databases;
        let entries = match fs::read_dir(&databases) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!(
                    "trying to list databases in '{}', but cannot read it: {}",
                    databases.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut directories: Vec<(String, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map_or(false, |typ| typ.is_dir()))
            .map(|entry| {
                (
                    entry.file_name().to_string_lossy().into_owned(),
                    entry.path(),
                )
            })
            .collect();
        directories.sort();
        directories
    }

    /// Get the symbolic links to custom tablespaces.
    pub fn tablespace_symlinks(&self) -> Vec<PathBuf> {
        let tablespaces = self.paths().tablespaces;
        let entries = match fs::read_dir(&tablespaces) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!(
                    "trying to list tablespaces in '{}', but cannot read it: {}",
                    tablespaces.display(),
                    e
                );
                return Vec::new();
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map_or(false, |typ| typ.is_symlink()))
            .map(|entry| entry.path())
            .collect()
    }

    pub fn has_tablespaces(&self) -> bool {
        !self.tablespace_symlinks().is_empty()
    }

    /// Whether a server holds the data directory, according to its pid file.
    pub fn is_running(&self) -> bool {
        let pid = self.paths().pid;
        fs::symlink_metadata(&pid).map_or(false, |metadata| {
            metadata.is_file() || metadata.file_type().is_symlink()
        })
    }

    /// Check whether `path` looks like a data directory.
    pub fn is(path: &Path) -> bool {
        log::trace!("checking if '{}' is a pg data directory", path.display());

        if !path.exists() {
            return false;
        }

        let paths = DataDirectory::new(path).paths();
        paths.config.exists() && paths.databases.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempdir::TempDir;

    fn data_directory() -> (TempDir, DataDirectory) {
        let tmp = TempDir::new("pgcow-pgdata").unwrap();
        fs::write(tmp.path().join("postgresql.conf"), b"").unwrap();
        fs::create_dir_all(tmp.path().join("base/13")).unwrap();
        fs::create_dir_all(tmp.path().join("base/1")).unwrap();
        fs::write(tmp.path().join("base/pg_internal.init"), b"").unwrap();
        fs::create_dir_all(tmp.path().join("pg_tblspc")).unwrap();
        let data_directory = DataDirectory::new(tmp.path());
        (tmp, data_directory)
    }

    #[test]
    fn test_is() {
        let (tmp, _) = data_directory();
        assert!(DataDirectory::is(tmp.path()));
        assert!(!DataDirectory::is(&tmp.path().join("base")));
        assert!(!DataDirectory::is(&tmp.path().join("missing")));

        fs::remove_file(tmp.path().join("postgresql.conf")).unwrap();
        assert!(!DataDirectory::is(tmp.path()));
    }

    #[test]
    fn test_database_directories() {
        let (tmp, data_directory) = data_directory();
        assert_eq!(
            data_directory.database_directories(),
            vec![
                ("1".to_string(), tmp.path().join("base/1")),
                ("13".to_string(), tmp.path().join("base/13")),
            ]
        );

        fs::remove_dir_all(tmp.path().join("base")).unwrap();
        assert!(data_directory.database_directories().is_empty());
    }

    #[test]
    fn test_tablespaces() {
        let (tmp, data_directory) = data_directory();
        assert!(!data_directory.has_tablespaces());

        let location = tmp.path().join("elsewhere");
        fs::create_dir_all(&location).unwrap();
        symlink(&location, tmp.path().join("pg_tblspc/16400")).unwrap();

        assert_eq!(
            data_directory.tablespace_symlinks(),
            vec![tmp.path().join("pg_tblspc/16400")]
        );
        assert!(data_directory.has_tablespaces());
    }

    #[test]
    fn test_is_running() {
        let (tmp, data_directory) = data_directory();
        assert!(!data_directory.is_running());

        fs::write(tmp.path().join("postmaster.pid"), b"4242\n").unwrap();
        assert!(data_directory.is_running());
    }
}
