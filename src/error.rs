//! Error types shared by the snapshot pipeline.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures that abort a snapshot run.
///
/// Network problems never show up here: they are recorded per page or per asset and the run
/// carries on. Everything in this enum is a storage or configuration problem with no safe
/// partial-write recovery.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Reading or writing the output tree failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// File or directory being accessed.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// A manifest or asset index could not be encoded or decoded.
    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        /// File being read or written.
        path: PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// Snapshots are immutable; a directory with this timestamp is already on disk.
    #[error("snapshot directory already exists: {}", .0.display())]
    SnapshotExists(PathBuf),
    /// The configured base URL could not be parsed.
    #[error("invalid base URL `{url}`: {source}")]
    InvalidBaseUrl {
        /// Raw configured value.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
    /// The base URL parsed but carries no host to name the snapshot tree after.
    #[error("base URL `{0}` has no host")]
    MissingHost(String),
}

impl SnapshotError {
    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Attaches the offending path to `std::io` failures.
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T, SnapshotError>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T, SnapshotError> {
        self.map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Writes `contents` next to `path` and renames it into place so readers never see a torn file.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), SnapshotError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents).at(&tmp)?;
    std::fs::rename(&tmp, path).at(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_name_the_path() {
        let err = std::fs::read("/definitely/not/here.json")
            .at(Path::new("/definitely/not/here.json"))
            .unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
        assert!(matches!(err, SnapshotError::Io { .. }));
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("index.json");
        write_atomic(&target, b"{}").unwrap();
        write_atomic(&target, b"{\"a\":1}").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "{\"a\":1}");
        assert!(!dir.path().join("index.json.tmp").exists());
    }
}
