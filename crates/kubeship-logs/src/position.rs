//! Checkpoint files holding the number of lines already delivered for a log file

use std::io;
use std::path::{Path, PathBuf};

use kubeship_types::PositionPolicy;
use tracing::warn;

use crate::error::TailError;

/// Sidecar file next to a log file, containing a decimal line count
#[derive(Clone, Debug)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Checkpoint file of `file` under `policy`
    pub fn for_log(file: &Path, policy: &PositionPolicy) -> Self {
        Self::new(policy.checkpoint_path(file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored position
    ///
    /// A missing file, unparsable content or a negative number all read as 0.
    pub async fn read(&self) -> u64 {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => parse_position(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable checkpoint, starting from 0");
                0
            }
        }
    }

    /// Overwrite the stored position
    pub async fn write(&self, position: u64) -> Result<(), TailError> {
        tokio::fs::write(&self.path, position.to_string())
            .await
            .map_err(|source| TailError::Checkpoint {
                path: self.path.clone(),
                source,
            })
    }
}

/// Parse checkpoint content, reading the leading integer the way it was written
fn parse_position(content: &str) -> u64 {
    let trimmed = content.trim_start();
    if trimmed.starts_with('-') {
        return 0;
    }

    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits_end = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());

    unsigned[..digits_end].parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_position() {
        assert_eq!(parse_position("42"), 42);
        assert_eq!(parse_position("42\n"), 42);
        assert_eq!(parse_position("  7"), 7);
        assert_eq!(parse_position("12abc"), 12);
        assert_eq!(parse_position("abc"), 0);
        assert_eq!(parse_position(""), 0);
        assert_eq!(parse_position("-5"), 0);
        assert_eq!(parse_position("99999999999999999999999"), 0);
    }

    #[tokio::test]
    async fn test_missing_checkpoint_reads_zero() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointFile::new(dir.path().join("app.log.position"));
        assert_eq!(checkpoint.read().await, 0);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        let checkpoint = CheckpointFile::for_log(&log, &PositionPolicy::default());

        checkpoint.write(42).await.unwrap();

        assert_eq!(checkpoint.path(), dir.path().join("app.log.position"));
        assert_eq!(std::fs::read_to_string(checkpoint.path()).unwrap(), "42");
        assert_eq!(checkpoint.read().await, 42);
    }

    #[tokio::test]
    async fn test_negative_checkpoint_reads_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log.position");
        std::fs::write(&path, "-12").unwrap();
        assert_eq!(CheckpointFile::new(path).read().await, 0);
    }

    #[tokio::test]
    async fn test_write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointFile::new(dir.path().join("nope").join("app.log.position"));
        let err = checkpoint.write(1).await.unwrap_err();
        assert!(matches!(err, TailError::Checkpoint { .. }));
    }
}
