//! Incremental line reader for a single growing file
//!
//! The file is reopened on every poll, so a rotated file (new inode at the
//! same path) is picked up. A file that shrinks below the read offset is
//! treated as truncated and read again from the start.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::warn;

use crate::error::TailError;

/// Largest chunk read in one poll
const MAX_READ_CHUNK_BYTES: usize = 4 * 1024 * 1024;

/// Where a follower starts reading
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartAt {
    /// Replay the whole file
    Beginning,
    /// Only lines appended after opening
    End,
}

/// Follows one file and yields complete lines
#[derive(Debug)]
pub struct FileFollower {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
}

impl FileFollower {
    /// Open `path`, failing if it cannot be read right now
    pub async fn open(path: impl Into<PathBuf>, start: StartAt) -> Result<Self, TailError> {
        let path = path.into();
        let file = fs::File::open(&path)
            .await
            .map_err(|source| TailError::Open {
                path: path.clone(),
                source,
            })?;

        let offset = match start {
            StartAt::Beginning => 0,
            StartAt::End => {
                file.metadata()
                    .await
                    .map_err(|source| TailError::Metadata {
                        path: path.clone(),
                        source,
                    })?
                    .len()
            }
        };

        Ok(Self {
            path,
            offset,
            partial: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next read
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read what was appended since the last poll and return the complete lines
    ///
    /// A trailing line without a newline is kept until its newline arrives.
    pub async fn poll(&mut self) -> Result<Vec<String>, TailError> {
        let len = fs::metadata(&self.path)
            .await
            .map_err(|source| TailError::Metadata {
                path: self.path.clone(),
                source,
            })?
            .len();

        if len < self.offset {
            warn!(
                path = %self.path.display(),
                previous_offset = self.offset,
                current_size = len,
                "file truncated or rotated, reading from the start"
            );
            self.offset = 0;
            self.partial.clear();
        }

        if len == self.offset {
            return Ok(Vec::new());
        }

        let to_read = (len - self.offset).min(MAX_READ_CHUNK_BYTES as u64) as usize;
        let buffer = self.read_range(to_read).await?;
        self.offset += buffer.len() as u64;

        Ok(self.split_lines(&buffer))
    }

    async fn read_range(&self, max_bytes: usize) -> Result<Vec<u8>, TailError> {
        let read_err = |source| TailError::Read {
            path: self.path.clone(),
            source,
        };

        let mut file = fs::File::open(&self.path).await.map_err(read_err)?;
        file.seek(SeekFrom::Start(self.offset))
            .await
            .map_err(read_err)?;

        let mut buffer = vec![0u8; max_bytes];
        let mut total_read = 0usize;
        while total_read < max_bytes {
            let bytes_read = file
                .read(&mut buffer[total_read..])
                .await
                .map_err(read_err)?;
            if bytes_read == 0 {
                break;
            }
            total_read += bytes_read;
        }
        buffer.truncate(total_read);
        Ok(buffer)
    }

    fn split_lines(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.partial[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            let line = self.partial[start..end]
                .strip_suffix(b"\r")
                .unwrap_or(&self.partial[start..end]);
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
        }
        self.partial.drain(..start);

        lines
    }
}
