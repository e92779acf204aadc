use std::io;
use std::path::PathBuf;

/// Errors raised while following a file or maintaining its checkpoint
#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("failed to open {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to stat {}: {source}", path.display())]
    Metadata { path: PathBuf, source: io::Error },

    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write checkpoint {}: {source}", path.display())]
    Checkpoint { path: PathBuf, source: io::Error },
}

impl TailError {
    /// The file the error refers to
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Open { path, .. }
            | Self::Metadata { path, .. }
            | Self::Read { path, .. }
            | Self::Checkpoint { path, .. } => path,
        }
    }
}
