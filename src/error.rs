//! Crate-wide error type.

use thiserror::Error;

/// Everything that can go wrong while authoring a disk image.
#[derive(Debug, Error)]
pub enum DiskImageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("partition too small for FAT32: {0} sectors")]
    PartitionTooSmall(u64),

    #[error("unknown partition type: {0}")]
    UnknownPartitionType(String),

    #[error("partition not found: {0}")]
    PartitionNotFound(String),

    #[error("cluster allocation exhausted: requested {requested}, free {free}")]
    ClusterExhausted { requested: u32, free: u32 },

    #[error("file too large for FAT32: {0} bytes")]
    FileTooLarge(u64),

    #[error("path has no parent directory entry: {0}")]
    PathLookupFailed(String),

    #[error("GPT writer used out of sequence: {0}")]
    SequenceError(&'static str),

    /// Wraps any error raised while creating a manifest-listed directory.
    /// Exit-code dispatch keys off this variant rather than the wrapped
    /// one: the reference implementation assigns exit code 4 to any
    /// failure in its directory-creation loop, regardless of cause.
    #[error("failed to create directory: {0}")]
    DirectoryCreationFailed(Box<DiskImageError>),

    /// Same as [`DiskImageError::DirectoryCreationFailed`] but for the
    /// file-creation loop (exit code 5).
    #[error("failed to create file: {0}")]
    FileCreationFailed(Box<DiskImageError>),
}

pub type Result<T> = std::result::Result<T, DiskImageError>;
