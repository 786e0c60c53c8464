//! Error types for the Flashpack core library

use thiserror::Error;

/// Main error type for Flashpack operations
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid external input (exclusion file, sizes, platform IDs)
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Block size or sector size does not fit a partition
    #[error("Alignment error in partition '{partition}': {reason}")]
    Alignment {
        /// Partition that failed the check
        partition: String,
        /// What did not line up
        reason: String,
    },

    /// Write descriptors or stores violate the container layout rules
    #[error("Layout error: {0}")]
    Layout(String),

    /// A manifest field failed validation
    #[error("Invalid manifest field {field}{}: {reason} ('{entry}')", .position.map(|p| format!(" entry {}", p)).unwrap_or_default())]
    ManifestValidation {
        /// Manifest field name
        field: &'static str,
        /// Zero-based position of the entry within a list field
        position: Option<usize>,
        /// The offending text
        entry: String,
        /// Why it was rejected
        reason: String,
    },

    /// Container content does not match the expected format
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// A declared section runs past the end of the stream
    #[error("Truncated container: {section} declares {declared} bytes but only {remaining} remain")]
    TruncatedContainer {
        /// Section being read
        section: &'static str,
        /// Declared size in bytes
        declared: u64,
        /// Bytes left in the stream
        remaining: u64,
    },

    /// Operation preconditions not met (missing source, existing destination)
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A data block does not match its catalog entry
    #[error("Digest mismatch at block {index}: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Emission index of the block
        index: u64,
        /// Catalog digest (hex)
        expected: String,
        /// Computed digest (hex)
        actual: String,
    },

    /// Source bytes changed between the planning and the write pass
    #[error("Source changed while building: partition '{partition}', block {block}")]
    SourceChanged {
        /// Partition being streamed
        partition: String,
        /// Partition-relative block number
        block: u64,
    },

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error during read/write operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn alignment(partition: &str, reason: impl Into<String>) -> Self {
        Error::Alignment {
            partition: partition.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedContainer(reason.into())
    }
}

/// Result type alias using the Flashpack error type
pub type Result<T> = std::result::Result<T, Error>;
