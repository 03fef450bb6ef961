//! Custom error types for the library.
//!
//! This module defines the primary error type, `LiveError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failures that can surface to a caller, from I/O and configuration issues to
//! archive lookups that cannot be satisfied.
//!
//! ## Error Hierarchy
//!
//! - **`NotFound`**: no archive shard covers the requested time in the expected directory.
//!   The caller may retry against an adjacent day.
//! - **`OutOfRange`**: a located shard does not span the requested time. The locator never
//!   clamps to the nearest record.
//! - **`InvalidShardName`**: a shard file name does not carry a parsable end timestamp.
//! - **`InvalidDataMap`**: a datamap document is structurally wrong (unknown class, bad table).
//! - **`Template`**: a dialect template references a placeholder that cannot be filled.
//! - **`Io`**, **`Json`**, **`Config`**: wrappers around the underlying crates.
//!
//! Missing PV values and undetermined device status are deliberately *not* errors. They
//! are resolved locally (invalid row, zero reading, "not usable") and only logged.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type LiveResult<T> = std::result::Result<T, LiveError>;

/// Primary error type for the library.
#[derive(Error, Debug)]
pub enum LiveError {
    /// No shard in the day directory ends after the requested time.
    #[error("Could not find {beampath} shard containing {timestamp} in {}", .path.display())]
    NotFound {
        beampath: String,
        timestamp: DateTime<Utc>,
        path: PathBuf,
    },

    /// The requested time is outside the records of a shard.
    #[error("Timestamp {timestamp} is outside shard records [{first}, {last}]")]
    OutOfRange {
        timestamp: DateTime<Utc>,
        first: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    /// None of the configured archive search paths exist.
    #[error("Cannot find archive data path. Searched: {0:?}")]
    NoArchiveRoot(Vec<PathBuf>),

    /// A shard file name without a parsable end timestamp.
    #[error("Invalid shard file name '{0}'")]
    InvalidShardName(String),

    /// A shard is malformed or empty.
    #[error("Shard read error: {0}")]
    Shard(String),

    /// A datamap document is structurally wrong.
    #[error("Invalid datamap: {0}")]
    InvalidDataMap(String),

    /// A dialect template cannot be rendered.
    #[error("Template error in '{template}': {message}")]
    Template { template: String, message: String },

    /// An external snapshot source failed to deliver values.
    #[error("Snapshot source error: {0}")]
    Source(String),

    /// Settings could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Settings were extracted but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[cfg(feature = "storage_hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}

impl LiveError {
    /// Whether a caller can reasonably retry with different inputs (another day, another time).
    pub fn is_lookup_miss(&self) -> bool {
        matches!(self, LiveError::NotFound { .. } | LiveError::OutOfRange { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn not_found_message_names_directory() {
        let err = LiveError::NotFound {
            beampath: "CU_HXR".into(),
            timestamp: Utc.with_ymd_and_hms(2021, 12, 11, 8, 0, 0).unwrap(),
            path: PathBuf::from("/data/2021/12/11"),
        };
        let msg = err.to_string();
        assert!(msg.contains("CU_HXR"));
        assert!(msg.contains("/data/2021/12/11"));
        assert!(err.is_lookup_miss());
    }

    #[test]
    fn io_errors_are_not_lookup_misses() {
        let err: LiveError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert!(!err.is_lookup_miss());
        assert!(err.to_string().starts_with("I/O error"));
    }
}
