//! Error types for the ingest pipeline.

use thiserror::Error;

use crate::partition::{Partition, PartitionKey};
use crate::summary::WriteSummary;

/// Errors from the linear mapper and the calibration formulas built on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Source range has zero width, the mapping is undefined.
    #[error("degenerate source range: min and max are both {0}")]
    DegenerateRange(f64),

    /// An input or range bound is NaN or infinite.
    #[error("non-finite input to linear mapping: {0}")]
    NonFinite(f64),
}

/// Errors reported by a `SeriesStore` implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The store could not be reached, or answered that it is not serving.
    #[error("store unavailable at {endpoint}: {reason}")]
    Unavailable { endpoint: String, reason: String },

    /// The store answered and refused the write.
    #[error("store rejected write: {0}")]
    Rejected(String),
}

fn line_suffix(line: &Option<usize>) -> String {
    match line {
        Some(line) => format!(" at line {}", line),
        None => String::new(),
    }
}

/// Errors of one ingest call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    /// The payload could not be parsed. Nothing was written.
    #[error("malformed payload{}: {reason}", line_suffix(.line))]
    MalformedPayload { line: Option<usize>, reason: String },

    /// The store could not be reached. Remaining partitions were not attempted.
    #[error("store unavailable at {endpoint}: {reason}")]
    StoreUnavailable { endpoint: String, reason: String },

    /// The store rejected the write of one partition.
    #[error("store rejected write of partition {key}: {reason}")]
    StoreWrite { key: PartitionKey, reason: String },
}

impl IngestError {
    pub fn malformed(line: Option<usize>, reason: impl Into<String>) -> Self {
        IngestError::MalformedPayload {
            line,
            reason: reason.into(),
        }
    }

    /// Attach the partition a store error happened on.
    pub fn from_store(key: &PartitionKey, err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { endpoint, reason } => {
                IngestError::StoreUnavailable { endpoint, reason }
            }
            StoreError::Rejected(reason) => IngestError::StoreWrite { key: *key, reason },
        }
    }
}

/// Failure of one ingest call.
///
/// `written` lists the partitions committed before or despite the failure,
/// `unwritten` holds the data of every partition that is not in the store, so
/// the caller can retry them alone.
#[derive(Debug, Clone, Default)]
pub struct IngestFailure {
    pub written: WriteSummary,
    pub errors: Vec<IngestError>,
    pub unwritten: Vec<Partition>,
}

impl IngestFailure {
    pub fn malformed(err: IngestError) -> Self {
        Self {
            written: WriteSummary::default(),
            errors: vec![err],
            unwritten: Vec::new(),
        }
    }

    pub fn is_malformed(&self) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, IngestError::MalformedPayload { .. }))
    }

    pub fn is_unavailable(&self) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, IngestError::StoreUnavailable { .. }))
    }

    /// Writing the unwritten partitions again may succeed.
    pub fn is_retryable(&self) -> bool {
        !self.is_malformed() && !self.unwritten.is_empty()
    }

    /// Keys of the partitions the store rejected.
    pub fn failed_keys(&self) -> Vec<&PartitionKey> {
        self.errors
            .iter()
            .filter_map(|e| match e {
                IngestError::StoreWrite { key, .. } => Some(key),
                _ => None,
            })
            .collect()
    }
}

impl std::fmt::Display for IngestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ingest failed, written partitions: {}, unwritten partitions: {}, errors: [",
            self.written.len(),
            self.unwritten.len()
        )?;

        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }

        write!(f, "]")
    }
}

impl std::error::Error for IngestFailure {}
