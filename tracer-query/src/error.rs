use crate::store::StoreError;
use thiserror::Error;

/// Where in a read a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Build,
    Execute,
    Decode,
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("invalid query parameters: {0}")]
    Validation(#[from] ValidationError),
    #[error("query execution failed while {context}")]
    QueryExecution {
        context: String,
        #[source]
        source: StoreError,
    },
    #[error("aggregation {name} missing from the response")]
    AggregationMissing { name: String },
    #[error("failed to decode {context}: {reason}")]
    Decode { context: String, reason: String },
}

impl ReaderError {
    pub fn execution(context: impl Into<String>, source: StoreError) -> Self {
        ReaderError::QueryExecution {
            context: context.into(),
            source,
        }
    }

    pub fn decode(context: impl Into<String>, reason: impl Into<String>) -> Self {
        ReaderError::Decode {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub fn aggregation_missing(name: impl Into<String>) -> Self {
        ReaderError::AggregationMissing { name: name.into() }
    }

    pub fn stage(&self) -> Stage {
        match self {
            ReaderError::Validation(_) => Stage::Build,
            ReaderError::QueryExecution { .. } => Stage::Execute,
            ReaderError::AggregationMissing { .. } | ReaderError::Decode { .. } => Stage::Decode,
        }
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(
            self,
            ReaderError::QueryExecution {
                source: StoreError::DeadlineExceeded,
                ..
            }
        )
    }
}

/// Rejected before anything is sent to the store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("start and end time must be set")]
    StartAndEndTimeNotSet,
    #[error("start time minimum is above maximum")]
    StartTimeMinGreaterThanMax,
    #[error("service name must be set when filtering by tags")]
    ServiceNameNotSet,
    #[error("duration minimum is above maximum")]
    DurationMinGreaterThanMax,
    #[error("number of traces must be greater than zero")]
    NumTracesZero,
    #[error("number of traces is above the maximum of {max}")]
    NumTracesAboveMax { max: usize },
    #[error("{name} interval must be greater than zero")]
    ZeroInterval { name: &'static str },
    #[error("duration bounds minimum is above maximum")]
    DurationBoundsMinGreaterThanMax,
    #[error("{requested} histogram buckets requested, at most {max} are allowed")]
    TooManyBuckets { requested: u64, max: u64 },
}
