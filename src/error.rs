//! Error types for the cache client.

use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the cache client.
#[derive(Error, Debug)]
pub enum Error {
    /// A request was missing a mandatory field.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The backing store reported an error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The batch pipeline could not accept or execute an operation.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// A value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The store reported that a conditional mutation did not apply.
    #[error("mutation {mutation_id:?} was not applied by the store")]
    MutationRejected { mutation_id: Option<String> },

    /// A scanned value could not be decoded; the whole scan is aborted.
    #[error("unable to decode value for key {key}: {reason}")]
    Decode { key: String, reason: String },

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error is the batch race signal that the pipeline retries.
    pub fn is_retryable_race(&self) -> bool {
        matches!(self, Error::Store(e) if e.is_retryable_race())
    }
}

/// Mandatory request fields that were absent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The request carried no key.
    #[error("key is mandatory ({request})")]
    MissingKey { request: &'static str },

    /// The request carried no value.
    #[error("value is mandatory ({request})")]
    MissingValue { request: &'static str },
}

/// Errors reported by a store implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// An operation was registered against a batch that has already been executed.
    #[error("batch already has been executed")]
    BatchAlreadyExecuted,

    /// No live batch was available to register against.
    #[error("no active batch")]
    NoActiveBatch,

    /// The key holds a value of a different kind.
    #[error("wrong kind of value stored at key {key}")]
    WrongType { key: String },

    /// A sorted-set score was NaN.
    #[error("score for key {key} is not a number")]
    InvalidScore { key: String },

    /// The scan pattern could not be compiled.
    #[error("invalid scan pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Connection-level or backend failure.
    #[error("backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Race conditions between an enqueue and a concurrent batch swap.
    ///
    /// Only these two variants are retried by the pipeline; everything else
    /// propagates to the caller immediately.
    pub fn is_retryable_race(&self) -> bool {
        matches!(self, StoreError::BatchAlreadyExecuted | StoreError::NoActiveBatch)
    }
}

/// Batch pipeline errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Every registration attempt hit the batch race.
    #[error("batch operation failed despite trying {attempts} times")]
    RetriesExhausted { attempts: u32 },

    /// The batch holding the operation was dropped without a reply.
    #[error("batch was aborted before the operation completed")]
    BatchAborted,

    /// The pipeline has been shut down.
    #[error("pipeline is shut down")]
    ShutDown,
}

/// Value encoding errors.
#[derive(Error, Debug)]
pub enum CodecError {
    /// JSON (de)serialization failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Compressed frame could not be read or written.
    #[error("compression: {0}")]
    Compression(#[from] std::io::Error),

    /// A string value was not valid UTF-8.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}
