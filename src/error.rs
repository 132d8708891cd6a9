//! Error types for the prediction engine

use std::io;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, TempoError>;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum TempoError {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The binary image ended before the requested bytes
    #[error("truncated or corrupt binary image")]
    Truncated,

    /// A section marker did not match the expected section name
    #[error("section marker mismatch: expected '{0}'")]
    BadSection(&'static str),

    /// Loading into an object that already holds data
    #[error("cannot load into a non-empty {0}")]
    NotEmpty(&'static str),

    /// An explicit event definition collided with an existing entry
    #[error("event is already defined")]
    DuplicateEvent,

    /// Explicit definitions after discovery has been used
    #[error("explicit definitions cannot follow discovery")]
    ModeMixed,

    /// An empty client id where one is required
    #[error("client id is empty")]
    EmptyClient,

    /// A timestamp that does not parse or falls before the epoch
    #[error("invalid timestamp: {0}")]
    BadTimestamp(String),

    /// A second target for a client that already has one
    #[error("client already has a target")]
    DuplicateTarget,

    /// `fit` called on a model that already carries a tree
    #[error("model is already fitted")]
    AlreadyFitted,

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
}
