//! Error types for the hierarchical file store.

use thiserror::Error;

/// Errors surfaced by the file store and its supporting modules.
///
/// Validation errors (`InvalidName`, `InvalidLocation`) are raised before any
/// backend transaction is opened. `MissingParent`, `DestinationExists` and
/// `NotFound` raised mid-operation arrive via a transaction abort, so a failed
/// multi-record operation leaves no partial writes behind.
#[derive(Debug, Error)]
pub enum FileDbError {
    #[error("no node found at path \"{0}\"")]
    NotFound(String),

    #[error("invalid node name \"{0}\": names must not contain '/'")]
    InvalidName(String),

    #[error("invalid node location \"{0}\": locations must be non-empty absolute paths")]
    InvalidLocation(String),

    #[error("missing parent at \"{0}\"")]
    MissingParent(String),

    #[error("destination \"{0}\" already exists")]
    DestinationExists(String),

    #[error("cannot resolve content with identifier \"{0}\"")]
    Unresolvable(String),

    #[error("invalid content identifier \"{0}\"")]
    InvalidIdentifier(String),

    #[error("backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
