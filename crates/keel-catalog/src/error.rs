//! Catalog error types.

use thiserror::Error;

/// Errors that can occur while building a catalog service request.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid catalog options: {0}")]
    InvalidOptions(String),

    #[error("failed to encode service attributes: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CatalogResult<T> = Result<T, CatalogError>;
