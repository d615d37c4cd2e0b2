//! Control database errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    /// The database itself failed; `op` names the store operation.
    #[error("control database {op} failed: {source}")]
    Db {
        op: &'static str,
        #[source]
        source: redb::Error,
    },

    #[error("cannot encode record {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A stored record no longer decodes.
    #[error("corrupt record {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("service not found: {0}")]
    NotFound(String),

    /// The name is taken by a service with a different uuid.
    #[error("service already exists: {0}")]
    AlreadyExists(String),
}

impl StateError {
    pub(crate) fn db<E: Into<redb::Error>>(op: &'static str) -> impl FnOnce(E) -> Self {
        move |e| Self::Db {
            op,
            source: e.into(),
        }
    }

    pub(crate) fn encode(key: &str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Encode {
            key: key.to_string(),
            source,
        }
    }

    pub(crate) fn corrupt(key: &str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Corrupt {
            key: key.to_string(),
            source,
        }
    }
}
