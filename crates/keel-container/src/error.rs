use keel_core::PlatformKind;
use thiserror::Error;

use crate::types::TaskDefinitionId;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{op} failed on {platform}: {message}")]
    Platform {
        platform: PlatformKind,
        op: String,
        message: String,
        retryable: bool,
    },

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{op} is not supported on {platform}")]
    Unsupported {
        platform: PlatformKind,
        op: &'static str,
    },

    #[error("{0} cancelled")]
    Cancelled(String),

    #[error("{0} exceeded its deadline")]
    DeadlineExceeded(String),

    /// A task definition was registered but a later step failed.
    #[error("task definition {created} registered but {source}")]
    Partial {
        created: TaskDefinitionId,
        source: Box<ContainerError>,
    },
}

impl ContainerError {
    /// Whether repeating the same call may succeed.
    ///
    /// Only transient platform failures (throttling, server errors) and
    /// interrupted calls qualify. A partial failure inherits the verdict
    /// of the step that failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Platform { retryable, .. } => *retryable,
            Self::Cancelled(_) | Self::DeadlineExceeded(_) => true,
            Self::Partial { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

pub type ContainerResult<T> = Result<T, ContainerError>;
