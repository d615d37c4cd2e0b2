use keel_catalog::CatalogError;
use keel_container::ContainerError;
use keel_core::ServiceStatus;
use keel_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManageError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("container platform error: {0}")]
    Container(#[from] ContainerError),

    #[error("dependency service not found: {0}")]
    DependencyNotFound(String),

    #[error("dependency service {name} is {status:?}, not active")]
    DependencyNotActive { name: String, status: ServiceStatus },
}

impl ManageError {
    /// Whether re-running the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Container(e) => e.is_retryable(),
            Self::DependencyNotActive { .. } => true,
            _ => false,
        }
    }
}

pub type ManageResult<T> = Result<T, ManageError>;
