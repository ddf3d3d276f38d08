//! Gateway error taxonomy

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SmscError>;

#[derive(Debug, Error)]
pub enum SmscError {
    /// No configured prefix matches the recipient
    #[error("no route found for recipient")]
    RouteNotFound,

    /// A prefix matched but every candidate operator is inactive or
    /// over capacity
    #[error("no active operator with capacity for route")]
    NoAvailableOperator,

    /// The atomic message + queue-entry write was rejected; nothing was
    /// persisted
    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// The post-commit handoff to the delivery lane failed
    #[error("dispatch failed: {0}")]
    Dispatch(String),
}

impl SmscError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::RouteNotFound => 422,
            Self::NoAvailableOperator => 503,
            Self::Transaction(_) | Self::Storage(_) | Self::Dispatch(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RouteNotFound => "ROUTE_NOT_FOUND",
            Self::NoAvailableOperator => "NO_AVAILABLE_OPERATOR",
            Self::Transaction(_) => "TRANSACTION_FAILURE",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Dispatch(_) => "DISPATCH_FAILURE",
        }
    }
}
