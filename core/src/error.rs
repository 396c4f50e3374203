//! # Error Taxonomy
//!
//! [`ServiceError`] is the one error type the HTTP layer serializes. Each
//! variant carries a stable `errorCode` string; provider-specific failures
//! from the two stores collapse into it through a single mapping per store,
//! so new provider quirks get classified in exactly one place.

use thiserror::Error;

use crate::store::{KvError, ObjectError};

/// Service-level failures, surfaced to callers as `errorCode` strings.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed input, a state-machine precondition violated at the
    /// application level, or a business rule (duplicate address, tree
    /// exists, tree not ready).
    #[error("{0}")]
    Validation(String),

    /// A GET endpoint was asked for a record that does not exist.
    #[error("{0}")]
    ResourceNotFound(String),

    /// A conditional write lost a race: a concurrent writer changed the row
    /// between our read and our guarded write.
    #[error("{0}")]
    ConditionalCheckFailed(String),

    /// The KV provider rejected the request for capacity reasons.
    #[error("{0}")]
    Throttled(String),

    /// A transactional write was canceled by the provider.
    #[error("{0}")]
    Conflict(String),

    /// A bulk write exhausted its retry budget with items still
    /// unprocessed. Surfaced rather than swallowed so the orchestrator can
    /// compensate.
    #[error("{0}")]
    PartialBatch(String),

    /// Access denied by the store provider. The message is fixed; provider
    /// diagnostics never leak through this variant.
    #[error("Access denied")]
    AccessDenied,

    /// Unexpected failure inside a store or the service itself.
    #[error("{0}")]
    InternalError(String),

    /// Anything the mapping tables could not classify.
    #[error("{0}")]
    Other(String),

    /// The caller is not in any group authorized for the route.
    #[error("caller is not in an authorized group")]
    UnauthorizedAccess,
}

impl ServiceError {
    /// The stable `errorCode` string for this failure.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "Validation",
            ServiceError::ResourceNotFound(_) => "ResourceNotFound",
            ServiceError::ConditionalCheckFailed(_) => "ConditionalCheckFailed",
            ServiceError::Throttled(_) => "Throttled",
            ServiceError::Conflict(_) => "Conflict",
            ServiceError::PartialBatch(_) => "PartialBatch",
            ServiceError::AccessDenied => "AccessDenied",
            ServiceError::InternalError(_) => "InternalError",
            ServiceError::Other(_) => "Other",
            ServiceError::UnauthorizedAccess => "UnauthorizedAccess",
        }
    }

    /// Shorthand for a validation failure.
    pub fn validation(msg: impl Into<String>) -> Self {
        ServiceError::Validation(msg.into())
    }
}

impl From<KvError> for ServiceError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::ConditionalCheckFailed { .. } => {
                ServiceError::ConditionalCheckFailed(err.to_string())
            }
            KvError::Throttled(_) => ServiceError::Throttled(err.to_string()),
            KvError::Conflict(_) => ServiceError::Conflict(err.to_string()),
            KvError::PartialBatch { .. } => ServiceError::PartialBatch(err.to_string()),
            KvError::ResourceNotFound(_) => ServiceError::ResourceNotFound(err.to_string()),
            KvError::AccessDenied => ServiceError::AccessDenied,
            KvError::Timeout(_) | KvError::Internal(_) | KvError::Malformed(_) => {
                ServiceError::InternalError(err.to_string())
            }
            KvError::Other(_) => ServiceError::Other(err.to_string()),
        }
    }
}

impl From<ObjectError> for ServiceError {
    fn from(err: ObjectError) -> Self {
        match err {
            ObjectError::NotFound(_) => ServiceError::ResourceNotFound(err.to_string()),
            ObjectError::Exists(_)
            | ObjectError::InvalidBucket(_)
            | ObjectError::InvalidKey(_)
            | ObjectError::TooLarge { .. } => ServiceError::Validation(err.to_string()),
            ObjectError::AccessDenied => ServiceError::AccessDenied,
            ObjectError::DeleteTimeout(_) | ObjectError::Internal(_) => {
                ServiceError::InternalError(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            ServiceError::validation("bad input").error_code(),
            "Validation"
        );
        assert_eq!(
            ServiceError::UnauthorizedAccess.error_code(),
            "UnauthorizedAccess"
        );
        assert_eq!(ServiceError::AccessDenied.error_code(), "AccessDenied");
    }

    #[test]
    fn access_denied_message_is_normalized() {
        // Provider diagnostics must never leak through this variant.
        let err: ServiceError = KvError::AccessDenied.into();
        assert_eq!(err.to_string(), "Access denied");
    }

    #[test]
    fn conditional_failure_maps_through() {
        let err: ServiceError = KvError::ConditionalCheckFailed {
            table: "MerkleRoots".into(),
        }
        .into();
        assert_eq!(err.error_code(), "ConditionalCheckFailed");
    }

    #[test]
    fn partial_batch_is_distinct_from_internal() {
        let err: ServiceError = KvError::PartialBatch {
            left: 3,
            attempts: 4,
        }
        .into();
        assert_eq!(err.error_code(), "PartialBatch");
    }
}
