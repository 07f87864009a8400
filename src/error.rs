//! Error types for dnsaas-core.

use thiserror::Error;

use crate::model::{RecordId, RequestId};

/// Errors surfaced by the store, the synchronizers and the request workflow.
#[derive(Debug, Error)]
pub enum DnsaasError {
    /// Malformed field value (bad IP, malformed SOA body, bad hostname).
    #[error("Validation error: {0}")]
    Validation(String),

    /// CNAME exclusivity or (name, type, content) uniqueness violation.
    #[error("Conflicting records exist: {}", join_ids(.ids))]
    Conflict {
        /// Records the candidate collides with.
        ids: Vec<RecordId>,
    },

    /// The acting user may not perform the operation.
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Open requests already target the entity.
    #[error("Open requests already exist for this target: {}", join_ids(.request_ids))]
    Precondition {
        /// The blocking requests.
        request_ids: Vec<RequestId>,
    },

    /// No managed domain matches the hostname.
    #[error("No domain found for name {hostname}")]
    Referential {
        /// The hostname that could not be resolved.
        hostname: String,
    },

    /// Content of an A/AAAA record is not an address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Entity lookup failed.
    #[error("{kind} {id} does not exist")]
    NotFound {
        /// Entity kind ("domain", "record", ...).
        kind: &'static str,
        /// Numeric id that was looked up.
        id: i64,
    },

    /// The request already left the OPEN state.
    #[error("Request {id} is already {state}")]
    InvalidState {
        /// Request that was re-processed.
        id: RequestId,
        /// Its current (terminal) state.
        state: &'static str,
    },

    /// SQLite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON (de)serialization of request history or copy lists.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl DnsaasError {
    /// HTTP-equivalent status code callers translate this error into.
    pub fn status_code(&self) -> u16 {
        match self {
            DnsaasError::Validation(_)
            | DnsaasError::Conflict { .. }
            | DnsaasError::Referential { .. }
            | DnsaasError::InvalidAddress(_) => 400,
            DnsaasError::Permission(_) => 403,
            DnsaasError::NotFound { .. } => 404,
            DnsaasError::InvalidState { .. } => 409,
            DnsaasError::Precondition { .. } => 412,
            DnsaasError::Database(_) | DnsaasError::Json(_) | DnsaasError::Config(_) => 500,
        }
    }
}

fn join_ids<T: std::fmt::Display>(ids: &[T]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result alias used across the crate.
pub type Result<T, E = DnsaasError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_lists_ids() {
        let err = DnsaasError::Conflict {
            ids: vec![RecordId(3), RecordId(7)],
        };
        assert_eq!(err.to_string(), "Conflicting records exist: 3, 7");
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_precondition_maps_to_412() {
        let err = DnsaasError::Precondition {
            request_ids: vec![RequestId(1)],
        };
        assert_eq!(err.status_code(), 412);
    }
}
