// Review error taxonomy
//
// Every failed reviewer action maps to exactly one variant. Variants carry
// the record kind and id so the reviewer can retry or resolve by hand.

use crate::entities::{EntityKind, PaymentEntityType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum ReviewError {
    /// No record for the (kind, id) pair
    #[error("{kind} {id} not found")]
    NotFound { kind: String, id: String },

    /// Current status is not eligible for the requested change
    #[error("{kind} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        kind: String,
        id: String,
        from: String,
        to: String,
    },

    /// Owner search found zero or several pending candidates
    #[error("payment {payment_id} matched {candidates} pending {entity_type} submissions; link it manually")]
    LinkageAmbiguous {
        payment_id: String,
        entity_type: PaymentEntityType,
        candidates: usize,
    },

    /// Explicit entity reference does not exist under the mapped kind
    #[error("payment {payment_id} references {kind} {entity_id}, which does not exist")]
    LinkageNotFound {
        payment_id: String,
        kind: EntityKind,
        entity_id: String,
    },

    /// Primary payment write failed; nothing was committed
    #[error("payment {payment_id} could not be updated: {reason}")]
    PaymentUpdateFailed { payment_id: String, reason: String },

    /// Direct approval blocked until the funding payment is verified
    #[error("{kind} {id} needs a verified payment before it can be approved")]
    PaymentRequired { kind: EntityKind, id: String },

    #[error("user {user_id} is not allowed to review")]
    NotAuthorized { user_id: String },

    #[error("re-deciding {kind} {id} is disabled")]
    OverrideNotPermitted { kind: EntityKind, id: String },

    #[error("invalid input: {message}")]
    Validation { message: String },

    /// Storage collaborator I/O failure
    #[error("storage unavailable: {reason}")]
    StorageUnavailable { reason: String },
}

impl ReviewError {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        ReviewError::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn invalid_transition(
        kind: impl Into<String>,
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        ReviewError::InvalidTransition {
            kind: kind.into(),
            id: id.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ReviewError::Validation {
            message: message.into(),
        }
    }

    /// Short machine-readable code, stable across message wording changes
    pub fn code(&self) -> &'static str {
        match self {
            ReviewError::NotFound { .. } => "not_found",
            ReviewError::InvalidTransition { .. } => "invalid_transition",
            ReviewError::LinkageAmbiguous { .. } => "linkage_ambiguous",
            ReviewError::LinkageNotFound { .. } => "linkage_not_found",
            ReviewError::PaymentUpdateFailed { .. } => "payment_update_failed",
            ReviewError::PaymentRequired { .. } => "payment_required",
            ReviewError::NotAuthorized { .. } => "not_authorized",
            ReviewError::OverrideNotPermitted { .. } => "override_not_permitted",
            ReviewError::Validation { .. } => "validation",
            ReviewError::StorageUnavailable { .. } => "storage_unavailable",
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            ReviewError::StorageUnavailable { .. } | ReviewError::PaymentUpdateFailed { .. }
        )
    }
}

impl From<rusqlite::Error> for ReviewError {
    fn from(err: rusqlite::Error) -> Self {
        ReviewError::StorageUnavailable {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ReviewError {
    fn from(err: serde_json::Error) -> Self {
        ReviewError::StorageUnavailable {
            reason: format!("audit payload: {}", err),
        }
    }
}

pub type ReviewResult<T> = std::result::Result<T, ReviewError>;
