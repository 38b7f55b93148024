// Entity Models
//
// Each record has a stable string id; statuses only move away from pending,
// and only through the orchestrator.

pub mod payment;
pub mod submission;
pub mod user;

pub use payment::{PaymentDecision, PaymentEntityType, PaymentRequest, PaymentStatus};
pub use submission::{
    ApprovalStatus, Classification, EntityDecision, EntityKind, EntitySubmission, InstituteDomain,
};
pub use user::{OwnerSummary, User};

/// Agent identifiers arrive as free text; blank and the literal "null" mean absent.
pub fn normalize_agent_id(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string)
}
