// Marketplace Review - Core Library
// Admin review of entity submissions and bank-transfer payments,
// shared by the CLI, the API server and tests

pub mod config;
pub mod dashboard;
pub mod db;
pub mod entities;
pub mod error;
pub mod import;
pub mod ledger;
pub mod linkage;
pub mod orchestrator;
pub mod registry;
pub mod users;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::ReviewConfig;
pub use dashboard::{collect_stats, ReviewStats};
pub use db::{history, open_database, setup_database, Event};
pub use entities::{
    ApprovalStatus, Classification, EntityDecision, EntityKind, EntitySubmission,
    InstituteDomain, OwnerSummary, PaymentDecision, PaymentEntityType, PaymentRequest,
    PaymentStatus, User,
};
pub use error::{ReviewError, ReviewResult};
pub use ledger::{PaymentCounts, PaymentFilter, PaymentPage};
pub use linkage::{Linkage, LinkageResolver};
pub use orchestrator::{
    ApprovalOrchestrator, EntityOutcome, EntityRow, PaymentListing, PaymentOutcome, PaymentRow,
};
pub use registry::{PendingCounts, SubmissionFilter};
pub use users::{RoleFilter, UserCounts, UserFilter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
