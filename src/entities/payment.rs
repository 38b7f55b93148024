// Payment requests - off-band bank transfers awaiting verification

use super::submission::{EntityKind, InstituteDomain};
use crate::error::ReviewError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// PAYMENT ENTITY TYPE
// ============================================================================

/// Entity taxonomy as payers see it. `Hospital` is the healthcare domain of
/// the institute kind, `Marketplace` funds a product listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentEntityType {
    Shop,
    Institute,
    Hospital,
    Marketplace,
}

impl PaymentEntityType {
    pub const ALL: [PaymentEntityType; 4] = [
        PaymentEntityType::Shop,
        PaymentEntityType::Institute,
        PaymentEntityType::Hospital,
        PaymentEntityType::Marketplace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEntityType::Shop => "shop",
            PaymentEntityType::Institute => "institute",
            PaymentEntityType::Hospital => "hospital",
            PaymentEntityType::Marketplace => "marketplace",
        }
    }

    /// Submission kind this payment type funds
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            PaymentEntityType::Shop => EntityKind::Shop,
            PaymentEntityType::Institute | PaymentEntityType::Hospital => EntityKind::Institute,
            PaymentEntityType::Marketplace => EntityKind::Product,
        }
    }

    /// Domain restriction applied when resolving against institutes
    pub fn required_domain(&self) -> Option<InstituteDomain> {
        match self {
            PaymentEntityType::Hospital => Some(InstituteDomain::Healthcare),
            _ => None,
        }
    }

    /// Payment types that can fund a submission of `kind`/`domain`
    pub fn funding(kind: EntityKind, domain: Option<InstituteDomain>) -> Vec<PaymentEntityType> {
        match (kind, domain) {
            (EntityKind::Institute, Some(InstituteDomain::Healthcare)) => {
                vec![PaymentEntityType::Hospital, PaymentEntityType::Institute]
            }
            (EntityKind::Institute, _) => vec![PaymentEntityType::Institute],
            (EntityKind::Shop, _) => vec![PaymentEntityType::Shop],
            (EntityKind::Product, _) => vec![PaymentEntityType::Marketplace],
        }
    }
}

impl fmt::Display for PaymentEntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentEntityType {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "shop" => Ok(PaymentEntityType::Shop),
            "institute" => Ok(PaymentEntityType::Institute),
            "hospital" => Ok(PaymentEntityType::Hospital),
            "marketplace" => Ok(PaymentEntityType::Marketplace),
            other => Err(ReviewError::validation(format!("unknown payment entity type '{}'", other))),
        }
    }
}

// ============================================================================
// PAYMENT STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Verified,
    Rejected,
    /// Set by external settlement only; tolerated on read
    Completed,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 4] = [
        PaymentStatus::Pending,
        PaymentStatus::Verified,
        PaymentStatus::Rejected,
        PaymentStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Verified => "verified",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Statuses that count as funded for approval purposes
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Verified | PaymentStatus::Completed)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "verified" | "approved" => Ok(PaymentStatus::Verified),
            "rejected" => Ok(PaymentStatus::Rejected),
            "completed" => Ok(PaymentStatus::Completed),
            other => Err(ReviewError::validation(format!("unknown payment status '{}'", other))),
        }
    }
}

/// A reviewer's verdict on a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentDecision {
    Accept,
    Reject,
}

impl FromStr for PaymentDecision {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accept" | "verified" | "verify" | "approve" => Ok(PaymentDecision::Accept),
            "reject" | "rejected" => Ok(PaymentDecision::Reject),
            other => Err(ReviewError::validation(format!("unknown payment decision '{}'", other))),
        }
    }
}

// ============================================================================
// PAYMENT REQUEST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: String,
    pub user_id: String,
    pub entity_type: PaymentEntityType,
    /// Linked submission id; absent until linkage succeeds
    pub entity_id: Option<String>,
    pub agent_id: Option<String>,
    pub amount: Decimal,
    pub processing_fee: Option<Decimal>,
    /// Payer-supplied, not unique across banks
    pub transaction_id: String,
    pub bank_name: String,
    pub account_number: String,
    pub transaction_date: DateTime<Utc>,
    pub notes: Option<String>,
    /// Opaque file handle resolved by the file collaborator
    pub screenshot_file: Option<String>,
    pub status: PaymentStatus,
    pub verified_by: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verification_notes: Option<String>,
    /// Verified, but the cascade could not resolve an entity
    pub needs_linkage: bool,
    pub created_at: DateTime<Utc>,
}

impl PaymentRequest {
    pub fn new(
        user_id: &str,
        entity_type: PaymentEntityType,
        amount: Decimal,
        transaction_id: &str,
        bank_name: &str,
        transaction_date: DateTime<Utc>,
    ) -> Self {
        PaymentRequest {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            entity_type,
            entity_id: None,
            agent_id: None,
            amount,
            processing_fee: None,
            transaction_id: transaction_id.to_string(),
            bank_name: bank_name.to_string(),
            account_number: String::new(),
            transaction_date,
            notes: None,
            screenshot_file: None,
            status: PaymentStatus::Pending,
            verified_by: None,
            verified_at: None,
            verification_notes: None,
            needs_linkage: false,
            created_at: Utc::now(),
        }
    }

    pub fn total_amount(&self) -> Decimal {
        self.amount + self.processing_fee.unwrap_or(Decimal::ZERO)
    }

    pub fn is_linked(&self) -> bool {
        self.entity_id.is_some()
    }

    /// Fingerprint for duplicate detection across payment requests.
    /// Same bank + same transaction id, ignoring case and surrounding space.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.bank_name.trim().to_lowercase());
        hasher.update(b"|");
        hasher.update(self.transaction_id.trim().to_lowercase());
        format!("{:x}", hasher.finalize())
    }

    pub fn with_entity_id(mut self, entity_id: Option<&str>) -> Self {
        self.entity_id = entity_id
            .map(str::trim)
            .filter(|id| !id.is_empty() && !id.eq_ignore_ascii_case("null"))
            .map(str::to_string);
        self
    }

    pub fn with_agent_id(mut self, agent_id: Option<&str>) -> Self {
        self.agent_id = super::normalize_agent_id(agent_id);
        self
    }
}
