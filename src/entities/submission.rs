// Entity submissions - institutes, shops and marketplace products
//
// A submission is created by the user-facing flow and only ever changes
// status here. Rejection is terminal, rows are never deleted.

use crate::error::ReviewError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ENTITY KIND
// ============================================================================

/// Storage key for submissions; every submission lives under exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Institute,
    Shop,
    Product,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Institute, EntityKind::Shop, EntityKind::Product];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Institute => "institute",
            EntityKind::Shop => "shop",
            EntityKind::Product => "product",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "institute" | "institutes" => Ok(EntityKind::Institute),
            "shop" | "shops" => Ok(EntityKind::Shop),
            "product" | "products" => Ok(EntityKind::Product),
            other => Err(ReviewError::validation(format!("unknown entity kind '{}'", other))),
        }
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstituteDomain {
    Education,
    Healthcare,
}

impl InstituteDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstituteDomain::Education => "education",
            InstituteDomain::Healthcare => "healthcare",
        }
    }
}

impl FromStr for InstituteDomain {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "education" => Ok(InstituteDomain::Education),
            "healthcare" => Ok(InstituteDomain::Healthcare),
            other => Err(ReviewError::validation(format!("unknown institute domain '{}'", other))),
        }
    }
}

/// Kind-specific classification. Institutes carry a domain, shops and
/// products a free-form type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Classification {
    Institute { domain: InstituteDomain },
    Shop { category: Option<String> },
    Product { category: Option<String> },
}

impl Classification {
    pub fn kind(&self) -> EntityKind {
        match self {
            Classification::Institute { .. } => EntityKind::Institute,
            Classification::Shop { .. } => EntityKind::Shop,
            Classification::Product { .. } => EntityKind::Product,
        }
    }

    pub fn domain(&self) -> Option<InstituteDomain> {
        match self {
            Classification::Institute { domain } => Some(*domain),
            _ => None,
        }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            Classification::Institute { .. } => None,
            Classification::Shop { category } | Classification::Product { category } => {
                category.as_deref()
            }
        }
    }

    /// Rebuild from the stored columns
    pub fn from_parts(
        kind: EntityKind,
        domain: Option<InstituteDomain>,
        category: Option<String>,
    ) -> Self {
        match kind {
            EntityKind::Institute => Classification::Institute {
                domain: domain.unwrap_or(InstituteDomain::Education),
            },
            EntityKind::Shop => Classification::Shop { category },
            EntityKind::Product => Classification::Product { category },
        }
    }
}

// ============================================================================
// APPROVAL STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            other => Err(ReviewError::validation(format!("unknown approval status '{}'", other))),
        }
    }
}

/// A reviewer's verdict on a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityDecision {
    Approved,
    Rejected,
}

impl EntityDecision {
    pub fn status(&self) -> ApprovalStatus {
        match self {
            EntityDecision::Approved => ApprovalStatus::Approved,
            EntityDecision::Rejected => ApprovalStatus::Rejected,
        }
    }
}

impl FromStr for EntityDecision {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "approved" | "approve" => Ok(EntityDecision::Approved),
            "rejected" | "reject" | "deny" => Ok(EntityDecision::Rejected),
            other => Err(ReviewError::validation(format!("unknown decision '{}'", other))),
        }
    }
}

// ============================================================================
// ENTITY SUBMISSION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySubmission {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub classification: Classification,
    pub location: Option<String>,
    pub description: Option<String>,
    pub status: ApprovalStatus,
    pub agent_id: Option<String>,
    pub review_notes: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl EntitySubmission {
    /// New pending submission with a fresh id
    pub fn new(owner_id: &str, name: &str, classification: Classification) -> Self {
        EntitySubmission {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            classification,
            location: None,
            description: None,
            status: ApprovalStatus::Pending,
            agent_id: None,
            review_notes: None,
            reviewed_by: None,
            reviewed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.classification.kind()
    }

    pub fn domain(&self) -> Option<InstituteDomain> {
        self.classification.domain()
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    /// Label shown to reviewers; healthcare institutes are hospitals
    pub fn display_label(&self) -> &'static str {
        match &self.classification {
            Classification::Institute {
                domain: InstituteDomain::Healthcare,
            } => "Hospital",
            Classification::Institute { .. } => "Institute",
            Classification::Shop { .. } => "Shop",
            Classification::Product { .. } => "Product",
        }
    }

    pub fn with_agent_id(mut self, agent_id: Option<&str>) -> Self {
        self.agent_id = super::normalize_agent_id(agent_id);
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing_accepts_plurals() {
        assert_eq!("shops".parse::<EntityKind>().unwrap(), EntityKind::Shop);
        assert_eq!(" Institute ".parse::<EntityKind>().unwrap(), EntityKind::Institute);
        assert!("hospital".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_hospital_label() {
        let hospital = EntitySubmission::new(
            "u1",
            "City Care",
            Classification::Institute {
                domain: InstituteDomain::Healthcare,
            },
        );
        let school = EntitySubmission::new(
            "u1",
            "Grammar School",
            Classification::Institute {
                domain: InstituteDomain::Education,
            },
        );

        assert_eq!(hospital.display_label(), "Hospital");
        assert_eq!(school.display_label(), "Institute");
        assert_eq!(hospital.kind(), EntityKind::Institute);
    }

    #[test]
    fn test_classification_round_trips_through_columns() {
        let shop = Classification::Shop {
            category: Some("grocery".to_string()),
        };
        let rebuilt = Classification::from_parts(
            shop.kind(),
            shop.domain(),
            shop.category().map(str::to_string),
        );
        assert_eq!(rebuilt, shop);
    }

    #[test]
    fn test_null_agent_id_is_absent() {
        let sub = EntitySubmission::new("u1", "Shop", Classification::Shop { category: None })
            .with_agent_id(Some("null"));
        assert_eq!(sub.agent_id, None);
        assert!(sub.is_pending());
    }

    #[test]
    fn test_decision_maps_to_status() {
        assert_eq!("approve".parse::<EntityDecision>().unwrap().status(), ApprovalStatus::Approved);
        assert_eq!(EntityDecision::Rejected.status(), ApprovalStatus::Rejected);
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert!(!ApprovalStatus::Pending.is_terminal());
    }
}
