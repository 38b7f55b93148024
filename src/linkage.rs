// Linkage Resolver - which submission does a payment fund?
//
// 1. An explicit entity reference resolves directly under the mapped kind.
// 2. Otherwise the payer's pending submissions of the mapped kind are
//    searched; exactly one match is the candidate. Several matches are
//    narrowed by agent identifier when the payment carries one.
// 3. `hospital` maps to institutes in the healthcare domain.
//
// Read-only: resolving twice against an unchanged registry gives the same answer.

use crate::entities::{ApprovalStatus, EntityKind, EntitySubmission, PaymentRequest};
use crate::error::{ReviewError, ReviewResult};
use crate::registry::{self, SubmissionFilter};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "linkage", rename_all = "snake_case")]
pub enum Linkage {
    /// Exactly one submission corresponds to the payment
    Linked { entity: EntitySubmission },
    /// Zero or several candidates; the reviewer resolves by hand
    Unlinked { candidates: usize },
}

impl Linkage {
    pub fn entity(&self) -> Option<&EntitySubmission> {
        match self {
            Linkage::Linked { entity } => Some(entity),
            Linkage::Unlinked { .. } => None,
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, Linkage::Linked { .. })
    }

    /// Warning surfaced to the reviewer when nothing could be linked
    pub fn ambiguity(&self, payment: &PaymentRequest) -> Option<ReviewError> {
        match self {
            Linkage::Linked { .. } => None,
            Linkage::Unlinked { candidates } => Some(ReviewError::LinkageAmbiguous {
                payment_id: payment.id.clone(),
                entity_type: payment.entity_type,
                candidates: *candidates,
            }),
        }
    }
}

pub struct LinkageResolver;

impl LinkageResolver {
    pub fn resolve(conn: &Connection, payment: &PaymentRequest) -> ReviewResult<Linkage> {
        match payment.entity_id.as_deref() {
            Some(entity_id) => Self::resolve_explicit(conn, payment, entity_id),
            None => Self::resolve_by_owner(conn, payment),
        }
    }

    /// Resolve a named submission under the payment's mapped kind
    /// (and domain, for hospitals)
    pub fn resolve_explicit(
        conn: &Connection,
        payment: &PaymentRequest,
        entity_id: &str,
    ) -> ReviewResult<Linkage> {
        let kind = payment.entity_type.entity_kind();
        let not_found = || ReviewError::LinkageNotFound {
            payment_id: payment.id.clone(),
            kind,
            entity_id: entity_id.to_string(),
        };

        let entity = registry::find_submission(conn, kind, entity_id)?.ok_or_else(not_found)?;

        if let Some(domain) = payment.entity_type.required_domain() {
            if entity.domain() != Some(domain) {
                return Err(not_found());
            }
        }

        if entity.owner_id != payment.user_id {
            warn!(
                payment_id = %payment.id,
                entity_id,
                owner = %entity.owner_id,
                payer = %payment.user_id,
                "payment references a submission owned by someone else"
            );
        }

        Ok(Linkage::Linked { entity })
    }

    fn resolve_by_owner(conn: &Connection, payment: &PaymentRequest) -> ReviewResult<Linkage> {
        let candidates = Self::candidates(conn, payment)?;

        let count = candidates.len();
        let linkage = match <[EntitySubmission; 1]>::try_from(candidates) {
            Ok([entity]) => Linkage::Linked { entity },
            Err(candidates) => Self::narrow_by_agent(payment, candidates)
                .unwrap_or(Linkage::Unlinked { candidates: count }),
        };

        debug!(payment_id = %payment.id, linked = linkage.is_linked(), "linkage resolved");
        Ok(linkage)
    }

    /// Pending submissions of the mapped kind owned by the payer
    pub fn candidates(conn: &Connection, payment: &PaymentRequest) -> ReviewResult<Vec<EntitySubmission>> {
        let kind: EntityKind = payment.entity_type.entity_kind();
        registry::list_submissions(
            conn,
            &SubmissionFilter {
                kind: Some(kind),
                status: Some(ApprovalStatus::Pending),
                domain: payment.entity_type.required_domain(),
                owner_id: Some(payment.user_id.clone()),
            },
        )
    }

    fn narrow_by_agent(payment: &PaymentRequest, candidates: Vec<EntitySubmission>) -> Option<Linkage> {
        let agent = payment.agent_id.as_deref()?;
        let mut matching: Vec<EntitySubmission> = candidates
            .into_iter()
            .filter(|c| c.agent_id.as_deref() == Some(agent))
            .collect();

        if matching.len() == 1 {
            matching.pop().map(|entity| Linkage::Linked { entity })
        } else {
            None
        }
    }
}
