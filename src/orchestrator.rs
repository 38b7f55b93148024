// Approval Orchestrator - the reviewer-facing state machine
//
// Accept payment:  ledger (pending → verified), then best-effort cascade:
//                  resolve linkage → approve entity → record link.
//                  A cascade failure never undoes the verified payment; it
//                  comes back as a warning and the payment is flagged unlinked.
// Reject payment:  ledger (pending → rejected). No cascade.
// Decide entity:   registry (pending → approved|rejected). No cascade.
//
// Every action requires an admin reviewer.

use crate::config::ReviewConfig;
use crate::db::{record_event, with_write_tx, Event};
use crate::entities::{
    EntityDecision, EntityKind, EntitySubmission, OwnerSummary, PaymentDecision, PaymentRequest,
    PaymentStatus, User,
};
use crate::error::{ReviewError, ReviewResult};
use crate::ledger::{self, PaymentFilter};
use crate::linkage::{Linkage, LinkageResolver};
use crate::registry;
use crate::users;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

pub const DEFAULT_ACCEPT_NOTES: &str = "Payment verified and entity approved";
pub const DEFAULT_REJECT_NOTES: &str = "Payment rejected";

// ============================================================================
// RESULTS
// ============================================================================

/// Pending submission as shown to a reviewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    pub label: String,
    pub owner: OwnerSummary,
    pub entity: EntitySubmission,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityOutcome {
    pub entity: EntitySubmission,
    /// False when the submission already carried the requested decision
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRow {
    pub payer: OwnerSummary,
    pub verifier: Option<OwnerSummary>,
    pub payment: PaymentRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentListing {
    pub rows: Vec<PaymentRow>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub pages: u32,
}

/// Result of a payment decision.
///
/// `warning` is set when the payment write succeeded but the entity cascade
/// did not; `duplicates` lists other payments with the same bank transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub payment: PaymentRequest,
    pub entity: Option<EntitySubmission>,
    pub warning: Option<ReviewError>,
    pub duplicates: Vec<String>,
}

impl PaymentOutcome {
    pub fn is_partial(&self) -> bool {
        self.warning.is_some()
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ApprovalOrchestrator {
    config: ReviewConfig,
}

impl ApprovalOrchestrator {
    pub fn new(config: ReviewConfig) -> Self {
        ApprovalOrchestrator { config }
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    /// The acting user must exist and hold the admin role
    pub fn ensure_reviewer(&self, conn: &Connection, reviewer_id: &str) -> ReviewResult<User> {
        match users::find_user(conn, reviewer_id)? {
            Some(user) if user.is_admin => Ok(user),
            _ => {
                warn!(reviewer = reviewer_id, "review action refused");
                Err(ReviewError::NotAuthorized {
                    user_id: reviewer_id.to_string(),
                })
            }
        }
    }

    // ------------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------------

    pub fn list_pending_entities(
        &self,
        conn: &Connection,
        kind: Option<EntityKind>,
    ) -> ReviewResult<Vec<EntityRow>> {
        let rows = registry::list_pending(conn, kind)?
            .into_iter()
            .map(|entity| EntityRow {
                label: entity.display_label().to_string(),
                owner: users::owner_summary(conn, &entity.owner_id),
                entity,
            })
            .collect();
        Ok(rows)
    }

    /// Approve or reject a submission.
    ///
    /// Repeating the decision a submission already carries returns it
    /// unchanged; a conflicting decision is `InvalidTransition` (see
    /// `override_entity_decision`).
    pub fn decide_entity(
        &self,
        conn: &Connection,
        reviewer_id: &str,
        kind: EntityKind,
        id: &str,
        decision: EntityDecision,
        notes: Option<&str>,
    ) -> ReviewResult<EntityOutcome> {
        self.ensure_reviewer(conn, reviewer_id)?;
        let target = decision.status();

        let current = registry::get_submission(conn, kind, id)?;
        if current.status == target {
            info!(kind = %kind, id, status = %target, "entity already decided; no change");
            return Ok(EntityOutcome {
                entity: current,
                changed: false,
            });
        }

        if decision == EntityDecision::Approved && current.is_pending() {
            self.claim_funding_payment(conn, reviewer_id, &current)?;
        }

        match registry::set_approval(conn, kind, id, target, reviewer_id, notes) {
            Ok(entity) => Ok(EntityOutcome {
                entity,
                changed: true,
            }),
            Err(err @ ReviewError::InvalidTransition { .. }) => {
                // Lost a race; fine if the winner reached the same decision
                let now = registry::get_submission(conn, kind, id)?;
                if now.status == target {
                    Ok(EntityOutcome {
                        entity: now,
                        changed: false,
                    })
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Audited re-decision of an approved/rejected submission
    pub fn override_entity_decision(
        &self,
        conn: &Connection,
        reviewer_id: &str,
        kind: EntityKind,
        id: &str,
        decision: EntityDecision,
        reason: &str,
    ) -> ReviewResult<EntityOutcome> {
        self.ensure_reviewer(conn, reviewer_id)?;
        if !self.config.allow_decision_override {
            return Err(ReviewError::OverrideNotPermitted {
                kind,
                id: id.to_string(),
            });
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ReviewError::validation("an override needs a reason"));
        }

        let current = registry::get_submission(conn, kind, id)?;
        if current.is_pending() {
            return self.decide_entity(conn, reviewer_id, kind, id, decision, Some(reason));
        }
        if current.status == decision.status() {
            return Ok(EntityOutcome {
                entity: current,
                changed: false,
            });
        }
        if decision == EntityDecision::Approved {
            self.claim_funding_payment(conn, reviewer_id, &current)?;
        }

        warn!(kind = %kind, id, from = %current.status, to = %decision.status(), reviewer = reviewer_id, reason, "overriding entity decision");
        let entity = registry::override_approval(
            conn,
            kind,
            id,
            current.status,
            decision.status(),
            reviewer_id,
            reason,
        )?;
        Ok(EntityOutcome {
            entity,
            changed: true,
        })
    }

    /// Payment gate for a direct approval. An unlinked funding payment is
    /// linked to `entity` before it is approved, so it funds one entity only.
    fn claim_funding_payment(
        &self,
        conn: &Connection,
        reviewer_id: &str,
        entity: &EntitySubmission,
    ) -> ReviewResult<()> {
        let kind = entity.kind();
        if !self.config.requires_payment(kind) {
            return Ok(());
        }
        let required = || ReviewError::PaymentRequired {
            kind,
            id: entity.id.clone(),
        };

        let funding = ledger::find_funding_payment(conn, entity)?.ok_or_else(required)?;
        if funding.entity_id.as_deref() == Some(entity.id.as_str()) && !funding.needs_linkage {
            return Ok(());
        }

        match ledger::link_entity(conn, &funding.id, &entity.id, reviewer_id) {
            Ok(_) => {
                info!(payment_id = %funding.id, kind = %kind, entity_id = %entity.id, "funding payment claimed for approval");
                Ok(())
            }
            // Claimed by a concurrent approval
            Err(ReviewError::InvalidTransition { .. }) => Err(required()),
            Err(err) => Err(err),
        }
    }

    // ------------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------------

    pub fn list_payments(&self, conn: &Connection, filter: &PaymentFilter) -> ReviewResult<PaymentListing> {
        let mut filter = filter.clone();
        filter.page_size = filter.page_size.clamp(1, self.config.max_page_size);

        let page = ledger::list_by_filter(conn, &filter)?;
        let rows = page
            .payments
            .into_iter()
            .map(|payment| PaymentRow {
                payer: users::owner_summary(conn, &payment.user_id),
                verifier: payment
                    .verified_by
                    .as_deref()
                    .map(|id| users::owner_summary(conn, id)),
                payment,
            })
            .collect();

        Ok(PaymentListing {
            rows,
            total: page.total,
            page: page.page,
            page_size: page.page_size,
            pages: page.pages,
        })
    }

    pub fn decide_payment(
        &self,
        conn: &Connection,
        reviewer_id: &str,
        payment_id: &str,
        decision: PaymentDecision,
        notes: Option<&str>,
    ) -> ReviewResult<PaymentOutcome> {
        match decision {
            PaymentDecision::Accept => self.accept_payment(conn, reviewer_id, payment_id, notes),
            PaymentDecision::Reject => self.reject_payment(conn, reviewer_id, payment_id, notes),
        }
    }

    /// Verify a pending payment, then approve the entity it funds.
    ///
    /// Fails only when the payment write fails. Everything after it is
    /// reported through `PaymentOutcome::warning`.
    pub fn accept_payment(
        &self,
        conn: &Connection,
        reviewer_id: &str,
        payment_id: &str,
        notes: Option<&str>,
    ) -> ReviewResult<PaymentOutcome> {
        self.ensure_reviewer(conn, reviewer_id)?;
        let notes = notes.filter(|n| !n.trim().is_empty()).unwrap_or(DEFAULT_ACCEPT_NOTES);

        let verified = ledger::set_status(conn, payment_id, PaymentStatus::Verified, reviewer_id, Some(notes))
            .map_err(|e| primary_failure(payment_id, e))?;
        let duplicates = self.duplicates_of(conn, &verified);

        let outcome = match self.cascade(conn, reviewer_id, &verified, notes) {
            Ok((payment, entity)) => PaymentOutcome {
                payment,
                entity: Some(entity),
                warning: None,
                duplicates,
            },
            Err(CascadeError { warning, approved }) => {
                warn!(payment_id, warning = %warning, approved = approved.is_some(), "payment verified, entity cascade incomplete");
                let payment = match ledger::flag_unlinked(conn, payment_id, reviewer_id, warning.code()) {
                    Ok(flagged) => flagged,
                    Err(e) => {
                        error!(payment_id, error = %e, "could not flag payment as unlinked");
                        verified
                    }
                };
                PaymentOutcome {
                    payment,
                    entity: approved,
                    warning: Some(warning),
                    duplicates,
                }
            }
        };

        Ok(outcome)
    }

    /// Resolve, approve and link; any error here is a warning to the caller
    fn cascade(
        &self,
        conn: &Connection,
        reviewer_id: &str,
        payment: &PaymentRequest,
        notes: &str,
    ) -> Result<(PaymentRequest, EntitySubmission), CascadeError> {
        let linkage = LinkageResolver::resolve(conn, payment)?;
        let candidate = match linkage {
            Linkage::Linked { entity } => entity,
            unlinked @ Linkage::Unlinked { .. } => {
                return Err(unlinked
                    .ambiguity(payment)
                    .unwrap_or_else(|| ReviewError::validation("linkage unresolved"))
                    .into());
            }
        };

        let kind = candidate.kind();
        let entity = match registry::set_approval(
            conn,
            kind,
            &candidate.id,
            EntityDecision::Approved.status(),
            reviewer_id,
            Some(notes),
        ) {
            Ok(entity) => entity,
            Err(err @ ReviewError::InvalidTransition { .. }) => {
                // Approved elsewhere already: still link the payment to it
                let current = registry::get_submission(conn, kind, &candidate.id)?;
                if current.status != EntityDecision::Approved.status() {
                    return Err(err.into());
                }
                current
            }
            Err(err) => return Err(err.into()),
        };

        let linked = match ledger::link_entity(conn, &payment.id, &entity.id, reviewer_id) {
            Ok(linked) => linked,
            Err(warning) => {
                return Err(CascadeError {
                    warning,
                    approved: Some(entity),
                })
            }
        };
        info!(payment_id = %payment.id, kind = %kind, entity_id = %entity.id, "payment cascade approved entity");
        Ok((linked, entity))
    }

    pub fn reject_payment(
        &self,
        conn: &Connection,
        reviewer_id: &str,
        payment_id: &str,
        notes: Option<&str>,
    ) -> ReviewResult<PaymentOutcome> {
        self.ensure_reviewer(conn, reviewer_id)?;
        let notes = notes.filter(|n| !n.trim().is_empty()).unwrap_or(DEFAULT_REJECT_NOTES);

        let payment = ledger::set_status(conn, payment_id, PaymentStatus::Rejected, reviewer_id, Some(notes))
            .map_err(|e| primary_failure(payment_id, e))?;
        let duplicates = self.duplicates_of(conn, &payment);

        Ok(PaymentOutcome {
            payment,
            entity: None,
            warning: None,
            duplicates,
        })
    }

    /// rejected → pending, so a mistaken rejection can be decided again
    pub fn reopen_payment(
        &self,
        conn: &Connection,
        reviewer_id: &str,
        payment_id: &str,
        notes: Option<&str>,
    ) -> ReviewResult<PaymentRequest> {
        self.ensure_reviewer(conn, reviewer_id)?;
        ledger::reopen(conn, payment_id, reviewer_id, notes)
    }

    /// Manual linkage after an ambiguous or failed cascade. Does not approve
    /// the entity; that stays a separate decision.
    pub fn link_payment(
        &self,
        conn: &Connection,
        reviewer_id: &str,
        payment_id: &str,
        entity_id: &str,
    ) -> ReviewResult<PaymentRequest> {
        self.ensure_reviewer(conn, reviewer_id)?;
        let payment = ledger::get_payment(conn, payment_id)?;
        LinkageResolver::resolve_explicit(conn, &payment, entity_id)?;
        ledger::link_entity(conn, payment_id, entity_id, reviewer_id)
    }

    fn duplicates_of(&self, conn: &Connection, payment: &PaymentRequest) -> Vec<String> {
        match ledger::find_duplicates(conn, payment) {
            Ok(dups) => {
                let ids: Vec<String> = dups.into_iter().map(|p| p.id).collect();
                if !ids.is_empty() {
                    warn!(payment_id = %payment.id, transaction_id = %payment.transaction_id, duplicates = ids.len(), "transaction id seen on other payments");
                }
                ids
            }
            Err(e) => {
                warn!(payment_id = %payment.id, error = %e, "duplicate check failed");
                Vec::new()
            }
        }
    }

    // ------------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------------

    pub fn set_user_admin(
        &self,
        conn: &Connection,
        actor_id: &str,
        user_id: &str,
        is_admin: bool,
    ) -> ReviewResult<User> {
        self.ensure_reviewer(conn, actor_id)?;
        if actor_id == user_id && !is_admin {
            return Err(ReviewError::validation("admins cannot revoke their own admin role"));
        }

        let user = with_write_tx(conn, |tx| {
            let user = users::set_admin(tx, user_id, is_admin)?;
            let event_type = if is_admin { "user_admin_granted" } else { "user_admin_revoked" };
            record_event(tx, &Event::new(event_type, "user", user_id, serde_json::json!({}), actor_id))?;
            Ok(user)
        })?;

        info!(user_id, is_admin, actor = actor_id, "admin role changed");
        Ok(user)
    }

    pub fn set_user_verified(
        &self,
        conn: &Connection,
        actor_id: &str,
        user_id: &str,
        verified: bool,
    ) -> ReviewResult<User> {
        self.ensure_reviewer(conn, actor_id)?;

        let user = with_write_tx(conn, |tx| {
            let user = users::set_verified(tx, user_id, verified)?;
            let event_type = if verified { "user_verified" } else { "user_unverified" };
            record_event(tx, &Event::new(event_type, "user", user_id, serde_json::json!({}), actor_id))?;
            Ok(user)
        })?;

        info!(user_id, verified, actor = actor_id, "verification changed");
        Ok(user)
    }
}

/// Cascade stopped early; `approved` is set when the entity approval
/// committed before the failure
struct CascadeError {
    warning: ReviewError,
    approved: Option<EntitySubmission>,
}

impl From<ReviewError> for CascadeError {
    fn from(warning: ReviewError) -> Self {
        CascadeError {
            warning,
            approved: None,
        }
    }
}

/// A storage failure on the payment write aborts the action as a whole
fn primary_failure(payment_id: &str, err: ReviewError) -> ReviewError {
    match err {
        ReviewError::StorageUnavailable { reason } => ReviewError::PaymentUpdateFailed {
            payment_id: payment_id.to_string(),
            reason,
        },
        other => other,
    }
}
