// Entity Registry - institutes, shops and products awaiting review
//
// Status writes are conditional on the status the caller expects, so two
// reviewers acting at once cannot both move the same submission.

use crate::db::{fmt_ts, parse_col, parse_opt_ts, parse_ts, record_event, with_write_tx, Event};
use crate::entities::{
    ApprovalStatus, Classification, EntityKind, EntitySubmission, InstituteDomain,
};
use crate::error::{ReviewError, ReviewResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

const SUBMISSION_COLUMNS: &str = "kind, id, owner_id, name, domain, category, location, description,
     status, agent_id, review_notes, reviewed_by, reviewed_at, created_at";

fn submission_from_row(row: &Row) -> rusqlite::Result<EntitySubmission> {
    let kind: String = row.get(0)?;
    let kind: EntityKind = parse_col(0, &kind)?;
    let domain: Option<String> = row.get(4)?;
    let domain = domain
        .map(|d| parse_col::<InstituteDomain>(4, &d))
        .transpose()?;
    let status: String = row.get(8)?;
    let created_at: String = row.get(13)?;

    Ok(EntitySubmission {
        id: row.get(1)?,
        owner_id: row.get(2)?,
        name: row.get(3)?,
        classification: Classification::from_parts(kind, domain, row.get(5)?),
        location: row.get(6)?,
        description: row.get(7)?,
        status: parse_col(8, &status)?,
        agent_id: row.get(9)?,
        review_notes: row.get(10)?,
        reviewed_by: row.get(11)?,
        reviewed_at: parse_opt_ts(12, row.get(12)?)?,
        created_at: parse_ts(13, &created_at)?,
    })
}

// ============================================================================
// FILTER
// ============================================================================

/// Storage-side filter: kind, status, domain, owner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionFilter {
    pub kind: Option<EntityKind>,
    pub status: Option<ApprovalStatus>,
    pub domain: Option<InstituteDomain>,
    pub owner_id: Option<String>,
}

impl SubmissionFilter {
    pub fn pending(kind: Option<EntityKind>) -> Self {
        SubmissionFilter {
            kind,
            status: Some(ApprovalStatus::Pending),
            ..Default::default()
        }
    }
}

// ============================================================================
// READS
// ============================================================================

pub fn insert_submission(conn: &Connection, sub: &EntitySubmission) -> ReviewResult<()> {
    conn.execute(
        "INSERT INTO entity_submissions (
            kind, id, owner_id, name, domain, category, location, description,
            status, agent_id, review_notes, reviewed_by, reviewed_at, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            sub.kind().as_str(),
            sub.id,
            sub.owner_id,
            sub.name,
            sub.domain().map(|d| d.as_str()),
            sub.classification.category(),
            sub.location,
            sub.description,
            sub.status.as_str(),
            sub.agent_id,
            sub.review_notes,
            sub.reviewed_by,
            sub.reviewed_at.as_ref().map(fmt_ts),
            fmt_ts(&sub.created_at),
        ],
    )?;
    Ok(())
}

pub fn find_submission(
    conn: &Connection,
    kind: EntityKind,
    id: &str,
) -> ReviewResult<Option<EntitySubmission>> {
    let sub = conn
        .query_row(
            &format!(
                "SELECT {} FROM entity_submissions WHERE kind = ?1 AND id = ?2",
                SUBMISSION_COLUMNS
            ),
            params![kind.as_str(), id],
            submission_from_row,
        )
        .optional()?;
    Ok(sub)
}

pub fn get_submission(conn: &Connection, kind: EntityKind, id: &str) -> ReviewResult<EntitySubmission> {
    find_submission(conn, kind, id)?.ok_or_else(|| ReviewError::not_found(kind.as_str(), id))
}

/// Submissions matching `filter`, oldest first
pub fn list_submissions(
    conn: &Connection,
    filter: &SubmissionFilter,
) -> ReviewResult<Vec<EntitySubmission>> {
    let mut sql = format!("SELECT {} FROM entity_submissions WHERE 1 = 1", SUBMISSION_COLUMNS);
    let mut args: Vec<String> = Vec::new();

    if let Some(kind) = filter.kind {
        args.push(kind.as_str().to_string());
        sql.push_str(&format!(" AND kind = ?{}", args.len()));
    }
    if let Some(status) = filter.status {
        args.push(status.as_str().to_string());
        sql.push_str(&format!(" AND status = ?{}", args.len()));
    }
    if let Some(domain) = filter.domain {
        args.push(domain.as_str().to_string());
        sql.push_str(&format!(" AND domain = ?{}", args.len()));
    }
    if let Some(owner) = &filter.owner_id {
        args.push(owner.clone());
        sql.push_str(&format!(" AND owner_id = ?{}", args.len()));
    }
    sql.push_str(" ORDER BY created_at ASC, kind, id");

    let mut stmt = conn.prepare(&sql)?;
    let subs = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), submission_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(subs)
}

/// Pending submissions of one kind, or all kinds merged (each row carries its kind)
pub fn list_pending(conn: &Connection, kind: Option<EntityKind>) -> ReviewResult<Vec<EntitySubmission>> {
    list_submissions(conn, &SubmissionFilter::pending(kind))
}

// ============================================================================
// WRITES
// ============================================================================

/// Move a pending submission to approved/rejected.
///
/// Fails with `NotFound` when the pair is absent and `InvalidTransition`
/// when the submission is no longer pending (including the loser of a race).
pub fn set_approval(
    conn: &Connection,
    kind: EntityKind,
    id: &str,
    status: ApprovalStatus,
    reviewer_id: &str,
    notes: Option<&str>,
) -> ReviewResult<EntitySubmission> {
    if status == ApprovalStatus::Pending {
        return Err(ReviewError::invalid_transition(kind.as_str(), id, "pending", "pending"));
    }

    let updated = with_write_tx(conn, |tx| {
        let changed = tx.execute(
            "UPDATE entity_submissions
             SET status = ?1, review_notes = ?2, reviewed_by = ?3, reviewed_at = ?4
             WHERE kind = ?5 AND id = ?6 AND status = 'pending'",
            params![
                status.as_str(),
                notes,
                reviewer_id,
                fmt_ts(&Utc::now()),
                kind.as_str(),
                id
            ],
        )?;

        if changed == 0 {
            let current = get_submission(tx, kind, id)?;
            return Err(ReviewError::invalid_transition(
                kind.as_str(),
                id,
                current.status.as_str(),
                status.as_str(),
            ));
        }

        record_event(
            tx,
            &Event::new(
                &format!("entity_{}", status.as_str()),
                kind.as_str(),
                id,
                serde_json::json!({ "notes": notes }),
                reviewer_id,
            ),
        )?;

        get_submission(tx, kind, id)
    })?;

    info!(kind = %kind, id, status = %status, reviewer = reviewer_id, "entity decided");
    Ok(updated)
}

/// Re-decide a submission that is already approved/rejected.
///
/// Optimistic: only applies while the status is still `expected`.
pub fn override_approval(
    conn: &Connection,
    kind: EntityKind,
    id: &str,
    expected: ApprovalStatus,
    status: ApprovalStatus,
    reviewer_id: &str,
    reason: &str,
) -> ReviewResult<EntitySubmission> {
    if !expected.is_terminal() || !status.is_terminal() {
        return Err(ReviewError::invalid_transition(
            kind.as_str(),
            id,
            expected.as_str(),
            status.as_str(),
        ));
    }

    let updated = with_write_tx(conn, |tx| {
        let changed = tx.execute(
            "UPDATE entity_submissions
             SET status = ?1, review_notes = ?2, reviewed_by = ?3, reviewed_at = ?4
             WHERE kind = ?5 AND id = ?6 AND status = ?7",
            params![
                status.as_str(),
                reason,
                reviewer_id,
                fmt_ts(&Utc::now()),
                kind.as_str(),
                id,
                expected.as_str()
            ],
        )?;

        if changed == 0 {
            let current = get_submission(tx, kind, id)?;
            return Err(ReviewError::invalid_transition(
                kind.as_str(),
                id,
                current.status.as_str(),
                status.as_str(),
            ));
        }

        record_event(
            tx,
            &Event::new(
                "entity_decision_overridden",
                kind.as_str(),
                id,
                serde_json::json!({
                    "from": expected.as_str(),
                    "to": status.as_str(),
                    "reason": reason,
                }),
                reviewer_id,
            ),
        )?;

        get_submission(tx, kind, id)
    })?;

    info!(kind = %kind, id, from = %expected, to = %status, reviewer = reviewer_id, "entity decision overridden");
    Ok(updated)
}

// ============================================================================
// COUNTS
// ============================================================================

/// Pending submissions per display bucket (hospitals apart from institutes)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingCounts {
    pub institutes: i64,
    pub hospitals: i64,
    pub shops: i64,
    pub products: i64,
}

impl PendingCounts {
    pub fn total(&self) -> i64 {
        self.institutes + self.hospitals + self.shops + self.products
    }
}

pub fn count_pending(conn: &Connection) -> ReviewResult<PendingCounts> {
    let mut stmt = conn.prepare(
        "SELECT kind, COALESCE(domain, ''), COUNT(*)
         FROM entity_submissions
         WHERE status = 'pending'
         GROUP BY kind, domain",
    )?;

    let rows: HashMap<(String, String), i64> = stmt
        .query_map([], |row| Ok(((row.get(0)?, row.get(1)?), row.get(2)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;

    let mut counts = PendingCounts::default();
    for ((kind, domain), count) in rows {
        match (kind.as_str(), domain.as_str()) {
            ("institute", "healthcare") => counts.hospitals += count,
            ("institute", _) => counts.institutes += count,
            ("shop", _) => counts.shops += count,
            ("product", _) => counts.products += count,
            _ => {}
        }
    }
    Ok(counts)
}
