// Payment Ledger - bank-transfer receipts awaiting verification
//
// Same write discipline as the registry: every status change is a single
// conditional UPDATE committed together with its audit event.

use crate::db::{fmt_ts, parse_col, parse_opt_ts, parse_ts, record_event, with_write_tx, Event};
use crate::entities::{EntitySubmission, PaymentEntityType, PaymentRequest, PaymentStatus};
use crate::error::{ReviewError, ReviewResult};
use chrono::Utc;
use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const PAYMENT_COLUMNS: &str = "id, user_id, entity_type, entity_id, agent_id, amount, processing_fee,
     transaction_id, bank_name, account_number, transaction_date, notes, screenshot_file,
     status, verified_by, verified_at, verification_notes, needs_linkage, created_at";

fn payment_from_row(row: &Row) -> rusqlite::Result<PaymentRequest> {
    let entity_type: String = row.get(2)?;
    let amount: String = row.get(5)?;
    let fee: Option<String> = row.get(6)?;
    let transaction_date: String = row.get(10)?;
    let status: String = row.get(13)?;
    let created_at: String = row.get(18)?;

    Ok(PaymentRequest {
        id: row.get(0)?,
        user_id: row.get(1)?,
        entity_type: parse_col(2, &entity_type)?,
        entity_id: row.get(3)?,
        agent_id: row.get(4)?,
        amount: parse_col::<Decimal>(5, &amount)?,
        processing_fee: fee.map(|f| parse_col::<Decimal>(6, &f)).transpose()?,
        transaction_id: row.get(7)?,
        bank_name: row.get(8)?,
        account_number: row.get(9)?,
        transaction_date: parse_ts(10, &transaction_date)?,
        notes: row.get(11)?,
        screenshot_file: row.get(12)?,
        status: parse_col(13, &status)?,
        verified_by: row.get(14)?,
        verified_at: parse_opt_ts(15, row.get(15)?)?,
        verification_notes: row.get(16)?,
        needs_linkage: row.get(17)?,
        created_at: parse_ts(18, &created_at)?,
    })
}

// ============================================================================
// FILTER / PAGE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentFilter {
    pub status: Option<PaymentStatus>,
    pub entity_type: Option<PaymentEntityType>,
    /// 1-based
    pub page: u32,
    pub page_size: u32,
}

impl Default for PaymentFilter {
    fn default() -> Self {
        PaymentFilter {
            status: None,
            entity_type: None,
            page: 1,
            page_size: crate::config::DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPage {
    pub payments: Vec<PaymentRequest>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub pages: u32,
}

// ============================================================================
// READS
// ============================================================================

pub fn insert_payment(conn: &Connection, payment: &PaymentRequest) -> ReviewResult<()> {
    conn.execute(
        "INSERT INTO payment_requests (
            id, user_id, entity_type, entity_id, agent_id, amount, processing_fee,
            transaction_id, bank_name, account_number, transaction_date, notes, screenshot_file,
            status, verified_by, verified_at, verification_notes, needs_linkage, fingerprint, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        params![
            payment.id,
            payment.user_id,
            payment.entity_type.as_str(),
            payment.entity_id,
            payment.agent_id,
            payment.amount.to_string(),
            payment.processing_fee.map(|f| f.to_string()),
            payment.transaction_id,
            payment.bank_name,
            payment.account_number,
            fmt_ts(&payment.transaction_date),
            payment.notes,
            payment.screenshot_file,
            payment.status.as_str(),
            payment.verified_by,
            payment.verified_at.as_ref().map(fmt_ts),
            payment.verification_notes,
            payment.needs_linkage,
            payment.fingerprint(),
            fmt_ts(&payment.created_at),
        ],
    )?;
    Ok(())
}

pub fn find_payment(conn: &Connection, id: &str) -> ReviewResult<Option<PaymentRequest>> {
    let payment = conn
        .query_row(
            &format!("SELECT {} FROM payment_requests WHERE id = ?1", PAYMENT_COLUMNS),
            [id],
            payment_from_row,
        )
        .optional()?;
    Ok(payment)
}

pub fn get_payment(conn: &Connection, id: &str) -> ReviewResult<PaymentRequest> {
    find_payment(conn, id)?.ok_or_else(|| ReviewError::not_found("payment", id))
}

/// Filtered page, most recent transaction date first
pub fn list_by_filter(conn: &Connection, filter: &PaymentFilter) -> ReviewResult<PaymentPage> {
    let page = filter.page.max(1);
    let page_size = filter.page_size.max(1);

    let mut clause = String::from(" WHERE 1 = 1");
    let mut args: Vec<String> = Vec::new();
    if let Some(status) = filter.status {
        args.push(status.as_str().to_string());
        clause.push_str(&format!(" AND status = ?{}", args.len()));
    }
    if let Some(entity_type) = filter.entity_type {
        args.push(entity_type.as_str().to_string());
        clause.push_str(&format!(" AND entity_type = ?{}", args.len()));
    }

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM payment_requests{}", clause),
        rusqlite::params_from_iter(args.iter()),
        |row| row.get(0),
    )?;

    let offset = (page as i64 - 1) * page_size as i64;
    let sql = format!(
        "SELECT {} FROM payment_requests{}
         ORDER BY transaction_date DESC, created_at DESC, id
         LIMIT {} OFFSET {}",
        PAYMENT_COLUMNS, clause, page_size, offset
    );
    let mut stmt = conn.prepare(&sql)?;
    let payments = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), payment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let pages = ((total as u64 + page_size as u64 - 1) / page_size as u64).max(1) as u32;

    Ok(PaymentPage {
        payments,
        total,
        page,
        page_size,
        pages,
    })
}

/// Other payments carrying the same bank + transaction id
pub fn find_duplicates(conn: &Connection, payment: &PaymentRequest) -> ReviewResult<Vec<PaymentRequest>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM payment_requests
         WHERE fingerprint = ?1 AND id <> ?2
         ORDER BY created_at",
        PAYMENT_COLUMNS
    ))?;
    let dups = stmt
        .query_map(params![payment.fingerprint(), payment.id], payment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(dups)
}

/// The settled payment funding `entity`: one already linked to it, else the
/// oldest unlinked settled payment of a matching type from its owner
pub fn find_funding_payment(conn: &Connection, entity: &EntitySubmission) -> ReviewResult<Option<PaymentRequest>> {
    let types: Vec<String> = PaymentEntityType::funding(entity.kind(), entity.domain())
        .iter()
        .map(|t| format!("'{}'", t.as_str()))
        .collect();

    let sql = format!(
        "SELECT {} FROM payment_requests
         WHERE status IN ('verified', 'completed')
           AND entity_type IN ({})
           AND (entity_id = ?1 OR (entity_id IS NULL AND user_id = ?2))
         ORDER BY CASE WHEN entity_id = ?1 THEN 0 ELSE 1 END, transaction_date, created_at, id
         LIMIT 1",
        PAYMENT_COLUMNS,
        types.join(", ")
    );
    let funding = conn
        .query_row(&sql, params![entity.id, entity.owner_id], payment_from_row)
        .optional()?;
    Ok(funding)
}

// ============================================================================
// WRITES
// ============================================================================

/// Move a pending payment to verified/rejected/completed, stamping the verifier.
///
/// `NotFound` when absent, `InvalidTransition` when it is no longer pending.
/// A rejected payment must be reopened before it can be decided again.
pub fn set_status(
    conn: &Connection,
    id: &str,
    status: PaymentStatus,
    verifier_id: &str,
    notes: Option<&str>,
) -> ReviewResult<PaymentRequest> {
    if status == PaymentStatus::Pending {
        return Err(ReviewError::invalid_transition("payment", id, "pending", "pending"));
    }

    let updated = with_write_tx(conn, |tx| {
        let changed = tx.execute(
            "UPDATE payment_requests
             SET status = ?1, verified_by = ?2, verified_at = ?3, verification_notes = ?4
             WHERE id = ?5 AND status = 'pending'",
            params![status.as_str(), verifier_id, fmt_ts(&Utc::now()), notes, id],
        )?;

        if changed == 0 {
            let current = get_payment(tx, id)?;
            return Err(ReviewError::invalid_transition(
                "payment",
                id,
                current.status.as_str(),
                status.as_str(),
            ));
        }

        record_event(
            tx,
            &Event::new(
                &format!("payment_{}", status.as_str()),
                "payment",
                id,
                serde_json::json!({ "notes": notes }),
                verifier_id,
            ),
        )?;

        get_payment(tx, id)
    })?;

    info!(payment_id = id, status = %status, verifier = verifier_id, "payment status set");
    Ok(updated)
}

/// First step of correcting a mistaken rejection: rejected → pending.
/// Clears the verifier stamp; the previous decision stays in the audit trail.
pub fn reopen(conn: &Connection, id: &str, reviewer_id: &str, notes: Option<&str>) -> ReviewResult<PaymentRequest> {
    let updated = with_write_tx(conn, |tx| {
        let changed = tx.execute(
            "UPDATE payment_requests
             SET status = 'pending', verified_by = NULL, verified_at = NULL, verification_notes = NULL
             WHERE id = ?1 AND status = 'rejected'",
            [id],
        )?;

        if changed == 0 {
            let current = get_payment(tx, id)?;
            return Err(ReviewError::invalid_transition(
                "payment",
                id,
                current.status.as_str(),
                "pending",
            ));
        }

        record_event(
            tx,
            &Event::new(
                "payment_reopened",
                "payment",
                id,
                serde_json::json!({ "notes": notes }),
                reviewer_id,
            ),
        )?;

        get_payment(tx, id)
    })?;

    info!(payment_id = id, reviewer = reviewer_id, "payment reopened");
    Ok(updated)
}

/// Record linkage to `entity_id` and clear the unlinked flag.
/// Replaces an existing link only when that link was flagged as failed.
pub fn link_entity(conn: &Connection, id: &str, entity_id: &str, actor: &str) -> ReviewResult<PaymentRequest> {
    with_write_tx(conn, |tx| {
        let changed = tx.execute(
            "UPDATE payment_requests
             SET entity_id = ?1, needs_linkage = 0
             WHERE id = ?2 AND (entity_id IS NULL OR entity_id = ?1 OR needs_linkage = 1)",
            params![entity_id, id],
        )?;

        if changed == 0 {
            let current = get_payment(tx, id)?;
            return Err(ReviewError::invalid_transition(
                "payment",
                id,
                format!("linked to {}", current.entity_id.unwrap_or_default()),
                format!("linked to {}", entity_id),
            ));
        }

        record_event(
            tx,
            &Event::new(
                "payment_linked",
                "payment",
                id,
                serde_json::json!({ "entity_id": entity_id }),
                actor,
            ),
        )?;

        get_payment(tx, id)
    })
}

/// Mark a verified payment whose cascade could not resolve an entity
pub fn flag_unlinked(conn: &Connection, id: &str, actor: &str, reason: &str) -> ReviewResult<PaymentRequest> {
    with_write_tx(conn, |tx| {
        let changed = tx.execute("UPDATE payment_requests SET needs_linkage = 1 WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(ReviewError::not_found("payment", id));
        }

        record_event(
            tx,
            &Event::new(
                "payment_flagged_unlinked",
                "payment",
                id,
                serde_json::json!({ "reason": reason }),
                actor,
            ),
        )?;
        warn!(payment_id = id, reason, "verified payment left unlinked");

        get_payment(tx, id)
    })
}

// ============================================================================
// COUNTS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentCounts {
    pub pending: i64,
    pub verified: i64,
    pub rejected: i64,
    pub completed: i64,
    /// Verified but not (reliably) linked to a submission
    pub unlinked: i64,
}

pub fn count_payments(conn: &Connection) -> ReviewResult<PaymentCounts> {
    let counts = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'verified' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'rejected' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'verified'
                AND (entity_id IS NULL OR needs_linkage = 1) THEN 1 ELSE 0 END), 0)
         FROM payment_requests",
        [],
        |row| {
            Ok(PaymentCounts {
                pending: row.get(0)?,
                verified: row.get(1)?,
                rejected: row.get(2)?,
                completed: row.get(3)?,
                unlinked: row.get(4)?,
            })
        },
    )?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::history;
    use crate::test_support::{member, payment, shop, test_db};
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_insert_and_get_round_trip() {
        let conn = test_db();
        let user = member(&conn, "payer");
        let p = payment(&conn, &user.id, PaymentEntityType::Shop);

        let loaded = get_payment(&conn, &p.id).unwrap();
        assert_eq!(loaded, p);
        assert_eq!(loaded.amount, Decimal::new(500000, 2));

        assert_eq!(get_payment(&conn, "nope").unwrap_err().code(), "not_found");
    }

    #[test]
    fn test_list_by_filter_orders_and_paginates() {
        let conn = test_db();
        let user = member(&conn, "payer");
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        for day in 0..5 {
            let mut p = PaymentRequest::new(
                &user.id,
                if day % 2 == 0 { PaymentEntityType::Shop } else { PaymentEntityType::Hospital },
                Decimal::new(1000, 0),
                &format!("TXN-{}", day),
                "HBL",
                base + Duration::days(day),
            );
            p.created_at = base;
            insert_payment(&conn, &p).unwrap();
        }

        let page1 = list_by_filter(&conn, &PaymentFilter { page: 1, page_size: 2, ..Default::default() }).unwrap();
        assert_eq!(page1.total, 5);
        assert_eq!(page1.pages, 3);
        let txns: Vec<&str> = page1.payments.iter().map(|p| p.transaction_id.as_str()).collect();
        assert_eq!(txns, vec!["TXN-4", "TXN-3"]);

        let page3 = list_by_filter(&conn, &PaymentFilter { page: 3, page_size: 2, ..Default::default() }).unwrap();
        assert_eq!(page3.payments.len(), 1);
        assert_eq!(page3.payments[0].transaction_id, "TXN-0");

        let shops = list_by_filter(
            &conn,
            &PaymentFilter {
                entity_type: Some(PaymentEntityType::Shop),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(shops.total, 3);
        assert_eq!(shops.pages, 1);
    }

    #[test]
    fn test_empty_page_reports_one_page() {
        let conn = test_db();
        let page = list_by_filter(
            &conn,
            &PaymentFilter {
                status: Some(PaymentStatus::Completed),
                page: 0,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(page.total, 0);
        assert_eq!(page.pages, 1);
        assert_eq!(page.page, 1);
    }

    #[test]
    fn test_set_status_stamps_verifier() {
        let conn = test_db();
        let user = member(&conn, "payer");
        let p = payment(&conn, &user.id, PaymentEntityType::Shop);

        let updated = set_status(&conn, &p.id, PaymentStatus::Verified, "admin-1", Some("matches statement")).unwrap();
        assert_eq!(updated.status, PaymentStatus::Verified);
        assert_eq!(updated.verified_by.as_deref(), Some("admin-1"));
        assert!(updated.verified_at.is_some());
        assert_eq!(updated.verification_notes.as_deref(), Some("matches statement"));

        let events = history(&conn, "payment", &p.id).unwrap();
        assert_eq!(events[0].event_type, "payment_verified");
    }

    #[test]
    fn test_set_status_on_terminal_is_invalid() {
        let conn = test_db();
        let user = member(&conn, "payer");
        let p = payment(&conn, &user.id, PaymentEntityType::Shop);
        set_status(&conn, &p.id, PaymentStatus::Verified, "admin", None).unwrap();

        for target in [PaymentStatus::Verified, PaymentStatus::Rejected, PaymentStatus::Completed] {
            let err = set_status(&conn, &p.id, target, "admin", None).unwrap_err();
            assert_eq!(err.code(), "invalid_transition");
        }
        assert_eq!(get_payment(&conn, &p.id).unwrap().status, PaymentStatus::Verified);
        assert_eq!(
            set_status(&conn, "missing", PaymentStatus::Verified, "admin", None).unwrap_err().code(),
            "not_found"
        );
    }

    #[test]
    fn test_reopen_only_from_rejected() {
        let conn = test_db();
        let user = member(&conn, "payer");
        let p = payment(&conn, &user.id, PaymentEntityType::Shop);

        assert_eq!(reopen(&conn, &p.id, "admin", None).unwrap_err().code(), "invalid_transition");

        set_status(&conn, &p.id, PaymentStatus::Rejected, "admin", Some("blurry")).unwrap();
        let reopened = reopen(&conn, &p.id, "admin", Some("clear copy received")).unwrap();
        assert_eq!(reopened.status, PaymentStatus::Pending);
        assert_eq!(reopened.verified_by, None);

        let verified = set_status(&conn, &p.id, PaymentStatus::Verified, "admin", None).unwrap();
        assert_eq!(verified.status, PaymentStatus::Verified);

        let kinds: Vec<String> = history(&conn, "payment", &p.id)
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(kinds, vec!["payment_verified", "payment_reopened", "payment_rejected"]);
    }

    #[test]
    fn test_link_entity_never_replaces_other_link() {
        let conn = test_db();
        let user = member(&conn, "payer");
        let p = payment(&conn, &user.id, PaymentEntityType::Shop);

        let flagged = flag_unlinked(&conn, &p.id, "admin", "ambiguous").unwrap();
        assert!(flagged.needs_linkage);

        let linked = link_entity(&conn, &p.id, "shop-1", "admin").unwrap();
        assert_eq!(linked.entity_id.as_deref(), Some("shop-1"));
        assert!(!linked.needs_linkage);

        // Same link again is fine, a different one is not
        link_entity(&conn, &p.id, "shop-1", "admin").unwrap();
        assert_eq!(link_entity(&conn, &p.id, "shop-2", "admin").unwrap_err().code(), "invalid_transition");
    }

    #[test]
    fn test_find_duplicates_by_fingerprint() {
        let conn = test_db();
        let user = member(&conn, "payer");
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        let a = PaymentRequest::new(&user.id, PaymentEntityType::Shop, Decimal::new(10, 0), "TX-9", "HBL", date);
        let b = PaymentRequest::new(&user.id, PaymentEntityType::Institute, Decimal::new(10, 0), "tx-9", "hbl", date);
        let c = PaymentRequest::new(&user.id, PaymentEntityType::Shop, Decimal::new(10, 0), "TX-9", "UBL", date);
        for p in [&a, &b, &c] {
            insert_payment(&conn, p).unwrap();
        }

        let dups = find_duplicates(&conn, &a).unwrap();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].id, b.id);
    }

    #[test]
    fn test_funding_payment_lookup() {
        let conn = test_db();
        let owner = member(&conn, "owner");
        let s = shop(&conn, &owner.id, "Corner Store");
        assert!(find_funding_payment(&conn, &s).unwrap().is_none());

        let p = payment(&conn, &owner.id, PaymentEntityType::Shop);
        assert!(find_funding_payment(&conn, &s).unwrap().is_none());

        set_status(&conn, &p.id, PaymentStatus::Verified, "admin", None).unwrap();
        assert_eq!(find_funding_payment(&conn, &s).unwrap().map(|f| f.id), Some(p.id.clone()));

        // Linked elsewhere no longer funds this shop
        link_entity(&conn, &p.id, "another-shop", "admin").unwrap();
        assert!(find_funding_payment(&conn, &s).unwrap().is_none());
    }

    #[test]
    fn test_funding_payment_prefers_own_link() {
        let conn = test_db();
        let owner = member(&conn, "owner");
        let s = shop(&conn, &owner.id, "Corner Store");
        let loose = payment(&conn, &owner.id, PaymentEntityType::Shop);
        let own = payment(&conn, &owner.id, PaymentEntityType::Shop);
        for p in [&loose, &own] {
            set_status(&conn, &p.id, PaymentStatus::Verified, "admin", None).unwrap();
        }
        link_entity(&conn, &own.id, &s.id, "admin").unwrap();

        let funding = find_funding_payment(&conn, &s).unwrap().unwrap();
        assert_eq!(funding.id, own.id);
    }

    #[test]
    fn test_count_payments() {
        let conn = test_db();
        let user = member(&conn, "payer");
        let a = payment(&conn, &user.id, PaymentEntityType::Shop);
        let b = payment(&conn, &user.id, PaymentEntityType::Shop);
        payment(&conn, &user.id, PaymentEntityType::Shop);
        set_status(&conn, &a.id, PaymentStatus::Verified, "admin", None).unwrap();
        set_status(&conn, &b.id, PaymentStatus::Rejected, "admin", None).unwrap();

        let counts = count_payments(&conn).unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.verified, 1);
        assert_eq!(counts.rejected, 1);
        assert_eq!(counts.completed, 0);
        assert_eq!(counts.unlinked, 1);
    }
}
