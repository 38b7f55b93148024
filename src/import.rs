// CSV import for seeding a review store
//
// Rows whose id already exists are skipped, so re-running an import is safe.
// Any malformed row aborts the import with its line number.

use crate::entities::{
    ApprovalStatus, Classification, EntityKind, EntitySubmission, InstituteDomain,
    PaymentEntityType, PaymentRequest, PaymentStatus, User,
};
use crate::{ledger, registry, users};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub skipped: usize,
}

// ============================================================================
// CSV RECORDS
// ============================================================================

#[derive(Debug, Deserialize)]
struct UserRecord {
    id: Option<String>,
    username: String,
    email: String,
    full_name: Option<String>,
    is_admin: Option<String>,
    verified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmissionRecord {
    id: Option<String>,
    kind: String,
    owner_id: String,
    name: String,
    domain: Option<String>,
    category: Option<String>,
    location: Option<String>,
    description: Option<String>,
    agent_id: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentRecord {
    id: Option<String>,
    user_id: String,
    entity_type: String,
    entity_id: Option<String>,
    agent_id: Option<String>,
    amount: String,
    processing_fee: Option<String>,
    transaction_id: String,
    bank_name: String,
    account_number: Option<String>,
    transaction_date: String,
    notes: Option<String>,
    screenshot_file: Option<String>,
    status: Option<String>,
}

/// Deserialize every row, tagging each with its 1-based file line
fn read_records<T, R>(reader: R) -> Result<Vec<(usize, T)>>
where
    T: DeserializeOwned,
    R: Read,
{
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (idx, result) in rdr.deserialize().enumerate() {
        let line = idx + 2; // header is line 1
        let record: T = result.with_context(|| format!("Failed to parse CSV line {}", line))?;
        rows.push((line, record));
    }
    Ok(rows)
}

fn open(path: &Path) -> Result<std::fs::File> {
    std::fs::File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "y")
    )
}

/// RFC 3339, or a bare date taken as midnight UTC
fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("unrecognized date '{}'", value))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("unrecognized date '{}'", value))?;
    Ok(Utc.from_utc_datetime(&midnight))
}

// ============================================================================
// USERS
// ============================================================================

pub fn import_users(conn: &Connection, path: &Path) -> Result<ImportSummary> {
    import_users_from(conn, open(path)?)
}

pub fn import_users_from<R: Read>(conn: &Connection, reader: R) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    for (line, rec) in read_records::<UserRecord, _>(reader)? {
        let mut user = User::new(&rec.username, &rec.email);
        if let Some(id) = non_empty(rec.id) {
            user.id = id;
        }
        user.full_name = non_empty(rec.full_name);
        user.is_admin = flag(rec.is_admin.as_deref());
        user.verified = flag(rec.verified.as_deref());

        if users::find_user(conn, &user.id)?.is_some() {
            summary.skipped += 1;
            continue;
        }
        users::insert_user(conn, &user).with_context(|| format!("line {}: failed to insert user", line))?;
        summary.inserted += 1;
    }

    info!(inserted = summary.inserted, skipped = summary.skipped, "users imported");
    Ok(summary)
}

// ============================================================================
// SUBMISSIONS
// ============================================================================

pub fn import_submissions(conn: &Connection, path: &Path) -> Result<ImportSummary> {
    import_submissions_from(conn, open(path)?)
}

pub fn import_submissions_from<R: Read>(conn: &Connection, reader: R) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    for (line, rec) in read_records::<SubmissionRecord, _>(reader)? {
        let sub = submission_from_record(rec).with_context(|| format!("line {}", line))?;

        if registry::find_submission(conn, sub.kind(), &sub.id)?.is_some() {
            summary.skipped += 1;
            continue;
        }
        registry::insert_submission(conn, &sub)
            .with_context(|| format!("line {}: failed to insert submission", line))?;
        summary.inserted += 1;
    }

    info!(inserted = summary.inserted, skipped = summary.skipped, "submissions imported");
    Ok(summary)
}

fn submission_from_record(rec: SubmissionRecord) -> Result<EntitySubmission> {
    let kind = EntityKind::from_str(&rec.kind)?;
    let domain = non_empty(rec.domain)
        .map(|d| InstituteDomain::from_str(&d))
        .transpose()?;
    if kind == EntityKind::Institute && domain.is_none() {
        anyhow::bail!("institute '{}' needs a domain", rec.name);
    }

    let classification = Classification::from_parts(kind, domain, non_empty(rec.category));
    let mut sub = EntitySubmission::new(&rec.owner_id, &rec.name, classification)
        .with_agent_id(rec.agent_id.as_deref());
    if let Some(id) = non_empty(rec.id) {
        sub.id = id;
    }
    sub.location = non_empty(rec.location);
    sub.description = non_empty(rec.description);
    if let Some(status) = non_empty(rec.status) {
        sub.status = ApprovalStatus::from_str(&status)?;
    }
    Ok(sub)
}

// ============================================================================
// PAYMENTS
// ============================================================================

pub fn import_payments(conn: &Connection, path: &Path) -> Result<ImportSummary> {
    import_payments_from(conn, open(path)?)
}

pub fn import_payments_from<R: Read>(conn: &Connection, reader: R) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    for (line, rec) in read_records::<PaymentRecord, _>(reader)? {
        let payment = payment_from_record(rec).with_context(|| format!("line {}", line))?;

        if ledger::find_payment(conn, &payment.id)?.is_some() {
            summary.skipped += 1;
            continue;
        }
        ledger::insert_payment(conn, &payment)
            .with_context(|| format!("line {}: failed to insert payment", line))?;
        summary.inserted += 1;
    }

    info!(inserted = summary.inserted, skipped = summary.skipped, "payments imported");
    Ok(summary)
}

fn payment_from_record(rec: PaymentRecord) -> Result<PaymentRequest> {
    let entity_type = PaymentEntityType::from_str(&rec.entity_type)?;
    let amount = Decimal::from_str(&rec.amount).with_context(|| format!("bad amount '{}'", rec.amount))?;
    let processing_fee = non_empty(rec.processing_fee)
        .map(|f| Decimal::from_str(&f).with_context(|| format!("bad processing fee '{}'", f)))
        .transpose()?;

    let mut payment = PaymentRequest::new(
        &rec.user_id,
        entity_type,
        amount,
        &rec.transaction_id,
        &rec.bank_name,
        parse_date(&rec.transaction_date)?,
    )
    .with_entity_id(rec.entity_id.as_deref())
    .with_agent_id(rec.agent_id.as_deref());

    if let Some(id) = non_empty(rec.id) {
        payment.id = id;
    }
    payment.processing_fee = processing_fee;
    payment.account_number = rec.account_number.unwrap_or_default();
    payment.notes = non_empty(rec.notes);
    payment.screenshot_file = non_empty(rec.screenshot_file);
    if let Some(status) = non_empty(rec.status) {
        payment.status = PaymentStatus::from_str(&status)?;
    }
    Ok(payment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_db;
    use std::io::Write;

    const USERS: &str = "\
id,username,email,full_name,is_admin,verified
u-1,sana,sana@example.com,Sana Malik,true,1
u-2,bilal,bilal@example.com,,,
";

    const SUBMISSIONS: &str = "\
id,kind,owner_id,name,domain,category,location,description,agent_id,status
s-1,shop,u-2,Corner Store,,grocery,Lahore,,null,
i-1,institute,u-2,Family Clinic,healthcare,,Karachi,Walk-in clinic,AG-7,
p-1,product,u-1,Handmade Rug,,textiles,,,,approved
";

    const PAYMENTS: &str = "\
id,user_id,entity_type,entity_id,agent_id,amount,processing_fee,transaction_id,bank_name,account_number,transaction_date,notes,screenshot_file,status
pay-1,u-2,hospital,,AG-7,5000.00,150.50,TXN-1,Meezan Bank,0101,2024-03-01,,receipts/1.png,
pay-2,u-2,shop,null,,2500,,TXN-2,HBL,,2024-03-02T10:30:00Z,paid in cash,,
";

    #[test]
    fn test_import_users() {
        let conn = test_db();
        let summary = import_users_from(&conn, USERS.as_bytes()).unwrap();
        assert_eq!(summary, ImportSummary { inserted: 2, skipped: 0 });

        let sana = users::get_user(&conn, "u-1").unwrap();
        assert!(sana.is_admin);
        assert!(sana.verified);
        assert_eq!(sana.full_name.as_deref(), Some("Sana Malik"));

        let bilal = users::get_user(&conn, "u-2").unwrap();
        assert!(!bilal.is_admin);
        assert_eq!(bilal.full_name, None);

        // Re-import is a no-op
        let again = import_users_from(&conn, USERS.as_bytes()).unwrap();
        assert_eq!(again, ImportSummary { inserted: 0, skipped: 2 });
    }

    #[test]
    fn test_import_submissions() {
        let conn = test_db();
        let summary = import_submissions_from(&conn, SUBMISSIONS.as_bytes()).unwrap();
        assert_eq!(summary.inserted, 3);

        let shop = registry::get_submission(&conn, EntityKind::Shop, "s-1").unwrap();
        assert_eq!(shop.agent_id, None);
        assert_eq!(shop.classification.category(), Some("grocery"));

        let clinic = registry::get_submission(&conn, EntityKind::Institute, "i-1").unwrap();
        assert_eq!(clinic.domain(), Some(InstituteDomain::Healthcare));
        assert_eq!(clinic.agent_id.as_deref(), Some("AG-7"));

        let rug = registry::get_submission(&conn, EntityKind::Product, "p-1").unwrap();
        assert_eq!(rug.status, ApprovalStatus::Approved);
    }

    #[test]
    fn test_institute_without_domain_is_rejected() {
        let conn = test_db();
        let csv = "kind,owner_id,name\ninstitute,u-1,Nameless School\n";
        let err = import_submissions_from(&conn, csv.as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_import_payments() {
        let conn = test_db();
        let summary = import_payments_from(&conn, PAYMENTS.as_bytes()).unwrap();
        assert_eq!(summary.inserted, 2);

        let hospital = ledger::get_payment(&conn, "pay-1").unwrap();
        assert_eq!(hospital.entity_type, PaymentEntityType::Hospital);
        assert_eq!(hospital.total_amount(), Decimal::new(515050, 2));
        assert_eq!(hospital.agent_id.as_deref(), Some("AG-7"));
        assert_eq!(hospital.screenshot_file.as_deref(), Some("receipts/1.png"));
        assert_eq!(hospital.status, PaymentStatus::Pending);

        let shop = ledger::get_payment(&conn, "pay-2").unwrap();
        assert_eq!(shop.entity_id, None);
        assert_eq!(shop.notes.as_deref(), Some("paid in cash"));
        assert_eq!(shop.transaction_date, parse_date("2024-03-02T10:30:00Z").unwrap());
    }

    #[test]
    fn test_bad_amount_names_the_line() {
        let conn = test_db();
        let csv = "user_id,entity_type,amount,transaction_id,bank_name,transaction_date\n\
                   u-1,shop,lots,TXN-1,HBL,2024-03-01\n";
        let err = import_payments_from(&conn, csv.as_bytes()).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("line 2"));
        assert!(message.contains("bad amount"));
    }

    #[test]
    fn test_import_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.csv");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(USERS.as_bytes())
            .unwrap();

        let conn = test_db();
        assert_eq!(import_users(&conn, &path).unwrap().inserted, 2);
        assert!(import_users(&conn, &dir.path().join("missing.csv")).is_err());
    }
}
