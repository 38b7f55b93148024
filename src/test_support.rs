// Shared fixtures for unit tests

use crate::db::setup_database;
use crate::entities::{
    Classification, EntitySubmission, InstituteDomain, PaymentEntityType, PaymentRequest, User,
};
use crate::{ledger, registry, users};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::cell::Cell;

thread_local! {
    static TICK: Cell<i64> = Cell::new(0);
}

/// Deterministic, strictly increasing timestamps (one minute apart)
pub fn next_ts() -> DateTime<Utc> {
    let n = TICK.with(|t| {
        let n = t.get() + 1;
        t.set(n);
        n
    });
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(n)
}

pub fn test_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();
    conn
}

fn user(conn: &Connection, username: &str, is_admin: bool) -> User {
    let mut user = User::new(username, &format!("{}@example.com", username));
    user.is_admin = is_admin;
    user.created_at = next_ts();
    users::insert_user(conn, &user).unwrap();
    user
}

pub fn admin(conn: &Connection, username: &str) -> User {
    user(conn, username, true)
}

pub fn member(conn: &Connection, username: &str) -> User {
    user(conn, username, false)
}

pub fn submission(conn: &Connection, owner_id: &str, name: &str, classification: Classification) -> EntitySubmission {
    let mut sub = EntitySubmission::new(owner_id, name, classification);
    sub.created_at = next_ts();
    registry::insert_submission(conn, &sub).unwrap();
    sub
}

pub fn shop(conn: &Connection, owner_id: &str, name: &str) -> EntitySubmission {
    submission(
        conn,
        owner_id,
        name,
        Classification::Shop {
            category: Some("retail".to_string()),
        },
    )
}

pub fn institute(conn: &Connection, owner_id: &str, name: &str, domain: InstituteDomain) -> EntitySubmission {
    submission(conn, owner_id, name, Classification::Institute { domain })
}

pub fn product(conn: &Connection, owner_id: &str, name: &str) -> EntitySubmission {
    submission(conn, owner_id, name, Classification::Product { category: None })
}

/// Unsaved pending payment of 5000.00 with a unique transaction id
pub fn new_payment(user_id: &str, entity_type: PaymentEntityType) -> PaymentRequest {
    let ts = next_ts();
    let mut p = PaymentRequest::new(
        user_id,
        entity_type,
        Decimal::new(500000, 2),
        &format!("TXN-{}", ts.timestamp()),
        "Meezan Bank",
        ts,
    );
    p.account_number = "0101-2020".to_string();
    p.created_at = ts;
    p
}

pub fn payment(conn: &Connection, user_id: &str, entity_type: PaymentEntityType) -> PaymentRequest {
    let p = new_payment(user_id, entity_type);
    ledger::insert_payment(conn, &p).unwrap();
    p
}
