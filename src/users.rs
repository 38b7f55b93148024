// Identity lookup - users as owners, payers and reviewers
//
// Admin/verified flags change only through explicit orchestrator actions.

use crate::db::{fmt_ts, parse_ts};
use crate::entities::{OwnerSummary, User};
use crate::error::{ReviewError, ReviewResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleFilter {
    Admin,
    User,
}

/// Filters from the user management screen
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserFilter {
    /// Case-insensitive match on username, full name or email
    pub search: Option<String>,
    pub role: Option<RoleFilter>,
    pub verified: Option<bool>,
}

const USER_COLUMNS: &str = "id, username, email, full_name, is_admin, verified, created_at";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    let created_at: String = row.get(6)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        full_name: row.get(3)?,
        is_admin: row.get(4)?,
        verified: row.get(5)?,
        created_at: parse_ts(6, &created_at)?,
    })
}

pub fn insert_user(conn: &Connection, user: &User) -> ReviewResult<()> {
    conn.execute(
        "INSERT INTO users (id, username, email, full_name, is_admin, verified, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user.id,
            user.username,
            user.email,
            user.full_name,
            user.is_admin,
            user.verified,
            fmt_ts(&user.created_at),
        ],
    )?;
    Ok(())
}

pub fn find_user(conn: &Connection, id: &str) -> ReviewResult<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            [id],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn get_user(conn: &Connection, id: &str) -> ReviewResult<User> {
    find_user(conn, id)?.ok_or_else(|| ReviewError::not_found("user", id))
}

/// Owner display data; lookup failures degrade to an "unknown" owner
pub fn owner_summary(conn: &Connection, id: &str) -> OwnerSummary {
    match find_user(conn, id) {
        Ok(Some(user)) => user.into(),
        Ok(None) => OwnerSummary::unknown(id),
        Err(e) => {
            debug!(user_id = id, error = %e, "owner lookup failed");
            OwnerSummary::unknown(id)
        }
    }
}

pub fn list_users(conn: &Connection, filter: &UserFilter) -> ReviewResult<Vec<User>> {
    let mut sql = format!("SELECT {} FROM users WHERE 1 = 1", USER_COLUMNS);
    let mut args: Vec<String> = Vec::new();

    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        args.push(format!("%{}%", search.to_lowercase()));
        let n = args.len();
        sql.push_str(&format!(
            " AND (LOWER(username) LIKE ?{n} OR LOWER(COALESCE(full_name, '')) LIKE ?{n} OR LOWER(email) LIKE ?{n})"
        ));
    }
    match filter.role {
        Some(RoleFilter::Admin) => sql.push_str(" AND is_admin = 1"),
        Some(RoleFilter::User) => sql.push_str(" AND is_admin = 0"),
        None => {}
    }
    match filter.verified {
        Some(true) => sql.push_str(" AND verified = 1"),
        Some(false) => sql.push_str(" AND verified = 0"),
        None => {}
    }
    sql.push_str(" ORDER BY created_at DESC, username");

    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

/// Set the admin flag; returns the updated user
pub fn set_admin(conn: &Connection, id: &str, is_admin: bool) -> ReviewResult<User> {
    let changed = conn.execute(
        "UPDATE users SET is_admin = ?1 WHERE id = ?2",
        params![is_admin, id],
    )?;
    if changed == 0 {
        return Err(ReviewError::not_found("user", id));
    }
    get_user(conn, id)
}

/// Set the verified flag; returns the updated user
pub fn set_verified(conn: &Connection, id: &str, verified: bool) -> ReviewResult<User> {
    let changed = conn.execute(
        "UPDATE users SET verified = ?1 WHERE id = ?2",
        params![verified, id],
    )?;
    if changed == 0 {
        return Err(ReviewError::not_found("user", id));
    }
    get_user(conn, id)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserCounts {
    pub total: i64,
    pub admins: i64,
    pub verified: i64,
}

pub fn count_users(conn: &Connection) -> ReviewResult<UserCounts> {
    let counts = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(is_admin), 0), COALESCE(SUM(verified), 0) FROM users",
        [],
        |row| {
            Ok(UserCounts {
                total: row.get(0)?,
                admins: row.get(1)?,
                verified: row.get(2)?,
            })
        },
    )?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{admin, member, test_db};

    #[test]
    fn test_get_user_and_not_found() {
        let conn = test_db();
        let user = member(&conn, "sana");

        let loaded = get_user(&conn, &user.id).unwrap();
        assert_eq!(loaded.username, "sana");
        assert_eq!(loaded.created_at, user.created_at);

        let err = get_user(&conn, "missing").unwrap_err();
        assert_eq!(err, ReviewError::not_found("user", "missing"));
    }

    #[test]
    fn test_owner_summary_unknown_on_missing_user() {
        let conn = test_db();
        let owner = owner_summary(&conn, "ghost");
        assert!(!owner.known);
        assert_eq!(owner.id, "ghost");
    }

    #[test]
    fn test_owner_summary_unknown_on_storage_failure() {
        let conn = test_db();
        let user = member(&conn, "bilal");
        conn.execute("DROP TABLE users", []).unwrap();

        let owner = owner_summary(&conn, &user.id);
        assert!(!owner.known);
        assert_eq!(owner.username, "unknown");
    }

    #[test]
    fn test_list_users_filters() {
        let conn = test_db();
        admin(&conn, "root");
        let sana = member(&conn, "sana");
        member(&conn, "bilal");
        set_verified(&conn, &sana.id, true).unwrap();

        let admins = list_users(
            &conn,
            &UserFilter {
                role: Some(RoleFilter::Admin),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].username, "root");

        let verified = list_users(
            &conn,
            &UserFilter {
                verified: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].username, "sana");

        let search = list_users(
            &conn,
            &UserFilter {
                search: Some("BIL".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(search.len(), 1);
        assert_eq!(search[0].username, "bilal");

        assert_eq!(list_users(&conn, &UserFilter::default()).unwrap().len(), 3);
    }

    #[test]
    fn test_set_admin_and_counts() {
        let conn = test_db();
        let user = member(&conn, "sana");

        let updated = set_admin(&conn, &user.id, true).unwrap();
        assert!(updated.is_admin);
        assert!(set_admin(&conn, "missing", true).is_err());

        let counts = count_users(&conn).unwrap();
        assert_eq!(counts.total, 1);
        assert_eq!(counts.admins, 1);
        assert_eq!(counts.verified, 0);
    }
}
