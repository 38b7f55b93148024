// Users - identity of owners, payers and reviewers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub is_admin: bool,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: &str, email: &str) -> Self {
        User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            full_name: None,
            is_admin: false,
            verified: false,
            created_at: Utc::now(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

/// Owner/verifier data attached to listing rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerSummary {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub known: bool,
}

impl OwnerSummary {
    /// Placeholder when identity lookup fails
    pub fn unknown(id: &str) -> Self {
        OwnerSummary {
            id: id.to_string(),
            username: "unknown".to_string(),
            email: None,
            full_name: None,
            known: false,
        }
    }
}

impl From<User> for OwnerSummary {
    fn from(user: User) -> Self {
        OwnerSummary {
            id: user.id,
            username: user.username,
            email: Some(user.email),
            full_name: user.full_name,
            known: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_prefers_full_name() {
        let mut user = User::new("asad", "asad@example.com");
        assert_eq!(user.display_name(), "asad");

        user.full_name = Some("Asad Khan".to_string());
        assert_eq!(user.display_name(), "Asad Khan");

        user.full_name = Some("  ".to_string());
        assert_eq!(user.display_name(), "asad");
    }

    #[test]
    fn test_unknown_owner() {
        let owner = OwnerSummary::unknown("u-404");
        assert!(!owner.known);
        assert_eq!(owner.username, "unknown");

        let known: OwnerSummary = User::new("sana", "sana@example.com").into();
        assert!(known.known);
        assert_eq!(known.email.as_deref(), Some("sana@example.com"));
    }
}
