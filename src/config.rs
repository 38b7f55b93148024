//! Centralized configuration (environment variables + defaults).
//!
//! A `.env` file in the working directory is loaded first when present.

use crate::entities::EntityKind;
use anyhow::{Context, Result};
use std::path::PathBuf;

pub const DEFAULT_DATABASE_PATH: &str = "marketplace_review.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewConfig {
    pub database_path: PathBuf,
    pub bind_addr: String,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Permit audited re-decisions of approved/rejected submissions
    pub allow_decision_override: bool,
    /// Kinds whose direct approval needs a verified payment
    pub payment_required: Vec<EntityKind>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        ReviewConfig {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            allow_decision_override: false,
            payment_required: Vec::new(),
        }
    }
}

impl ReviewConfig {
    /// Load `.env` (if any), then read the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ReviewConfig::default();

        if let Some(path) = lookup("REVIEW_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("REVIEW_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(size) = lookup("REVIEW_PAGE_SIZE") {
            config.default_page_size = size
                .trim()
                .parse::<u32>()
                .with_context(|| format!("REVIEW_PAGE_SIZE must be a positive integer, got '{}'", size))?
                .max(1);
        }
        if let Some(size) = lookup("REVIEW_MAX_PAGE_SIZE") {
            config.max_page_size = size
                .trim()
                .parse::<u32>()
                .with_context(|| format!("REVIEW_MAX_PAGE_SIZE must be a positive integer, got '{}'", size))?
                .max(1);
        }
        if let Some(flag) = lookup("REVIEW_ALLOW_OVERRIDE") {
            config.allow_decision_override = parse_flag(&flag)
                .with_context(|| format!("REVIEW_ALLOW_OVERRIDE must be true/false, got '{}'", flag))?;
        }
        if let Some(kinds) = lookup("REVIEW_PAYMENT_REQUIRED") {
            config.payment_required = parse_kinds(&kinds)?;
        }

        config.default_page_size = config.default_page_size.min(config.max_page_size);
        Ok(config)
    }

    pub fn requires_payment(&self, kind: EntityKind) -> bool {
        self.payment_required.contains(&kind)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("unrecognized flag '{}'", other),
    }
}

fn parse_kinds(value: &str) -> Result<Vec<EntityKind>> {
    let mut kinds = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let kind = part
            .parse::<EntityKind>()
            .with_context(|| format!("REVIEW_PAYMENT_REQUIRED contains '{}'", part))?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ReviewConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ReviewConfig::default());
        assert_eq!(config.default_page_size, 20);
        assert!(!config.allow_decision_override);
    }

    #[test]
    fn test_reads_all_keys() {
        let config = ReviewConfig::from_lookup(lookup(&[
            ("REVIEW_DATABASE_PATH", "/tmp/review.db"),
            ("REVIEW_BIND_ADDR", "127.0.0.1:8080"),
            ("REVIEW_PAGE_SIZE", "50"),
            ("REVIEW_MAX_PAGE_SIZE", "200"),
            ("REVIEW_ALLOW_OVERRIDE", "yes"),
            ("REVIEW_PAYMENT_REQUIRED", "shop, institute,shop"),
        ]))
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/review.db"));
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.default_page_size, 50);
        assert_eq!(config.max_page_size, 200);
        assert!(config.allow_decision_override);
        assert_eq!(config.payment_required, vec![EntityKind::Shop, EntityKind::Institute]);
        assert!(config.requires_payment(EntityKind::Shop));
        assert!(!config.requires_payment(EntityKind::Product));
    }

    #[test]
    fn test_page_size_capped_by_max() {
        let config = ReviewConfig::from_lookup(lookup(&[
            ("REVIEW_PAGE_SIZE", "500"),
            ("REVIEW_MAX_PAGE_SIZE", "100"),
        ]))
        .unwrap();
        assert_eq!(config.default_page_size, 100);
    }

    #[test]
    fn test_malformed_values_are_errors() {
        assert!(ReviewConfig::from_lookup(lookup(&[("REVIEW_PAGE_SIZE", "lots")])).is_err());
        assert!(ReviewConfig::from_lookup(lookup(&[("REVIEW_ALLOW_OVERRIDE", "maybe")])).is_err());
        assert!(ReviewConfig::from_lookup(lookup(&[("REVIEW_PAYMENT_REQUIRED", "hospital")])).is_err());
    }
}
