use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::Path;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use marketplace_review::{
    collect_stats, history, import, open_database, users, ApprovalOrchestrator, EntityDecision,
    EntityKind, PaymentEntityType, PaymentFilter, PaymentOutcome, PaymentStatus, ReviewConfig,
    UserFilter,
};

const USAGE: &str = "\
Usage: marketplace-review <command> [args]

  init
  import <users|entities|payments> <file.csv>
  pending [kind]
  payments [status|all] [entity-type|all] [page]
  approve <reviewer> <kind> <id> [notes]
  deny <reviewer> <kind> <id> [notes]
  override <reviewer> <kind> <id> <approve|deny> <reason>
  accept <reviewer> <payment-id> [notes]
  reject <reviewer> <payment-id> [notes]
  reopen <reviewer> <payment-id> [notes]
  link <reviewer> <payment-id> <entity-id>
  users [search]
  set-admin <reviewer> <user-id> <true|false>
  set-verified <reviewer> <user-id> <true|false>
  stats
  history <record-type> <id>";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        println!("{}", USAGE);
        return Ok(());
    };

    let config = ReviewConfig::from_env()?;
    let conn = open_database(&config.database_path)?;
    let orch = ApprovalOrchestrator::new(config.clone());
    let rest = &args[2..];

    match command {
        "init" => {
            println!("✓ Database ready at {}", config.database_path.display());
        }
        "import" => {
            let what = arg(rest, 0, "users|entities|payments")?;
            let path = Path::new(arg(rest, 1, "file.csv")?);
            let summary = match what {
                "users" => import::import_users(&conn, path)?,
                "entities" | "submissions" => import::import_submissions(&conn, path)?,
                "payments" => import::import_payments(&conn, path)?,
                other => return Err(anyhow!("cannot import '{}'\n\n{}", other, USAGE)),
            };
            println!("✓ Imported {} {} ({} already present)", summary.inserted, what, summary.skipped);
        }
        "pending" => {
            let kind = rest.first().map(|k| EntityKind::from_str(k)).transpose()?;
            let rows = orch.list_pending_entities(&conn, kind)?;
            println!("📋 {} pending submission(s)", rows.len());
            for row in rows {
                println!(
                    "  {:<9} {}  {}  owner: {}  submitted {}",
                    row.label,
                    row.entity.id,
                    row.entity.name,
                    row.owner.username,
                    row.entity.created_at.format("%Y-%m-%d")
                );
            }
        }
        "payments" => {
            let filter = PaymentFilter {
                status: optional(rest.first(), PaymentStatus::from_str)?,
                entity_type: optional(rest.get(1), PaymentEntityType::from_str)?,
                page: rest
                    .get(2)
                    .map(|p| p.parse::<u32>())
                    .transpose()
                    .context("page must be a number")?
                    .unwrap_or(1),
                page_size: config.default_page_size,
            };
            let listing = orch.list_payments(&conn, &filter)?;
            println!(
                "💳 {} payment(s), page {}/{}",
                listing.total, listing.page, listing.pages
            );
            for row in listing.rows {
                let p = row.payment;
                println!(
                    "  {}  {:<9} {:<11} {:>12}  {}  {} / {}  payer: {}{}",
                    p.id,
                    p.status.as_str(),
                    p.entity_type.as_str(),
                    p.total_amount().to_string(),
                    p.transaction_date.format("%Y-%m-%d"),
                    p.bank_name,
                    p.transaction_id,
                    row.payer.username,
                    if p.needs_linkage { "  [unlinked]" } else { "" }
                );
            }
        }
        "approve" | "deny" => {
            let reviewer = arg(rest, 0, "reviewer")?;
            let kind = EntityKind::from_str(arg(rest, 1, "kind")?)?;
            let id = arg(rest, 2, "id")?;
            let decision = if command == "approve" {
                EntityDecision::Approved
            } else {
                EntityDecision::Rejected
            };
            let notes = trailing(rest, 3);
            let outcome = orch.decide_entity(&conn, reviewer, kind, id, decision, notes.as_deref())?;
            if outcome.changed {
                println!("✓ {} {} is now {}", kind, id, outcome.entity.status);
            } else {
                println!("= {} {} was already {}", kind, id, outcome.entity.status);
            }
        }
        "override" => {
            let reviewer = arg(rest, 0, "reviewer")?;
            let kind = EntityKind::from_str(arg(rest, 1, "kind")?)?;
            let id = arg(rest, 2, "id")?;
            let decision = EntityDecision::from_str(arg(rest, 3, "approve|deny")?)?;
            let reason = trailing(rest, 4).unwrap_or_default();
            let outcome = orch.override_entity_decision(&conn, reviewer, kind, id, decision, &reason)?;
            println!("✓ {} {} is now {} (override recorded)", kind, id, outcome.entity.status);
        }
        "accept" | "reject" => {
            let reviewer = arg(rest, 0, "reviewer")?;
            let payment_id = arg(rest, 1, "payment-id")?;
            let notes = trailing(rest, 2);
            let outcome = if command == "accept" {
                orch.accept_payment(&conn, reviewer, payment_id, notes.as_deref())?
            } else {
                orch.reject_payment(&conn, reviewer, payment_id, notes.as_deref())?
            };
            print_outcome(&outcome);
        }
        "reopen" => {
            let reviewer = arg(rest, 0, "reviewer")?;
            let payment_id = arg(rest, 1, "payment-id")?;
            let notes = trailing(rest, 2);
            let payment = orch.reopen_payment(&conn, reviewer, payment_id, notes.as_deref())?;
            println!("✓ payment {} is {} again", payment.id, payment.status);
        }
        "link" => {
            let reviewer = arg(rest, 0, "reviewer")?;
            let payment_id = arg(rest, 1, "payment-id")?;
            let entity_id = arg(rest, 2, "entity-id")?;
            let payment = orch.link_payment(&conn, reviewer, payment_id, entity_id)?;
            println!("✓ payment {} linked to {}", payment.id, entity_id);
        }
        "users" => {
            let filter = UserFilter {
                search: rest.first().cloned(),
                ..Default::default()
            };
            for user in users::list_users(&conn, &filter)? {
                println!(
                    "  {}  {:<16} {:<28} {}{}",
                    user.id,
                    user.username,
                    user.email,
                    if user.is_admin { "admin" } else { "user" },
                    if user.verified { ", verified" } else { "" }
                );
            }
        }
        "set-admin" | "set-verified" => {
            let reviewer = arg(rest, 0, "reviewer")?;
            let user_id = arg(rest, 1, "user-id")?;
            let value = parse_bool(arg(rest, 2, "true|false")?)?;
            let user = if command == "set-admin" {
                orch.set_user_admin(&conn, reviewer, user_id, value)?
            } else {
                orch.set_user_verified(&conn, reviewer, user_id, value)?
            };
            println!("✓ {}: admin={} verified={}", user.username, user.is_admin, user.verified);
        }
        "stats" => {
            let stats = collect_stats(&conn)?;
            println!("📊 Review backlog: {}", stats.backlog());
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            println!("Pending institutes: {}", stats.pending.institutes);
            println!("Pending hospitals:  {}", stats.pending.hospitals);
            println!("Pending shops:      {}", stats.pending.shops);
            println!("Pending products:   {}", stats.pending.products);
            println!(
                "Payments: {} pending, {} verified ({} unlinked), {} rejected, {} completed",
                stats.payments.pending,
                stats.payments.verified,
                stats.payments.unlinked,
                stats.payments.rejected,
                stats.payments.completed
            );
            println!(
                "Users: {} total, {} admins, {} verified",
                stats.users.total, stats.users.admins, stats.users.verified
            );
        }
        "history" => {
            let record_type = arg(rest, 0, "record-type")?;
            let id = arg(rest, 1, "id")?;
            for event in history(&conn, record_type, id)? {
                println!(
                    "  {}  {:<28} by {}  {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.event_type,
                    event.actor,
                    event.data
                );
            }
        }
        "help" | "--help" | "-h" => println!("{}", USAGE),
        other => return Err(anyhow!("unknown command '{}'\n\n{}", other, USAGE)),
    }

    Ok(())
}

fn arg<'a>(args: &'a [String], idx: usize, name: &str) -> Result<&'a str> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing <{}>\n\n{}", name, USAGE))
}

/// Remaining words joined as free text (notes, reasons)
fn trailing(args: &[String], from: usize) -> Option<String> {
    let text = args.get(from..)?.join(" ");
    (!text.trim().is_empty()).then_some(text)
}

/// Parse a filter value; "all" means no filter
fn optional<T, E>(value: Option<&String>, parse: fn(&str) -> Result<T, E>) -> Result<Option<T>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match value.map(String::as_str) {
        None | Some("all") => Ok(None),
        Some(v) => Ok(Some(parse(v)?)),
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(anyhow!("expected true or false, got '{}'", other)),
    }
}

fn print_outcome(outcome: &PaymentOutcome) {
    let p = &outcome.payment;
    println!("✓ payment {} is {}", p.id, p.status);
    if let Some(entity) = &outcome.entity {
        println!("✓ {} {} ({}) is {}", entity.kind(), entity.id, entity.name, entity.status);
    }
    if let Some(warning) = &outcome.warning {
        println!("⚠️  {}", warning);
        println!("   Link the payment by hand: marketplace-review link <reviewer> {} <entity-id>", p.id);
    }
    if !outcome.duplicates.is_empty() {
        println!(
            "⚠️  transaction {} also appears on: {}",
            p.transaction_id,
            outcome.duplicates.join(", ")
        );
    }
}
