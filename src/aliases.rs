use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;
use crate::models::PayeeAlias;

/// Punctuation that only ever shows up inside dates, amounts and references.
const NUMBER_PUNCTUATION: &[char] = &['.', ',', '/', ':', '-', '*', '#', '+'];

/// Case-folded description with digits and number punctuation removed and
/// whitespace collapsed. Pure: equal descriptions always give equal patterns.
pub fn normalize_pattern(description: &str) -> String {
    description
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_numeric() || NUMBER_PUNCTUATION.contains(&c) {
                ' '
            } else {
                c
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Learned payee for this description, if the user has confirmed one before.
pub fn resolve(conn: &Connection, user_id: i64, description: &str) -> Result<Option<i64>> {
    let pattern = normalize_pattern(description);
    if pattern.is_empty() {
        return Ok(None);
    }
    let payee_id = conn
        .prepare_cached("SELECT payee_id FROM payee_aliases WHERE user_id = ?1 AND normalized_pattern = ?2")?
        .query_row(rusqlite::params![user_id, pattern], |row| row.get(0))
        .optional()?;
    Ok(payee_id)
}

/// Record that `description` belongs to `payee_id`. Known patterns are
/// re-pointed to the payee and their hit count bumped.
pub fn learn(conn: &Connection, user_id: i64, payee_id: i64, description: &str) -> Result<()> {
    let pattern = normalize_pattern(description);
    if pattern.is_empty() {
        tracing::debug!(description, "description has no alias pattern, not learning");
        return Ok(());
    }
    conn.execute(
        "INSERT INTO payee_aliases (user_id, payee_id, bank_description, normalized_pattern, times_matched, last_matched_at) \
         VALUES (?1, ?2, ?3, ?4, 1, datetime('now')) \
         ON CONFLICT (user_id, normalized_pattern) DO UPDATE SET \
             times_matched = times_matched + 1, \
             last_matched_at = datetime('now'), \
             payee_id = excluded.payee_id",
        rusqlite::params![user_id, payee_id, description, pattern],
    )?;
    tracing::debug!(user_id, payee_id, pattern = %pattern, "learned payee alias");
    Ok(())
}

pub fn list_aliases(conn: &Connection, user_id: i64) -> Result<Vec<PayeeAlias>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.user_id, a.payee_id, p.name, a.bank_description, a.normalized_pattern, \
                a.times_matched, a.last_matched_at \
         FROM payee_aliases a JOIN payees p ON a.payee_id = p.id \
         WHERE a.user_id = ?1 ORDER BY a.times_matched DESC, a.normalized_pattern",
    )?;
    let rows = stmt
        .query_map([user_id], |row| {
            Ok(PayeeAlias {
                id: row.get(0)?,
                user_id: row.get(1)?,
                payee_id: row.get(2)?,
                payee_name: row.get(3)?,
                bank_description: row.get(4)?,
                normalized_pattern: row.get(5)?,
                times_matched: row.get(6)?,
                last_matched_at: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Payee name suggestion
// ---------------------------------------------------------------------------

static BANK_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:paiement\s+(?:par\s+)?(?:carte|cb)|paiement|prlv\s+sepa|pr[eé]l[eè]vement|vir(?:ement)?\s+sepa(?:\s+(?:recu|re[cç]u|emis|[eé]mis))?|vir(?:ement)?|carte|cb|checkcard|debit\s+card\s+purchase|pos\s+purchase|pos|ach\s+debit|ach)\b",
    )
    .expect("valid bank prefix regex")
});

const MAX_SUGGESTED_WORDS: usize = 4;

fn title_case(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Best-effort payee name for a description no alias knows about. Only ever
/// offered as a suggestion for a new payee.
pub fn suggest_payee_name(description: &str) -> Option<String> {
    let trimmed = description.trim();
    let rest = BANK_PREFIX.replace(trimmed, "");
    let words: Vec<String> = rest
        .split_whitespace()
        .filter(|w| !w.chars().any(|c| c.is_numeric()))
        .map(|w| w.trim_matches(|c: char| NUMBER_PUNCTUATION.contains(&c)))
        .filter(|w| !w.is_empty())
        .take(MAX_SUGGESTED_WORDS)
        .map(title_case)
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}
