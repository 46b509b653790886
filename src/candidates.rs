use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::error::{BudgieError, Result};
use crate::models::{from_cents, to_cents, MatchCandidate};

/// Unreconciled transactions of `account_id` whose absolute amount equals
/// `amount`, closest to `date` first (ties by id). No date filter.
pub fn find_candidates(
    conn: &Connection,
    account_id: i64,
    amount: Decimal,
    date: NaiveDate,
) -> Result<Vec<MatchCandidate>> {
    find_candidates_within(conn, account_id, amount, date, None)
}

/// Same as [`find_candidates`], optionally limited to `window_days` either
/// side of `date`.
pub fn find_candidates_within(
    conn: &Connection,
    account_id: i64,
    amount: Decimal,
    date: NaiveDate,
    window_days: Option<u32>,
) -> Result<Vec<MatchCandidate>> {
    let cents = to_cents(amount)
        .ok_or_else(|| BudgieError::Other(format!("amount {amount} cannot be stored in cents")))?;
    let mut stmt = conn.prepare_cached(
        "SELECT t.id, t.account_id, t.date, t.amount_cents, t.description, t.payee_id, p.name, t.reconciled \
         FROM transactions t LEFT JOIN payees p ON t.payee_id = p.id \
         WHERE t.account_id = ?1 AND abs(t.amount_cents) = abs(?2) AND t.reconciled = 0 \
           AND (?4 IS NULL OR abs(julianday(t.date) - julianday(?3)) <= ?4) \
         ORDER BY abs(julianday(t.date) - julianday(?3)), t.id",
    )?;
    let rows = stmt
        .query_map(
            rusqlite::params![account_id, cents, date, window_days.map(i64::from)],
            |row| {
                Ok(MatchCandidate {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    date: row.get(2)?,
                    amount: from_cents(row.get(3)?),
                    description: row.get(4)?,
                    payee_id: row.get(5)?,
                    payee_name: row.get(6)?,
                    reconciled: row.get::<_, i64>(7)? != 0,
                })
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    tracing::debug!(account_id, %amount, %date, found = rows.len(), "candidate search");
    Ok(rows)
}
