use std::collections::HashSet;
use std::str::FromStr;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::aliases;
use crate::candidates::find_candidates_within;
use crate::error::{BudgieError, Result};
use crate::models::{to_cents, ImportRow, MatchCandidate, MatchType, RowResult};

/// Where the "already imported and reconciled" check sits relative to
/// candidate matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Duplicate check runs before candidate matching.
    #[default]
    LedgerFirst,
    /// Duplicate check only runs when no candidate is left.
    CandidatesFirst,
    /// Never classify rows as duplicates.
    Off,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "ledger_first" | "ledger-first" => Ok(Self::LedgerFirst),
            "candidates_first" | "candidates-first" => Ok(Self::CandidatesFirst),
            "off" => Ok(Self::Off),
            other => Err(format!("unknown duplicate policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classifier {
    pub policy: DuplicatePolicy,
    pub window_days: Option<u32>,
}

/// Display rank for a candidate `days` away from the statement date.
pub fn score_for(days: i64) -> f64 {
    1.0 / (1.0 + days as f64)
}

impl Classifier {
    /// Classify rows in input order. A transaction pre-selected (or flagged as
    /// the duplicate) for one row is not offered to later rows of the batch.
    pub fn classify(
        &self,
        conn: &Connection,
        user_id: i64,
        account_id: i64,
        rows: &[ImportRow],
    ) -> Result<Vec<RowResult>> {
        let mut claimed: HashSet<i64> = HashSet::new();
        let mut results = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            let result = self.classify_row(conn, user_id, account_id, idx, row, &claimed)?;
            if let Some(id) = result.matched_transaction_id.or(result.duplicate_of) {
                claimed.insert(id);
            }
            results.push(result);
        }
        tracing::debug!(
            account_id,
            rows = rows.len(),
            duplicate = count(&results, MatchType::Duplicate),
            exact = count(&results, MatchType::Exact),
            probable = count(&results, MatchType::Probable),
            new = count(&results, MatchType::New),
            "classified statement rows"
        );
        Ok(results)
    }

    fn classify_row(
        &self,
        conn: &Connection,
        user_id: i64,
        account_id: i64,
        idx: usize,
        row: &ImportRow,
        claimed: &HashSet<i64>,
    ) -> Result<RowResult> {
        if self.policy == DuplicatePolicy::LedgerFirst {
            if let Some(id) = find_prior_duplicate(conn, account_id, row, claimed)? {
                return Ok(duplicate_result(idx, id));
            }
        }

        let candidates: Vec<MatchCandidate> =
            find_candidates_within(conn, account_id, row.amount, row.date, self.window_days)?
                .into_iter()
                .filter(|c| !claimed.contains(&c.id))
                .collect();
        if !candidates.is_empty() {
            return Ok(candidate_result(idx, row, candidates));
        }

        if self.policy == DuplicatePolicy::CandidatesFirst {
            if let Some(id) = find_prior_duplicate(conn, account_id, row, claimed)? {
                return Ok(duplicate_result(idx, id));
            }
        }

        let suggested_payee_id = aliases::resolve(conn, user_id, &row.description)?;
        let suggested_payee_name = match suggested_payee_id {
            Some(_) => None,
            None => aliases::suggest_payee_name(&row.description),
        };
        Ok(RowResult {
            row: idx,
            match_type: MatchType::New,
            score: None,
            suggested_payee_id,
            suggested_payee_name,
            action: MatchType::New.default_action(),
            matched_transaction_id: None,
            duplicate_of: None,
            candidates: Vec::new(),
        })
    }
}

fn count(results: &[RowResult], match_type: MatchType) -> usize {
    results.iter().filter(|r| r.match_type == match_type).count()
}

fn duplicate_result(idx: usize, transaction_id: i64) -> RowResult {
    RowResult {
        row: idx,
        match_type: MatchType::Duplicate,
        score: None,
        suggested_payee_id: None,
        suggested_payee_name: None,
        action: MatchType::Duplicate.default_action(),
        matched_transaction_id: None,
        duplicate_of: Some(transaction_id),
        candidates: Vec::new(),
    }
}

/// `candidates` is non-empty and already sorted closest-first.
fn candidate_result(idx: usize, row: &ImportRow, candidates: Vec<MatchCandidate>) -> RowResult {
    let best = &candidates[0];
    let single = candidates.len() == 1;
    let exact = single && best.amount == row.amount && best.date == row.date;
    let match_type = if exact { MatchType::Exact } else { MatchType::Probable };
    RowResult {
        row: idx,
        match_type,
        score: Some(score_for(best.days_from(row.date))),
        suggested_payee_id: None,
        suggested_payee_name: None,
        action: match_type.default_action(),
        matched_transaction_id: if single { Some(best.id) } else { None },
        duplicate_of: None,
        candidates,
    }
}

/// A reconciled transaction with the same statement fields, created by an
/// earlier confirmed import of this account.
fn find_prior_duplicate(
    conn: &Connection,
    account_id: i64,
    row: &ImportRow,
    claimed: &HashSet<i64>,
) -> Result<Option<i64>> {
    let cents = to_cents(row.amount)
        .ok_or_else(|| BudgieError::Other(format!("amount {} cannot be stored in cents", row.amount)))?;
    let mut stmt = conn.prepare_cached(
        "SELECT t.id FROM transactions t JOIN import_batches b ON b.id = t.import_batch_id \
         WHERE t.account_id = ?1 AND t.date = ?2 AND t.amount_cents = ?3 AND t.bank_description = ?4 \
           AND t.reconciled = 1 AND b.status = 'confirmed' AND b.account_id = ?1 \
         ORDER BY t.id",
    )?;
    let ids = stmt
        .query_map(
            rusqlite::params![account_id, row.date, cents, row.description],
            |r| r.get::<_, i64>(0),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids.into_iter().find(|id| !claimed.contains(id)))
}
