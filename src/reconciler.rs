use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use rusqlite::{Connection, TransactionBehavior};
use rust_decimal::Decimal;

use crate::aliases;
use crate::batches::{self, ConfirmedCounts, NewBatch};
use crate::candidates::find_candidates;
use crate::classifier::Classifier;
use crate::error::{BudgieError, Result, RowIssue};
use crate::ledger::{self, NewTransaction};
use crate::models::{
    to_cents, BatchStatus, ConfirmSummary, ImportBatch, MatchCandidate, RowAction, RowOverride, RowResult,
};
use crate::normalizer::{normalize_all, AmountFormat, ColumnMapping};

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

pub struct ParseRequest<'a> {
    pub user_id: i64,
    pub account_id: i64,
    pub lines: &'a [(usize, Vec<String>)],
    pub mapping: &'a ColumnMapping,
    pub format: &'a AmountFormat,
    pub source_name: Option<&'a str>,
    pub checksum: Option<&'a str>,
}

/// Normalize and classify a statement, then store it as a pending batch.
/// Lines that fail to normalize are kept on the batch as rejected.
pub fn parse(conn: &Connection, req: &ParseRequest<'_>, classifier: &Classifier) -> Result<ImportBatch> {
    req.mapping.validate()?;
    ledger::account_by_id(conn, req.user_id, req.account_id)?;

    let (rows, rejected) = normalize_all(req.lines, req.mapping, req.format);
    let results = classifier.classify(conn, req.user_id, req.account_id, &rows)?;
    let id = batches::create_batch(
        conn,
        &NewBatch {
            user_id: req.user_id,
            account_id: req.account_id,
            source_name: req.source_name,
            checksum: req.checksum,
            rows: &rows,
            rejected: &rejected,
            match_results: &results,
        },
    )?;
    tracing::info!(
        batch_id = id,
        account_id = req.account_id,
        rows = rows.len(),
        rejected = rejected.len(),
        "parsed statement into pending batch"
    );
    batches::get_batch(conn, id)
}

/// Manual candidate search for the review step. No date window.
pub fn match_candidates(
    conn: &Connection,
    account_id: i64,
    amount: Decimal,
    date: NaiveDate,
) -> Result<Vec<MatchCandidate>> {
    find_candidates(conn, account_id, amount, date)
}

/// Re-classify the rows of a failed batch into a fresh pending batch.
pub fn retry(conn: &Connection, user_id: i64, batch_id: i64, classifier: &Classifier) -> Result<ImportBatch> {
    let old = load_owned(conn, user_id, batch_id)?;
    if old.status != BatchStatus::Failed {
        return Err(BudgieError::Other(format!(
            "Import batch {batch_id} is {}; only failed batches can be retried",
            old.status
        )));
    }
    let results = classifier.classify(conn, user_id, old.account_id, &old.rows)?;
    let id = batches::create_batch(
        conn,
        &NewBatch {
            user_id,
            account_id: old.account_id,
            source_name: old.source_name.as_deref(),
            checksum: old.checksum.as_deref(),
            rows: &old.rows,
            rejected: &old.rejected,
            match_results: &results,
        },
    )?;
    tracing::info!(batch_id = id, retried = batch_id, "re-classified failed batch");
    batches::get_batch(conn, id)
}

fn load_owned(conn: &Connection, user_id: i64, batch_id: i64) -> Result<ImportBatch> {
    let batch = batches::get_batch(conn, batch_id)?;
    if batch.user_id != user_id {
        return Err(BudgieError::NotFound(format!("import batch {batch_id}")));
    }
    Ok(batch)
}

// ---------------------------------------------------------------------------
// Effective actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayeeChoice {
    Existing(i64),
    New(String),
}

/// What confirm will do with one row once overrides are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveAction {
    Skip,
    Create {
        payee: Option<PayeeChoice>,
        /// The user picked the payee, so its alias is learned.
        assigned: bool,
    },
    Match {
        transaction_id: i64,
        /// Only set when the user changed the payee.
        payee: Option<PayeeChoice>,
    },
}

fn override_payee(ov: &RowOverride) -> std::result::Result<Option<PayeeChoice>, String> {
    let name = ov.payee_name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    match (ov.payee_id, name) {
        (Some(_), Some(_)) => Err("give either a payee id or a new payee name, not both".to_string()),
        (Some(id), None) => Ok(Some(PayeeChoice::Existing(id))),
        (None, Some(name)) => Ok(Some(PayeeChoice::New(name.to_string()))),
        (None, None) => Ok(None),
    }
}

/// Layer a user override over the classifier's result. A match target given
/// without an action implies `match`.
pub fn effective_action(
    result: &RowResult,
    line: usize,
    ov: Option<&RowOverride>,
) -> std::result::Result<EffectiveAction, RowIssue> {
    let issue = |msg: String| RowIssue::at(result.row, line, msg);

    let action = match ov.and_then(|o| o.action.as_deref()) {
        Some(raw) => raw.parse::<RowAction>().map_err(issue)?,
        None if ov.and_then(|o| o.matched_transaction_id).is_some() => RowAction::Match,
        None => result.action,
    };
    let payee = match ov {
        Some(o) => override_payee(o).map_err(issue)?,
        None => None,
    };

    match action {
        RowAction::Skip => Ok(EffectiveAction::Skip),
        RowAction::Create => {
            let assigned = payee.is_some();
            Ok(EffectiveAction::Create {
                payee: payee.or(result.suggested_payee_id.map(PayeeChoice::Existing)),
                assigned,
            })
        }
        RowAction::Match => {
            let target = ov
                .and_then(|o| o.matched_transaction_id)
                .or(result.matched_transaction_id)
                .ok_or_else(|| issue("match action needs a matched transaction".to_string()))?;
            Ok(EffectiveAction::Match {
                transaction_id: target,
                payee,
            })
        }
    }
}

/// Resolve every row of `batch`, reporting all offending rows at once.
pub fn plan(
    batch: &ImportBatch,
    overrides: &[RowOverride],
) -> std::result::Result<Vec<EffectiveAction>, Vec<RowIssue>> {
    let mut issues = Vec::new();
    let mut by_row: HashMap<usize, &RowOverride> = HashMap::new();
    for ov in overrides {
        if ov.row >= batch.rows.len() {
            issues.push(RowIssue::batch(format!(
                "override for row {} is out of range ({} rows)",
                ov.row,
                batch.rows.len()
            )));
        } else if by_row.insert(ov.row, ov).is_some() {
            issues.push(RowIssue::at(
                ov.row,
                batch.rows[ov.row].line,
                "row has more than one override",
            ));
        }
    }

    let mut actions = Vec::with_capacity(batch.rows.len());
    let mut targets: HashMap<i64, usize> = HashMap::new();
    for (idx, result) in batch.match_results.iter().enumerate() {
        let line = batch.rows[idx].line;
        match effective_action(result, line, by_row.get(&idx).copied()) {
            Ok(action) => {
                if let EffectiveAction::Match { transaction_id, .. } = &action {
                    if let Some(first) = targets.insert(*transaction_id, line) {
                        issues.push(RowIssue::at(
                            idx,
                            line,
                            format!("transaction {transaction_id} is already matched by line {first}"),
                        ));
                    }
                }
                actions.push(action);
            }
            Err(issue) => issues.push(issue),
        }
    }

    if issues.is_empty() {
        Ok(actions)
    } else {
        Err(issues)
    }
}

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

/// In-memory override editor over a pending batch. Dropping it abandons the
/// edits; nothing is written until [`Review::confirm`].
pub struct Review {
    batch: ImportBatch,
    overrides: BTreeMap<usize, RowOverride>,
}

impl Review {
    pub fn new(batch: ImportBatch) -> Self {
        Self {
            batch,
            overrides: BTreeMap::new(),
        }
    }

    fn entry(&mut self, row: usize) -> Result<&mut RowOverride> {
        if row >= self.batch.rows.len() {
            return Err(BudgieError::Validation(vec![RowIssue::batch(format!(
                "row {row} is out of range ({} rows)",
                self.batch.rows.len()
            ))]));
        }
        Ok(self.overrides.entry(row).or_insert_with(|| RowOverride::for_row(row)))
    }

    /// Merge a stored override (e.g. from a JSON file); set fields win.
    pub fn apply(&mut self, ov: RowOverride) -> Result<()> {
        let entry = self.entry(ov.row)?;
        if ov.action.is_some() {
            entry.action = ov.action;
        }
        if ov.matched_transaction_id.is_some() {
            entry.matched_transaction_id = ov.matched_transaction_id;
        }
        if ov.payee_id.is_some() {
            entry.payee_id = ov.payee_id;
            entry.payee_name = None;
        }
        if ov.payee_name.is_some() {
            entry.payee_name = ov.payee_name;
            entry.payee_id = None;
        }
        Ok(())
    }

    pub fn set_action(&mut self, row: usize, action: RowAction) -> Result<()> {
        self.entry(row)?.action = Some(action.to_string());
        Ok(())
    }

    /// Current candidates for `row`, re-queried without a date window.
    pub fn candidates(&self, conn: &Connection, row: usize) -> Result<Vec<MatchCandidate>> {
        let r = self
            .batch
            .rows
            .get(row)
            .ok_or_else(|| BudgieError::NotFound(format!("row {row}")))?;
        match_candidates(conn, self.batch.account_id, r.amount, r.date)
    }

    /// Match `row` to `transaction_id`, which must be one of its candidates.
    pub fn set_match(&mut self, conn: &Connection, row: usize, transaction_id: i64) -> Result<()> {
        self.entry(row)?;
        let candidates = self.candidates(conn, row)?;
        if !candidates.iter().any(|c| c.id == transaction_id) {
            return Err(BudgieError::Validation(vec![RowIssue::at(
                row,
                self.batch.rows[row].line,
                format!("transaction {transaction_id} is not a candidate for this row"),
            )]));
        }
        let entry = self.entry(row)?;
        entry.action = Some(RowAction::Match.to_string());
        entry.matched_transaction_id = Some(transaction_id);
        Ok(())
    }

    pub fn set_payee(&mut self, row: usize, payee_id: i64) -> Result<()> {
        let entry = self.entry(row)?;
        entry.payee_id = Some(payee_id);
        entry.payee_name = None;
        Ok(())
    }

    pub fn new_payee(&mut self, row: usize, name: &str) -> Result<()> {
        let entry = self.entry(row)?;
        entry.payee_name = Some(name.to_string());
        entry.payee_id = None;
        Ok(())
    }

    pub fn overrides(&self) -> Vec<RowOverride> {
        self.overrides.values().cloned().collect()
    }

    pub fn effective_rows(&self) -> Vec<std::result::Result<EffectiveAction, RowIssue>> {
        self.batch
            .match_results
            .iter()
            .enumerate()
            .map(|(idx, result)| effective_action(result, self.batch.rows[idx].line, self.overrides.get(&idx)))
            .collect()
    }

    pub fn confirm(self, conn: &mut Connection) -> Result<ConfirmSummary> {
        let overrides = self.overrides();
        confirm(conn, self.batch.user_id, self.batch.id, &overrides)
    }
}

// ---------------------------------------------------------------------------
// Confirm
// ---------------------------------------------------------------------------

/// Apply a reviewed batch to the ledger in one write transaction.
///
/// Validation and conflict errors roll everything back and mark the batch
/// failed. Closed batches are refused without any state change.
pub fn confirm(
    conn: &mut Connection,
    user_id: i64,
    batch_id: i64,
    overrides: &[RowOverride],
) -> Result<ConfirmSummary> {
    let batch = load_owned(conn, user_id, batch_id)?;
    if batch.status != BatchStatus::Pending {
        return Err(BudgieError::BatchClosed {
            id: batch_id,
            status: batch.status.to_string(),
        });
    }

    let result = match plan(&batch, overrides) {
        Ok(actions) => apply(conn, user_id, &batch, &actions),
        Err(issues) => Err(BudgieError::Validation(issues)),
    };

    match result {
        Ok(summary) => {
            tracing::info!(
                batch_id,
                created = summary.created,
                reconciled = summary.reconciled,
                skipped = summary.skipped,
                "confirmed import batch"
            );
            Ok(summary)
        }
        Err(e @ (BudgieError::Validation(_) | BudgieError::Conflict(_))) => {
            tracing::warn!(batch_id, error = %e, "import batch failed");
            // A concurrent confirm may have closed the batch already.
            if let Err(mark_err) = batches::mark_failed(conn, batch_id, &e.to_string()) {
                tracing::warn!(batch_id, error = %mark_err, "could not mark import batch failed");
            }
            Err(e)
        }
        Err(e) => Err(e),
    }
}

fn resolve_payee(conn: &Connection, user_id: i64, choice: Option<&PayeeChoice>) -> Result<Option<i64>> {
    match choice {
        None => Ok(None),
        Some(PayeeChoice::Existing(id)) => match ledger::payee_by_id(conn, user_id, *id)? {
            Some(payee) => Ok(Some(payee.id)),
            None => Err(BudgieError::UnknownPayee(format!("payee {id} does not exist"))),
        },
        Some(PayeeChoice::New(name)) => ledger::ensure_payee(conn, user_id, name).map(Some),
    }
}

fn apply(
    conn: &mut Connection,
    user_id: i64,
    batch: &ImportBatch,
    actions: &[EffectiveAction],
) -> Result<ConfirmSummary> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let mut issues = Vec::new();
    let mut conflicts = Vec::new();
    let mut results = batch.match_results.clone();
    let mut summary = ConfirmSummary {
        batch_id: batch.id,
        ..Default::default()
    };
    let mut touched: HashSet<i64> = HashSet::new();

    for (idx, action) in actions.iter().enumerate() {
        let row = &batch.rows[idx];
        match action {
            EffectiveAction::Skip => {
                results[idx].action = RowAction::Skip;
                results[idx].matched_transaction_id = None;
                summary.skipped += 1;
            }
            EffectiveAction::Create { payee, assigned } => {
                let payee_id = match resolve_payee(&tx, user_id, payee.as_ref()) {
                    Ok(id) => id,
                    Err(BudgieError::UnknownPayee(msg)) => {
                        issues.push(RowIssue::at(idx, row.line, msg));
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let id = ledger::insert_transaction(
                    &tx,
                    &NewTransaction {
                        account_id: batch.account_id,
                        date: row.date,
                        amount: row.amount,
                        description: &row.description,
                        bank_description: Some(&row.description),
                        payee_id,
                        check_number: row.check_number.as_deref(),
                        import_batch_id: Some(batch.id),
                    },
                )?;
                if let (true, Some(pid)) = (*assigned, payee_id) {
                    aliases::learn(&tx, user_id, pid, &row.description)?;
                }
                results[idx].action = RowAction::Create;
                results[idx].matched_transaction_id = None;
                if let Some(txn) = ledger::get_transaction(&tx, id)? {
                    summary.created_transactions.push(txn);
                }
            }
            EffectiveAction::Match { transaction_id, payee } => {
                let target = match ledger::get_transaction(&tx, *transaction_id)? {
                    Some(t) => t,
                    None => {
                        issues.push(RowIssue::at(
                            idx,
                            row.line,
                            format!("transaction {transaction_id} does not exist"),
                        ));
                        continue;
                    }
                };
                if target.account_id != batch.account_id {
                    issues.push(RowIssue::at(
                        idx,
                        row.line,
                        format!("transaction {transaction_id} belongs to another account"),
                    ));
                    continue;
                }
                if to_cents(target.amount.abs()) != to_cents(row.amount.abs()) {
                    issues.push(RowIssue::at(
                        idx,
                        row.line,
                        format!(
                            "transaction {transaction_id} amount {} does not match {}",
                            target.amount, row.amount
                        ),
                    ));
                    continue;
                }
                let payee_id = match resolve_payee(&tx, user_id, payee.as_ref()) {
                    Ok(id) => id,
                    Err(BudgieError::UnknownPayee(msg)) => {
                        issues.push(RowIssue::at(idx, row.line, msg));
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let updated = tx.execute(
                    "UPDATE transactions SET reconciled = 1, bank_description = ?2, reconciled_batch_id = ?3, \
                         payee_id = COALESCE(?4, payee_id) \
                     WHERE id = ?1 AND reconciled = 0",
                    rusqlite::params![transaction_id, row.description, batch.id, payee_id],
                )?;
                if updated == 0 {
                    conflicts.push(RowIssue::at(
                        idx,
                        row.line,
                        format!("transaction {transaction_id} is already reconciled"),
                    ));
                    continue;
                }
                if let Some(pid) = payee_id.or(target.payee_id) {
                    aliases::learn(&tx, user_id, pid, &row.description)?;
                }
                results[idx].action = RowAction::Match;
                results[idx].matched_transaction_id = Some(*transaction_id);
                touched.insert(*transaction_id);
                if let Some(txn) = ledger::get_transaction(&tx, *transaction_id)? {
                    summary.reconciled_transactions.push(txn);
                }
            }
        }
    }

    // Dropping `tx` on these paths rolls the whole batch back.
    if !issues.is_empty() {
        return Err(BudgieError::Validation(issues));
    }
    if !conflicts.is_empty() {
        return Err(BudgieError::Conflict(conflicts));
    }

    summary.created = summary.created_transactions.len();
    summary.reconciled = touched.len();
    batches::mark_confirmed(
        &tx,
        batch.id,
        &results,
        &ConfirmedCounts {
            matched: summary.reconciled,
            created: summary.created,
            skipped: summary.skipped,
        },
    )?;
    tx.commit()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::tests::add_txn;
    use crate::db::get_connection;
    use crate::db::testing::{fixture, Fixture};
    use crate::ledger::{add_payee, get_transaction, list_transactions};
    use crate::models::MatchType;
    use rust_decimal_macros::dec;

    fn lines(rows: &[(&str, &str, &str)]) -> Vec<(usize, Vec<String>)> {
        rows.iter()
            .enumerate()
            .map(|(i, (d, desc, amt))| (i + 2, vec![d.to_string(), desc.to_string(), amt.to_string()]))
            .collect()
    }

    fn parse_lines(f: &Fixture, rows: &[(&str, &str, &str)]) -> ImportBatch {
        let lines = lines(rows);
        parse(
            &f.conn,
            &ParseRequest {
                user_id: f.user_id,
                account_id: f.account_id,
                lines: &lines,
                mapping: &ColumnMapping::default(),
                format: &AmountFormat::default(),
                source_name: Some("releve.csv"),
                checksum: None,
            },
            &Classifier::default(),
        )
        .unwrap()
    }

    fn open_dinner(f: &Fixture) -> (i64, i64) {
        let payee = add_payee(&f.conn, f.user_id, "Restaurant Le Petit Bistrot").unwrap();
        let txn = add_txn(&f.conn, f.account_id, "2026-01-09", dec!(-42.00), "Dinner", Some(payee));
        (payee, txn)
    }

    #[test]
    fn test_parse_persists_pending_batch_with_rejects() {
        let f = fixture();
        let batch = parse_lines(
            &f,
            &[
                ("2026-01-09", "PAIEMENT RESTAURANT NICE", "-42.00"),
                ("not a date", "???", "1"),
            ],
        );
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.rejected[0].line, 3);
        assert_eq!(batch.match_results[0].match_type, MatchType::New);
    }

    #[test]
    fn test_parse_flags_oversized_amounts_per_line() {
        let f = fixture();
        let batch = parse_lines(
            &f,
            &[
                ("2026-01-09", "PAIEMENT RESTAURANT NICE", "-1.00"),
                ("2026-01-09", "VIREMENT", "100000000000000000000"),
                ("2026-01-10", "VIREMENT", "999999999999999999999999999"),
            ],
        );
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rejected.iter().map(|r| r.line).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn test_parse_rejects_foreign_account() {
        let f = fixture();
        let bob = ledger::ensure_user(&f.conn, "bob").unwrap();
        let lines = lines(&[("2026-01-09", "X", "-1.00")]);
        let err = parse(
            &f.conn,
            &ParseRequest {
                user_id: bob,
                account_id: f.account_id,
                lines: &lines,
                mapping: &ColumnMapping::default(),
                format: &AmountFormat::default(),
                source_name: None,
                checksum: None,
            },
            &Classifier::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BudgieError::UnknownAccount(_)));
    }

    #[test]
    fn test_effective_action_layers_override() {
        let result = RowResult {
            row: 0,
            match_type: MatchType::New,
            score: None,
            suggested_payee_id: Some(7),
            suggested_payee_name: None,
            action: RowAction::Create,
            matched_transaction_id: None,
            duplicate_of: None,
            candidates: vec![],
        };
        assert_eq!(
            effective_action(&result, 2, None),
            Ok(EffectiveAction::Create {
                payee: Some(PayeeChoice::Existing(7)),
                assigned: false
            })
        );

        let mut ov = RowOverride::for_row(0);
        ov.payee_name = Some("Boulangerie".to_string());
        assert_eq!(
            effective_action(&result, 2, Some(&ov)),
            Ok(EffectiveAction::Create {
                payee: Some(PayeeChoice::New("Boulangerie".to_string())),
                assigned: true
            })
        );

        let mut ov = RowOverride::for_row(0);
        ov.matched_transaction_id = Some(12);
        assert_eq!(
            effective_action(&result, 2, Some(&ov)),
            Ok(EffectiveAction::Match {
                transaction_id: 12,
                payee: None
            })
        );

        let mut ov = RowOverride::for_row(0);
        ov.action = Some("ignore".to_string());
        let issue = effective_action(&result, 2, Some(&ov)).unwrap_err();
        assert_eq!(issue.line, Some(2));
        assert!(issue.message.contains("unknown action"));

        let mut ov = RowOverride::for_row(0);
        ov.action = Some("match".to_string());
        assert!(effective_action(&result, 2, Some(&ov)).is_err());
    }

    #[test]
    fn test_confirm_creates_and_reconciles() {
        let mut f = fixture();
        let a = add_txn(&f.conn, f.account_id, "2026-01-09", dec!(-42.00), "Dinner", None);
        let b = add_txn(&f.conn, f.account_id, "2026-01-15", dec!(-18.40), "Groceries", None);
        let batch = parse_lines(
            &f,
            &[
                ("2026-01-09", "PAIEMENT RESTAURANT NICE", "-42.00"),
                ("2026-01-12", "PAIEMENT CB MAGASIN", "-777.77"),
                ("2026-01-14", "CB MONOPRIX", "-18.40"),
            ],
        );
        assert_eq!(batch.match_results[2].matched_transaction_id, Some(b));

        let summary = confirm(&mut f.conn, f.user_id, batch.id, &[]).unwrap();
        assert_eq!((summary.created, summary.reconciled, summary.skipped), (1, 2, 0));
        assert!(get_transaction(&f.conn, a).unwrap().unwrap().reconciled);
        assert!(get_transaction(&f.conn, b).unwrap().unwrap().reconciled);
        assert_eq!(summary.created_transactions[0].import_batch_id, Some(batch.id));
        assert_eq!(summary.reconciled_transactions[0].reconciled_batch_id, Some(batch.id));

        let stored = batches::get_batch(&f.conn, batch.id).unwrap();
        assert_eq!(stored.status, BatchStatus::Confirmed);
        assert_eq!((stored.matched_count, stored.created_count, stored.skipped_count), (2, 1, 0));
    }

    #[test]
    fn test_reimport_after_match_is_new() {
        let mut f = fixture();
        let (_, txn) = open_dinner(&f);
        let row = [("2026-01-09", "PAIEMENT RESTAURANT NICE", "-42.00")];
        let first = parse_lines(&f, &row);
        assert_eq!(first.match_results[0].match_type, MatchType::Exact);
        confirm(&mut f.conn, f.user_id, first.id, &[]).unwrap();

        let reconciled = get_transaction(&f.conn, txn).unwrap().unwrap();
        assert_eq!(reconciled.bank_description.as_deref(), Some("PAIEMENT RESTAURANT NICE"));

        let second = parse_lines(&f, &row);
        assert_eq!(second.match_results[0].match_type, MatchType::New);
        assert!(second.match_results[0].candidates.is_empty());
    }

    #[test]
    fn test_match_learns_alias_from_target_payee() {
        let mut f = fixture();
        let (payee, _) = open_dinner(&f);
        let batch = parse_lines(&f, &[("2026-01-09", "PAIEMENT RESTAURANT NICE", "-42.00")]);
        confirm(&mut f.conn, f.user_id, batch.id, &[]).unwrap();
        assert_eq!(
            aliases::resolve(&f.conn, f.user_id, "PAIEMENT RESTAURANT NICE").unwrap(),
            Some(payee)
        );
    }

    #[test]
    fn test_create_with_new_payee_learns_and_suggests_next_time() {
        let mut f = fixture();
        let batch = parse_lines(&f, &[("2026-01-12", "PRLV SEPA EDF 0112", "-61.30")]);
        let mut review = Review::new(batch);
        review.new_payee(0, "EDF").unwrap();
        let summary = review.confirm(&mut f.conn).unwrap();
        let payee = ledger::payee_by_name(&f.conn, f.user_id, "EDF").unwrap().unwrap();
        assert_eq!(summary.created_transactions[0].payee_id, Some(payee.id));

        let next = parse_lines(&f, &[("2026-02-12", "PRLV SEPA EDF 0212", "-58.10")]);
        assert_eq!(next.match_results[0].suggested_payee_id, Some(payee.id));
    }

    #[test]
    fn test_create_with_suggested_payee_does_not_relearn() {
        let mut f = fixture();
        let payee = add_payee(&f.conn, f.user_id, "Monoprix").unwrap();
        aliases::learn(&f.conn, f.user_id, payee, "CB MONOPRIX").unwrap();
        let batch = parse_lines(&f, &[("2026-01-14", "CB MONOPRIX", "-18.40")]);
        let summary = confirm(&mut f.conn, f.user_id, batch.id, &[]).unwrap();
        assert_eq!(summary.created_transactions[0].payee_id, Some(payee));
        assert_eq!(aliases::list_aliases(&f.conn, f.user_id).unwrap()[0].times_matched, 1);
    }

    #[test]
    fn test_same_target_twice_is_rejected() {
        let mut f = fixture();
        let txn = add_txn(&f.conn, f.account_id, "2026-01-09", dec!(-3.50), "Coffee", None);
        let batch = parse_lines(
            &f,
            &[("2026-01-09", "CB CAFE", "-3.50"), ("2026-01-10", "CB CAFE", "-3.50")],
        );
        let mut ov = RowOverride::for_row(1);
        ov.matched_transaction_id = Some(txn);
        let err = confirm(&mut f.conn, f.user_id, batch.id, &[ov]).unwrap_err();
        assert!(matches!(err, BudgieError::Validation(_)));
        assert_eq!(err.issues()[0].line, Some(3));
        assert!(!get_transaction(&f.conn, txn).unwrap().unwrap().reconciled);
        assert_eq!(batches::get_batch(&f.conn, batch.id).unwrap().status, BatchStatus::Failed);
    }

    #[test]
    fn test_unknown_action_fails_batch() {
        let mut f = fixture();
        let batch = parse_lines(&f, &[("2026-01-12", "PAIEMENT CB MAGASIN", "-777.77")]);
        let mut ov = RowOverride::for_row(0);
        ov.action = Some("archive".to_string());
        let err = confirm(&mut f.conn, f.user_id, batch.id, &[ov]).unwrap_err();
        assert!(matches!(err, BudgieError::Validation(_)));
        assert!(list_transactions(&f.conn, f.account_id).unwrap().is_empty());
        let stored = batches::get_batch(&f.conn, batch.id).unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        assert!(stored.error.unwrap().contains("unknown action"));
    }

    #[test]
    fn test_conflict_rolls_back_whole_batch() {
        let mut f = fixture();
        let (_, txn) = open_dinner(&f);
        let batch = parse_lines(
            &f,
            &[
                ("2026-01-12", "PAIEMENT CB MAGASIN", "-777.77"),
                ("2026-01-09", "PAIEMENT RESTAURANT NICE", "-42.00"),
            ],
        );
        // Someone else reconciles the target between review and confirm.
        f.conn
            .execute("UPDATE transactions SET reconciled = 1 WHERE id = ?1", [txn])
            .unwrap();

        let err = confirm(&mut f.conn, f.user_id, batch.id, &[]).unwrap_err();
        assert!(matches!(err, BudgieError::Conflict(_)));
        assert_eq!(err.issues()[0].line, Some(3));
        assert_eq!(list_transactions(&f.conn, f.account_id).unwrap().len(), 1);
        assert_eq!(batches::get_batch(&f.conn, batch.id).unwrap().status, BatchStatus::Failed);
    }

    #[test]
    fn test_concurrent_confirms_reconcile_target_once() {
        let f = fixture();
        let (_, txn) = open_dinner(&f);
        let statement = [("2026-01-09", "PAIEMENT RESTAURANT NICE", "-42.00")];
        let first = parse_lines(&f, &statement);
        let second = parse_lines(&f, &statement);
        assert_eq!(first.match_results[0].matched_transaction_id, Some(txn));
        assert_eq!(second.match_results[0].matched_transaction_id, Some(txn));

        let path = f._dir.path().join("test.db");
        let user_id = f.user_id;
        let outcomes: Vec<Result<ConfirmSummary>> = std::thread::scope(|s| {
            let handles: Vec<_> = [first.id, second.id]
                .into_iter()
                .map(|id| {
                    let mut conn = get_connection(&path).unwrap();
                    s.spawn(move || confirm(&mut conn, user_id, id, &[]))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let won = outcomes.iter().filter(|o| o.is_ok()).count();
        let lost: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().err()).collect();
        assert_eq!(won, 1);
        assert_eq!(lost.len(), 1);
        assert!(matches!(lost[0], BudgieError::Conflict(_)));

        let statuses: Vec<BatchStatus> = [first.id, second.id]
            .iter()
            .map(|id| batches::get_batch(&f.conn, *id).unwrap().status)
            .collect();
        assert!(statuses.contains(&BatchStatus::Confirmed));
        assert!(statuses.contains(&BatchStatus::Failed));
        let txns = list_transactions(&f.conn, f.account_id).unwrap();
        assert_eq!(txns.len(), 1);
        assert!(txns[0].reconciled);
    }

    #[test]
    fn test_conflict_reported_when_batch_closed_meanwhile() {
        let f = fixture();
        let (_, txn) = open_dinner(&f);
        let batch = parse_lines(&f, &[("2026-01-09", "PAIEMENT RESTAURANT NICE", "-42.00")]);
        let path = f._dir.path().join("test.db");

        // Hold the write lock while reconciling the target and closing the
        // batch, so the confirm below loads a pending batch and then waits.
        let other = get_connection(&path).unwrap();
        let mut conn = get_connection(&path).unwrap();
        other.execute_batch("BEGIN IMMEDIATE").unwrap();
        other
            .execute("UPDATE transactions SET reconciled = 1 WHERE id = ?1", [txn])
            .unwrap();
        other
            .execute("UPDATE import_batches SET status = 'confirmed' WHERE id = ?1", [batch.id])
            .unwrap();

        let user_id = f.user_id;
        let batch_id = batch.id;
        let handle = std::thread::spawn(move || confirm(&mut conn, user_id, batch_id, &[]));
        std::thread::sleep(std::time::Duration::from_millis(500));
        other.execute_batch("COMMIT").unwrap();

        let err = handle.join().unwrap().unwrap_err();
        assert!(matches!(err, BudgieError::Conflict(_)));
        assert_eq!(batches::get_batch(&f.conn, batch.id).unwrap().status, BatchStatus::Confirmed);
    }

    #[test]
    fn test_closed_batch_cannot_be_confirmed_again() {
        let mut f = fixture();
        let batch = parse_lines(&f, &[("2026-01-12", "PAIEMENT CB MAGASIN", "-777.77")]);
        confirm(&mut f.conn, f.user_id, batch.id, &[]).unwrap();
        let err = confirm(&mut f.conn, f.user_id, batch.id, &[]).unwrap_err();
        assert!(matches!(err, BudgieError::BatchClosed { .. }));
        assert_eq!(list_transactions(&f.conn, f.account_id).unwrap().len(), 1);
        assert_eq!(batches::get_batch(&f.conn, batch.id).unwrap().status, BatchStatus::Confirmed);
    }

    #[test]
    fn test_match_rejects_wrong_amount_and_foreign_payee() {
        let mut f = fixture();
        let other = add_txn(&f.conn, f.account_id, "2026-01-09", dec!(-10.00), "Other", None);
        let batch = parse_lines(&f, &[("2026-01-09", "PAIEMENT RESTAURANT NICE", "-42.00")]);
        let mut ov = RowOverride::for_row(0);
        ov.matched_transaction_id = Some(other);
        let err = confirm(&mut f.conn, f.user_id, batch.id, &[ov]).unwrap_err();
        assert!(err.to_string().contains("does not match"));

        let bob = ledger::ensure_user(&f.conn, "bob").unwrap();
        let bobs = add_payee(&f.conn, bob, "Bob's payee").unwrap();
        let batch = parse_lines(&f, &[("2026-01-12", "PAIEMENT CB MAGASIN", "-777.77")]);
        let mut ov = RowOverride::for_row(0);
        ov.payee_id = Some(bobs);
        let err = confirm(&mut f.conn, f.user_id, batch.id, &[ov]).unwrap_err();
        assert!(matches!(err, BudgieError::Validation(_)));
        assert_eq!(list_transactions(&f.conn, f.account_id).unwrap().len(), 1);
    }

    #[test]
    fn test_override_row_checks() {
        let mut f = fixture();
        let batch = parse_lines(&f, &[("2026-01-12", "PAIEMENT CB MAGASIN", "-777.77")]);
        let overrides = [RowOverride::for_row(0), RowOverride::for_row(0), RowOverride::for_row(4)];
        let err = confirm(&mut f.conn, f.user_id, batch.id, &overrides).unwrap_err();
        assert_eq!(err.issues().len(), 2);
    }

    #[test]
    fn test_review_set_match_requires_candidate() {
        let f = fixture();
        let near = add_txn(&f.conn, f.account_id, "2026-01-18", dec!(2800.00), "Salaire", None);
        add_txn(&f.conn, f.account_id, "2025-12-20", dec!(2800.00), "Salaire", None);
        let unrelated = add_txn(&f.conn, f.account_id, "2026-01-20", dec!(-5.00), "Parking", None);
        let batch = parse_lines(&f, &[("2026-01-20", "VIR SEPA SALAIRE", "2800.00")]);
        assert_eq!(batch.match_results[0].match_type, MatchType::Probable);

        let mut review = Review::new(batch);
        assert!(review.set_match(&f.conn, 0, unrelated).is_err());
        review.set_match(&f.conn, 0, near).unwrap();
        review.set_action(0, RowAction::Match).unwrap();
        assert!(review.set_payee(3, 1).is_err());
        assert_eq!(
            review.effective_rows()[0],
            Ok(EffectiveAction::Match {
                transaction_id: near,
                payee: None
            })
        );
    }

    #[test]
    fn test_skip_leaves_ledger_alone() {
        let mut f = fixture();
        let (_, txn) = open_dinner(&f);
        let batch = parse_lines(&f, &[("2026-01-09", "PAIEMENT RESTAURANT NICE", "-42.00")]);
        let mut review = Review::new(batch);
        review.set_action(0, RowAction::Skip).unwrap();
        let summary = review.confirm(&mut f.conn).unwrap();
        assert_eq!((summary.created, summary.reconciled, summary.skipped), (0, 0, 1));
        assert!(!get_transaction(&f.conn, txn).unwrap().unwrap().reconciled);
    }

    #[test]
    fn test_reimport_of_created_rows_converges() {
        let mut f = fixture();
        let row = [("2026-01-12", "PAIEMENT CB MAGASIN", "-777.77")];
        let first = parse_lines(&f, &row);
        let summary = confirm(&mut f.conn, f.user_id, first.id, &[]).unwrap();
        let created = summary.created_transactions[0].id;
        assert!(!summary.created_transactions[0].reconciled);

        let second = parse_lines(&f, &row);
        assert_eq!(second.match_results[0].match_type, MatchType::Exact);
        assert_eq!(second.match_results[0].matched_transaction_id, Some(created));
        confirm(&mut f.conn, f.user_id, second.id, &[]).unwrap();

        let third = parse_lines(&f, &row);
        assert_eq!(third.match_results[0].match_type, MatchType::Duplicate);
        assert_eq!(third.match_results[0].duplicate_of, Some(created));
        let summary = confirm(&mut f.conn, f.user_id, third.id, &[]).unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(list_transactions(&f.conn, f.account_id).unwrap().len(), 1);
    }

    #[test]
    fn test_retry_reclassifies_failed_batch() {
        let mut f = fixture();
        let (_, txn) = open_dinner(&f);
        let batch = parse_lines(&f, &[("2026-01-09", "PAIEMENT RESTAURANT NICE", "-42.00")]);
        f.conn
            .execute("UPDATE transactions SET reconciled = 1 WHERE id = ?1", [txn])
            .unwrap();
        confirm(&mut f.conn, f.user_id, batch.id, &[]).unwrap_err();

        let fresh = retry(&f.conn, f.user_id, batch.id, &Classifier::default()).unwrap();
        assert_ne!(fresh.id, batch.id);
        assert_eq!(fresh.status, BatchStatus::Pending);
        assert_eq!(fresh.match_results[0].match_type, MatchType::New);
        assert!(retry(&f.conn, f.user_id, fresh.id, &Classifier::default()).is_err());
    }
}
