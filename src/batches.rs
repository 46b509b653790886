use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use crate::error::{BudgieError, Result};
use crate::models::{BatchStatus, ImportBatch, ImportRow, RejectedLine, RowResult};

pub struct NewBatch<'a> {
    pub user_id: i64,
    pub account_id: i64,
    pub source_name: Option<&'a str>,
    pub checksum: Option<&'a str>,
    pub rows: &'a [ImportRow],
    pub rejected: &'a [RejectedLine],
    pub match_results: &'a [RowResult],
}

pub fn create_batch(conn: &Connection, batch: &NewBatch<'_>) -> Result<i64> {
    conn.execute(
        "INSERT INTO import_batches (user_id, account_id, status, source_name, checksum, parsed_data, rejected_data, match_results) \
         VALUES (?1, ?2, 'pending', ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            batch.user_id,
            batch.account_id,
            batch.source_name,
            batch.checksum,
            serde_json::to_string(batch.rows)?,
            serde_json::to_string(batch.rejected)?,
            serde_json::to_string(batch.match_results)?,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

const BATCH_COLUMNS: &str = "id, user_id, account_id, status, source_name, checksum, parsed_data, rejected_data, \
     match_results, matched_count, created_count, skipped_count, error, created_at, updated_at, confirmed_at";

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_batch(row: &Row<'_>) -> rusqlite::Result<ImportBatch> {
    let status: String = row.get(3)?;
    let status = status.parse::<BatchStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into())
    })?;
    Ok(ImportBatch {
        id: row.get(0)?,
        user_id: row.get(1)?,
        account_id: row.get(2)?,
        status,
        source_name: row.get(4)?,
        checksum: row.get(5)?,
        rows: json_column(row, 6)?,
        rejected: json_column(row, 7)?,
        match_results: json_column(row, 8)?,
        matched_count: row.get(9)?,
        created_count: row.get(10)?,
        skipped_count: row.get(11)?,
        error: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
        confirmed_at: row.get(15)?,
    })
}

pub fn get_batch(conn: &Connection, id: i64) -> Result<ImportBatch> {
    conn.query_row(
        &format!("SELECT {BATCH_COLUMNS} FROM import_batches WHERE id = ?1"),
        [id],
        row_to_batch,
    )
    .optional()?
    .ok_or_else(|| BudgieError::NotFound(format!("import batch {id}")))
}

pub fn list_batches(conn: &Connection, user_id: i64, account_id: Option<i64>) -> Result<Vec<ImportBatch>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BATCH_COLUMNS} FROM import_batches \
         WHERE user_id = ?1 AND (?2 IS NULL OR account_id = ?2) ORDER BY id DESC"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![user_id, account_id], row_to_batch)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Confirmed batch of this account built from a byte-identical statement.
pub fn find_confirmed_by_checksum(conn: &Connection, account_id: i64, checksum: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM import_batches WHERE account_id = ?1 AND checksum = ?2 AND status = 'confirmed' \
             ORDER BY id LIMIT 1",
            rusqlite::params![account_id, checksum],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn closed(conn: &Connection, id: i64) -> BudgieError {
    match get_batch(conn, id) {
        Ok(batch) => BudgieError::BatchClosed {
            id,
            status: batch.status.to_string(),
        },
        Err(e) => e,
    }
}

pub struct ConfirmedCounts {
    pub matched: usize,
    pub created: usize,
    pub skipped: usize,
}

/// `pending → confirmed`, storing the effective per-row results.
pub fn mark_confirmed(
    conn: &Connection,
    id: i64,
    results: &[RowResult],
    counts: &ConfirmedCounts,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE import_batches SET status = 'confirmed', match_results = ?2, matched_count = ?3, \
             created_count = ?4, skipped_count = ?5, error = NULL, updated_at = datetime('now'), \
             confirmed_at = datetime('now') \
         WHERE id = ?1 AND status = 'pending'",
        rusqlite::params![
            id,
            serde_json::to_string(results)?,
            counts.matched as i64,
            counts.created as i64,
            counts.skipped as i64,
        ],
    )?;
    if updated == 0 {
        return Err(closed(conn, id));
    }
    Ok(())
}

/// `pending → failed`, keeping the reason for the audit trail.
pub fn mark_failed(conn: &Connection, id: i64, reason: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE import_batches SET status = 'failed', error = ?2, updated_at = datetime('now') \
         WHERE id = ?1 AND status = 'pending'",
        rusqlite::params![id, reason],
    )?;
    if updated == 0 {
        return Err(closed(conn, id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::tests::date;
    use crate::db::testing::fixture;
    use crate::models::{MatchType, RowAction};
    use rust_decimal_macros::dec;

    fn sample_rows() -> (Vec<ImportRow>, Vec<RejectedLine>, Vec<RowResult>) {
        let rows = vec![ImportRow {
            line: 2,
            date: date("2026-01-12"),
            amount: dec!(-777.77),
            description: "PAIEMENT CB MAGASIN".to_string(),
            check_number: None,
            card_suffix: None,
        }];
        let rejected = vec![RejectedLine {
            line: 3,
            raw: vec!["??".to_string()],
            error: "date '??' does not match format '%Y-%m-%d'".to_string(),
        }];
        let results = vec![RowResult {
            row: 0,
            match_type: MatchType::New,
            score: None,
            suggested_payee_id: None,
            suggested_payee_name: Some("Magasin".to_string()),
            action: RowAction::Create,
            matched_transaction_id: None,
            duplicate_of: None,
            candidates: vec![],
        }];
        (rows, rejected, results)
    }

    fn new_batch(conn: &Connection, user_id: i64, account_id: i64) -> i64 {
        let (rows, rejected, results) = sample_rows();
        create_batch(
            conn,
            &NewBatch {
                user_id,
                account_id,
                source_name: Some("janvier.csv"),
                checksum: Some("abc"),
                rows: &rows,
                rejected: &rejected,
                match_results: &results,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_create_and_load_batch() {
        let f = fixture();
        let id = new_batch(&f.conn, f.user_id, f.account_id);
        let batch = get_batch(&f.conn, id).unwrap();
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rows[0].amount, dec!(-777.77));
        assert_eq!(batch.rejected[0].line, 3);
        assert_eq!(batch.match_results[0].suggested_payee_name.as_deref(), Some("Magasin"));
        assert_eq!(batch.source_name.as_deref(), Some("janvier.csv"));
        assert!(batch.confirmed_at.is_none());
    }

    #[test]
    fn test_missing_batch_is_not_found() {
        let f = fixture();
        assert!(matches!(get_batch(&f.conn, 99), Err(BudgieError::NotFound(_))));
    }

    #[test]
    fn test_confirm_is_terminal() {
        let f = fixture();
        let id = new_batch(&f.conn, f.user_id, f.account_id);
        let counts = ConfirmedCounts {
            matched: 0,
            created: 1,
            skipped: 0,
        };
        mark_confirmed(&f.conn, id, &sample_rows().2, &counts).unwrap();
        let batch = get_batch(&f.conn, id).unwrap();
        assert_eq!(batch.status, BatchStatus::Confirmed);
        assert_eq!(batch.created_count, 1);
        assert!(batch.confirmed_at.is_some());

        let again = mark_confirmed(&f.conn, id, &sample_rows().2, &counts).unwrap_err();
        assert!(matches!(again, BudgieError::BatchClosed { .. }));
        assert!(mark_failed(&f.conn, id, "late").is_err());
        assert_eq!(find_confirmed_by_checksum(&f.conn, f.account_id, "abc").unwrap(), Some(id));
    }

    #[test]
    fn test_failed_keeps_reason() {
        let f = fixture();
        let id = new_batch(&f.conn, f.user_id, f.account_id);
        mark_failed(&f.conn, id, "line 2: transaction 7 is already reconciled").unwrap();
        let batch = get_batch(&f.conn, id).unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert!(batch.error.unwrap().contains("already reconciled"));
        assert_eq!(find_confirmed_by_checksum(&f.conn, f.account_id, "abc").unwrap(), None);
    }

    #[test]
    fn test_list_batches_filters_account() {
        let f = fixture();
        let first = new_batch(&f.conn, f.user_id, f.account_id);
        let other = crate::ledger::add_account(&f.conn, f.user_id, "Livret A", "savings", None, None).unwrap();
        let second = new_batch(&f.conn, f.user_id, other);
        let all = list_batches(&f.conn, f.user_id, None).unwrap();
        assert_eq!(all.iter().map(|b| b.id).collect::<Vec<_>>(), vec![second, first]);
        let only = list_batches(&f.conn, f.user_id, Some(f.account_id)).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].id, first);
    }
}
