use colored::{ColoredString, Colorize};
use comfy_table::{Cell, Table};
use rusqlite::Connection;

use crate::batches::{get_batch, list_batches};
use crate::cli::open_session;
use crate::error::{BudgieError, Result};
use crate::fmt::money;
use crate::ledger::{account_by_id, account_by_name, payee_by_id};
use crate::models::{BatchStatus, ImportBatch, MatchType, RowResult};
use crate::reconciler;

fn match_label(match_type: MatchType) -> ColoredString {
    match match_type {
        MatchType::Duplicate => "duplicate".dimmed(),
        MatchType::Exact => "exact".green(),
        MatchType::Probable => "probable".yellow(),
        MatchType::New => "new".cyan(),
    }
}

fn status_label(status: BatchStatus) -> ColoredString {
    match status {
        BatchStatus::Pending => "pending".yellow(),
        BatchStatus::Confirmed => "confirmed".green(),
        BatchStatus::Failed => "failed".red(),
    }
}

fn target_text(conn: &Connection, user_id: i64, result: &RowResult) -> Result<String> {
    if let Some(id) = result.duplicate_of {
        return Ok(format!("dup of #{id}"));
    }
    if let Some(id) = result.matched_transaction_id {
        return Ok(format!("#{id}"));
    }
    if !result.candidates.is_empty() {
        return Ok(format!("{} candidates", result.candidates.len()));
    }
    if let Some(id) = result.suggested_payee_id {
        if let Some(p) = payee_by_id(conn, user_id, id)? {
            return Ok(p.name);
        }
    }
    Ok(result
        .suggested_payee_name
        .as_ref()
        .map(|n| format!("{n}?"))
        .unwrap_or_default())
}

/// Review table for one batch, rows numbered the way `confirm` expects.
pub(crate) fn print_batch(conn: &Connection, batch: &ImportBatch) -> Result<()> {
    let account = account_by_id(conn, batch.user_id, batch.account_id)?;
    println!(
        "Import batch #{} [{}] {} {}",
        batch.id,
        status_label(batch.status),
        account.name,
        batch.source_name.as_deref().unwrap_or("")
    );

    let mut table = Table::new();
    table.set_header(vec!["Row", "Line", "Date", "Amount", "Description", "Match", "Action", "Target / Payee"]);
    for result in &batch.match_results {
        let row = &batch.rows[result.row];
        table.add_row(vec![
            Cell::new(result.row),
            Cell::new(row.line),
            Cell::new(row.date),
            Cell::new(money(row.amount)),
            Cell::new(&row.description),
            Cell::new(match_label(result.match_type)),
            Cell::new(result.action),
            Cell::new(target_text(conn, batch.user_id, result)?),
        ]);
    }
    println!("{table}");
    println!(
        "{} rows: {} duplicate, {} exact, {} probable, {} new",
        batch.rows.len(),
        batch.count_of(MatchType::Duplicate),
        batch.count_of(MatchType::Exact),
        batch.count_of(MatchType::Probable),
        batch.count_of(MatchType::New)
    );
    if !batch.rejected.is_empty() {
        println!("{}", format!("{} lines rejected:", batch.rejected.len()).red());
        for r in &batch.rejected {
            println!("  line {}: {}", r.line, r.error);
        }
    }
    match batch.status {
        BatchStatus::Confirmed => println!(
            "{} matched, {} created, {} skipped",
            batch.matched_count, batch.created_count, batch.skipped_count
        ),
        BatchStatus::Failed => println!("Failed: {}", batch.error.as_deref().unwrap_or("unknown error")),
        BatchStatus::Pending => {}
    }
    Ok(())
}

pub fn list(account: Option<&str>) -> Result<()> {
    let s = open_session()?;
    let account_id = match account {
        Some(name) => Some(account_by_name(&s.conn, s.user_id, name)?.id),
        None => None,
    };
    let batches = list_batches(&s.conn, s.user_id, account_id)?;
    if batches.is_empty() {
        println!("No import batches.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Created", "Account", "Source", "Status", "Rows", "Matched", "Created", "Skipped"]);
    for b in batches {
        let account = account_by_id(&s.conn, s.user_id, b.account_id)?;
        table.add_row(vec![
            Cell::new(b.id),
            Cell::new(b.created_at.format("%Y-%m-%d %H:%M")),
            Cell::new(account.name),
            Cell::new(b.source_name.clone().unwrap_or_default()),
            Cell::new(status_label(b.status)),
            Cell::new(b.rows.len()),
            Cell::new(b.matched_count),
            Cell::new(b.created_count),
            Cell::new(b.skipped_count),
        ]);
    }
    println!("Import batches\n{table}");
    Ok(())
}

pub fn show(id: i64) -> Result<()> {
    let s = open_session()?;
    let batch = get_batch(&s.conn, id)?;
    if batch.user_id != s.user_id {
        return Err(BudgieError::NotFound(format!("import batch {id}")));
    }
    print_batch(&s.conn, &batch)
}

pub fn retry(id: i64) -> Result<()> {
    let s = open_session()?;
    let batch = reconciler::retry(&s.conn, s.user_id, id, &s.settings.classifier())?;
    println!("Re-classified batch #{id} as #{}", batch.id);
    print_batch(&s.conn, &batch)
}
