use comfy_table::{Cell, Table};

use crate::batches::get_batch;
use crate::cli::{open_session, ConfirmArgs};
use crate::error::{BudgieError, Result};
use crate::fmt::money;
use crate::models::{RowAction, RowOverride, Transaction};
use crate::reconciler::{EffectiveAction, PayeeChoice, Review};

fn transaction_table(txns: &[Transaction]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Amount", "Description"]);
    for t in txns {
        table.add_row(vec![
            Cell::new(t.id),
            Cell::new(t.date),
            Cell::new(money(t.amount)),
            Cell::new(&t.description),
        ]);
    }
    table
}

fn describe(action: &EffectiveAction) -> String {
    let payee = |p: &Option<PayeeChoice>| match p {
        Some(PayeeChoice::Existing(id)) => format!(", payee #{id}"),
        Some(PayeeChoice::New(name)) => format!(", new payee '{name}'"),
        None => String::new(),
    };
    match action {
        EffectiveAction::Skip => "skip".to_string(),
        EffectiveAction::Create { payee: p, .. } => format!("create{}", payee(p)),
        EffectiveAction::Match { transaction_id, payee: p } => format!("match #{transaction_id}{}", payee(p)),
    }
}

pub fn run(args: &ConfirmArgs) -> Result<()> {
    let mut s = open_session()?;
    let batch = get_batch(&s.conn, args.batch)?;
    if batch.user_id != s.user_id {
        return Err(BudgieError::NotFound(format!("import batch {}", args.batch)));
    }
    let mut review = Review::new(batch);

    if let Some(path) = &args.overrides {
        let content = std::fs::read_to_string(path)?;
        let overrides: Vec<RowOverride> = serde_json::from_str(&content)?;
        for ov in overrides {
            review.apply(ov)?;
        }
    }
    for &row in &args.skip {
        review.set_action(row, RowAction::Skip)?;
    }
    for &row in &args.create {
        review.set_action(row, RowAction::Create)?;
    }
    for &(row, txn) in &args.matches {
        review.set_match(&s.conn, row, txn)?;
    }
    for &(row, payee) in &args.payees {
        review.set_payee(row, payee)?;
    }
    for (row, name) in &args.new_payees {
        review.new_payee(*row, name)?;
    }

    if args.dry_run {
        for (row, effective) in review.effective_rows().iter().enumerate() {
            match effective {
                Ok(action) => println!("row {row}: {}", describe(action)),
                Err(issue) => println!("row {row}: invalid, {issue}"),
            }
        }
        return Ok(());
    }

    let summary = review.confirm(&mut s.conn)?;
    println!(
        "Confirmed batch #{}: {} created, {} reconciled, {} skipped",
        summary.batch_id, summary.created, summary.reconciled, summary.skipped
    );
    if !summary.created_transactions.is_empty() {
        println!("Created\n{}", transaction_table(&summary.created_transactions));
    }
    if !summary.reconciled_transactions.is_empty() {
        println!("Reconciled\n{}", transaction_table(&summary.reconciled_transactions));
    }
    Ok(())
}
