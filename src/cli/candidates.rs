use comfy_table::{Cell, Table};

use crate::cli::open_session;
use crate::error::Result;
use crate::fmt::money;
use crate::ledger::account_by_name;
use crate::models::MatchCandidate;
use crate::normalizer::{parse_amount, parse_date};
use crate::reconciler::match_candidates;

pub(crate) fn candidate_table(candidates: &[MatchCandidate], date: chrono::NaiveDate) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Days", "Amount", "Description", "Payee"]);
    for c in candidates {
        table.add_row(vec![
            Cell::new(c.id),
            Cell::new(c.date),
            Cell::new(c.days_from(date)),
            Cell::new(money(c.amount)),
            Cell::new(&c.description),
            Cell::new(c.payee_name.clone().unwrap_or_default()),
        ]);
    }
    table
}

pub fn run(account: &str, amount: &str, date: &str) -> Result<()> {
    let s = open_session()?;
    let account = account_by_name(&s.conn, s.user_id, account)?;
    let amount = parse_amount(amount, &s.settings.amount_format)?;
    let date = parse_date(date, "%Y-%m-%d")?;

    let candidates = match_candidates(&s.conn, account.id, amount, date)?;
    if candidates.is_empty() {
        println!("No unreconciled transactions of {} in {}.", money(amount.abs()), account.name);
        return Ok(());
    }
    println!("Candidates\n{}", candidate_table(&candidates, date));
    Ok(())
}
