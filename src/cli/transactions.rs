use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::open_session;
use crate::error::Result;
use crate::fmt::money;
use crate::ledger::{self, NewTransaction};
use crate::normalizer::{parse_amount, parse_date};

pub struct AddArgs<'a> {
    pub account: &'a str,
    pub date: &'a str,
    pub amount: &'a str,
    pub description: &'a str,
    pub payee: Option<&'a str>,
    pub check_number: Option<&'a str>,
}

pub fn add(args: &AddArgs<'_>) -> Result<()> {
    let s = open_session()?;
    let account = ledger::account_by_name(&s.conn, s.user_id, args.account)?;
    let amount = parse_amount(args.amount, &s.settings.amount_format)?;
    let date = parse_date(args.date, "%Y-%m-%d")?;
    let payee_id = match args.payee {
        Some(name) => Some(ledger::ensure_payee(&s.conn, s.user_id, name)?),
        None => None,
    };
    let id = ledger::insert_transaction(
        &s.conn,
        &NewTransaction {
            account_id: account.id,
            date,
            amount,
            description: args.description,
            bank_description: None,
            payee_id,
            check_number: args.check_number,
            import_batch_id: None,
        },
    )?;
    println!("Added transaction #{id}: {date} {} {}", money(amount), args.description);
    Ok(())
}

pub fn list(account: &str) -> Result<()> {
    let s = open_session()?;
    let account = ledger::account_by_name(&s.conn, s.user_id, account)?;
    let payees = ledger::list_payees(&s.conn, s.user_id)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Amount", "Description", "Payee", "Reconciled"]);
    for t in ledger::list_transactions(&s.conn, account.id)? {
        let payee = t
            .payee_id
            .and_then(|id| payees.iter().find(|p| p.id == id))
            .map(|p| p.name.clone())
            .unwrap_or_default();
        let reconciled = if t.reconciled {
            "yes".green().to_string()
        } else {
            "no".dimmed().to_string()
        };
        table.add_row(vec![
            Cell::new(t.id),
            Cell::new(t.date),
            Cell::new(money(t.amount)),
            Cell::new(t.description),
            Cell::new(payee),
            Cell::new(reconciled),
        ]);
    }
    println!("{}\n{table}", account.name);
    Ok(())
}
