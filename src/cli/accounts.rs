use comfy_table::{Cell, Table};

use crate::cli::open_session;
use crate::error::Result;
use crate::ledger;

pub fn add(name: &str, account_type: &str, institution: Option<&str>, last_four: Option<&str>) -> Result<()> {
    let s = open_session()?;
    ledger::add_account(&s.conn, s.user_id, name, account_type, institution, last_four)?;
    println!("Added account: {name}");
    Ok(())
}

pub fn list() -> Result<()> {
    let s = open_session()?;
    let accounts = ledger::list_accounts(&s.conn, s.user_id)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Type", "Institution", "Last Four"]);
    for a in accounts {
        table.add_row(vec![
            Cell::new(a.id),
            Cell::new(a.name),
            Cell::new(a.account_type),
            Cell::new(a.institution.unwrap_or_default()),
            Cell::new(a.last_four.unwrap_or_default()),
        ]);
    }
    println!("Accounts\n{table}");
    Ok(())
}
