use comfy_table::{Cell, Table};

use crate::cli::open_session;
use crate::error::Result;
use crate::ledger;

pub fn add(name: &str) -> Result<()> {
    let s = open_session()?;
    let id = ledger::add_payee(&s.conn, s.user_id, name)?;
    println!("Added payee #{id}: {}", name.trim());
    Ok(())
}

pub fn list() -> Result<()> {
    let s = open_session()?;
    let mut table = Table::new();
    table.set_header(vec!["ID", "Name"]);
    for p in ledger::list_payees(&s.conn, s.user_id)? {
        table.add_row(vec![Cell::new(p.id), Cell::new(p.name)]);
    }
    println!("Payees\n{table}");
    Ok(())
}
