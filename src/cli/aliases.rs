use comfy_table::{Cell, Table};

use crate::aliases::list_aliases;
use crate::cli::open_session;
use crate::error::Result;

pub fn list() -> Result<()> {
    let s = open_session()?;
    let aliases = list_aliases(&s.conn, s.user_id)?;
    if aliases.is_empty() {
        println!("No payee aliases learned yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Pattern", "Payee", "Example", "Hits", "Last Matched"]);
    for a in aliases {
        table.add_row(vec![
            Cell::new(a.normalized_pattern),
            Cell::new(a.payee_name),
            Cell::new(a.bank_description),
            Cell::new(a.times_matched),
            Cell::new(a.last_matched_at.format("%Y-%m-%d %H:%M")),
        ]);
    }
    println!("Payee aliases\n{table}");
    Ok(())
}
