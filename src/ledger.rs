//! Thin account, payee and transaction storage the import engine reads and writes.

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use rust_decimal::Decimal;

use crate::error::{BudgieError, Result};
use crate::models::{from_cents, to_cents, Account, Payee, Transaction};

pub fn ensure_user(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute("INSERT OR IGNORE INTO users (name) VALUES (?1)", [name])?;
    let id = conn.query_row("SELECT id FROM users WHERE name = ?1", [name], |r| r.get(0))?;
    Ok(id)
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

pub fn add_account(
    conn: &Connection,
    user_id: i64,
    name: &str,
    account_type: &str,
    institution: Option<&str>,
    last_four: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO accounts (user_id, name, account_type, institution, last_four) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![user_id, name, account_type, institution, last_four],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        account_type: row.get(3)?,
        institution: row.get(4)?,
        last_four: row.get(5)?,
    })
}

const ACCOUNT_COLUMNS: &str = "id, user_id, name, account_type, institution, last_four";

pub fn account_by_name(conn: &Connection, user_id: i64, name: &str) -> Result<Account> {
    conn.query_row(
        &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = ?1 AND name = ?2"),
        rusqlite::params![user_id, name],
        row_to_account,
    )
    .optional()?
    .ok_or_else(|| BudgieError::UnknownAccount(name.to_string()))
}

pub fn account_by_id(conn: &Connection, user_id: i64, id: i64) -> Result<Account> {
    conn.query_row(
        &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = ?1 AND id = ?2"),
        rusqlite::params![user_id, id],
        row_to_account,
    )
    .optional()?
    .ok_or_else(|| BudgieError::UnknownAccount(format!("#{id}")))
}

pub fn list_accounts(conn: &Connection, user_id: i64) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = ?1 ORDER BY name"
    ))?;
    let rows = stmt
        .query_map([user_id], row_to_account)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Payees
// ---------------------------------------------------------------------------

pub fn add_payee(conn: &Connection, user_id: i64, name: &str) -> Result<i64> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BudgieError::Other("payee name is empty".to_string()));
    }
    conn.execute(
        "INSERT INTO payees (user_id, name) VALUES (?1, ?2)",
        rusqlite::params![user_id, name],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Existing payee with this name, or a newly created one.
pub fn ensure_payee(conn: &Connection, user_id: i64, name: &str) -> Result<i64> {
    match payee_by_name(conn, user_id, name.trim())? {
        Some(payee) => Ok(payee.id),
        None => add_payee(conn, user_id, name),
    }
}

pub fn payee_by_id(conn: &Connection, user_id: i64, id: i64) -> Result<Option<Payee>> {
    let payee = conn
        .query_row(
            "SELECT id, user_id, name FROM payees WHERE id = ?1 AND user_id = ?2",
            rusqlite::params![id, user_id],
            |row| {
                Ok(Payee {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(payee)
}

pub fn payee_by_name(conn: &Connection, user_id: i64, name: &str) -> Result<Option<Payee>> {
    let payee = conn
        .query_row(
            "SELECT id, user_id, name FROM payees WHERE user_id = ?1 AND name = ?2",
            rusqlite::params![user_id, name],
            |row| {
                Ok(Payee {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(payee)
}

pub fn list_payees(conn: &Connection, user_id: i64) -> Result<Vec<Payee>> {
    let mut stmt = conn.prepare("SELECT id, user_id, name FROM payees WHERE user_id = ?1 ORDER BY name")?;
    let rows = stmt
        .query_map([user_id], |row| {
            Ok(Payee {
                id: row.get(0)?,
                user_id: row.get(1)?,
                name: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

pub(crate) const TRANSACTION_COLUMNS: &str = "id, account_id, date, amount_cents, description, bank_description, \
     payee_id, check_number, reconciled, import_batch_id, reconciled_batch_id";

pub(crate) fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get(0)?,
        account_id: row.get(1)?,
        date: row.get(2)?,
        amount: from_cents(row.get(3)?),
        description: row.get(4)?,
        bank_description: row.get(5)?,
        payee_id: row.get(6)?,
        check_number: row.get(7)?,
        reconciled: row.get::<_, i64>(8)? != 0,
        import_batch_id: row.get(9)?,
        reconciled_batch_id: row.get(10)?,
    })
}

pub struct NewTransaction<'a> {
    pub account_id: i64,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub description: &'a str,
    pub bank_description: Option<&'a str>,
    pub payee_id: Option<i64>,
    pub check_number: Option<&'a str>,
    pub import_batch_id: Option<i64>,
}

pub fn insert_transaction(conn: &Connection, txn: &NewTransaction<'_>) -> Result<i64> {
    let cents = to_cents(txn.amount)
        .ok_or_else(|| BudgieError::Other(format!("amount {} cannot be stored in cents", txn.amount)))?;
    conn.execute(
        "INSERT INTO transactions (account_id, date, amount_cents, description, bank_description, payee_id, check_number, import_batch_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            txn.account_id,
            txn.date,
            cents,
            txn.description,
            txn.bank_description,
            txn.payee_id,
            txn.check_number,
            txn.import_batch_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_transaction(conn: &Connection, id: i64) -> Result<Option<Transaction>> {
    let txn = conn
        .query_row(
            &format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?1"),
            [id],
            row_to_transaction,
        )
        .optional()?;
    Ok(txn)
}

pub fn list_transactions(conn: &Connection, account_id: i64) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = ?1 ORDER BY date, id"
    ))?;
    let rows = stmt
        .query_map([account_id], row_to_transaction)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
