pub mod accounts;
pub mod aliases;
pub mod batches;
pub mod candidates;
pub mod confirm;
pub mod import;
pub mod init;
pub mod payees;
pub mod transactions;

use std::fmt::Display;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use rusqlite::Connection;

use crate::db::get_connection;
use crate::error::{BudgieError, Result};
use crate::ledger::ensure_user;
use crate::normalizer::{DecimalSeparator, DigitGrouping};
use crate::settings::{load_settings, Settings};

/// Open settings, database and current user for a command.
pub(crate) struct Session {
    pub settings: Settings,
    pub conn: Connection,
    pub user_id: i64,
}

pub(crate) fn open_session() -> Result<Session> {
    let settings = load_settings();
    let db_path = settings.db_path();
    if !db_path.exists() {
        return Err(BudgieError::Other(format!(
            "Database not found at {}. Run `budgie init` to set up.",
            db_path.display()
        )));
    }
    let conn = get_connection(&db_path)?;
    let user_id = ensure_user(&conn, &settings.user_name)?;
    Ok(Session {
        settings,
        conn,
        user_id,
    })
}

/// `ROW=VALUE` pair used by the confirm flags.
pub(crate) fn parse_pair<T>(s: &str) -> std::result::Result<(usize, T), String>
where
    T: FromStr,
    T::Err: Display,
{
    let (row, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ROW=VALUE, got '{s}'"))?;
    let row = row
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("bad row '{row}': {e}"))?;
    let value = value
        .trim()
        .parse::<T>()
        .map_err(|e| format!("bad value '{value}': {e}"))?;
    Ok((row, value))
}

#[derive(Parser)]
#[command(name = "budgie", about = "Household budget CLI: import bank statements and reconcile them.")]
pub struct Cli {
    /// Log engine decisions to stderr (same as BUDGIE_LOG=budgie=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the database.
    Init {
        /// Path for budgie data (default: ~/Documents/budgie)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Name of the budget owner
        #[arg(long)]
        user: Option<String>,
    },
    /// Manage accounts.
    Accounts {
        #[command(subcommand)]
        command: AccountsCommands,
    },
    /// Manage payees.
    Payees {
        #[command(subcommand)]
        command: PayeesCommands,
    },
    /// Enter or list ledger transactions.
    Transactions {
        #[command(subcommand)]
        command: TransactionsCommands,
    },
    /// Parse a statement file and classify it into a pending import batch.
    Import(ImportArgs),
    /// Search unreconciled transactions for an amount.
    Candidates {
        /// Account name
        #[arg(long)]
        account: String,
        /// Statement amount (sign is ignored)
        #[arg(long, allow_hyphen_values = true)]
        amount: String,
        /// Statement date: YYYY-MM-DD
        #[arg(long)]
        date: String,
    },
    /// Apply a pending import batch to the ledger.
    Confirm(ConfirmArgs),
    /// Inspect import batches.
    Batches {
        #[command(subcommand)]
        command: BatchesCommands,
    },
    /// Inspect learned payee aliases.
    Aliases {
        #[command(subcommand)]
        command: AliasesCommands,
    },
}

#[derive(Subcommand)]
pub enum AccountsCommands {
    /// Add a new account.
    Add {
        /// Account name, e.g. 'Compte Courant'
        name: String,
        /// Account type: checking, savings, credit_card
        #[arg(long = "type", default_value = "checking")]
        account_type: String,
        /// Institution name
        #[arg(long)]
        institution: Option<String>,
        /// Last 4 digits of account number
        #[arg(long = "last-four")]
        last_four: Option<String>,
    },
    /// List all accounts.
    List,
}

#[derive(Subcommand)]
pub enum PayeesCommands {
    /// Add a payee.
    Add { name: String },
    /// List all payees.
    List,
}

#[derive(Subcommand)]
pub enum TransactionsCommands {
    /// Enter a transaction by hand.
    Add {
        #[arg(long)]
        account: String,
        /// YYYY-MM-DD
        #[arg(long)]
        date: String,
        /// Signed amount, negative for spending
        #[arg(long, allow_hyphen_values = true)]
        amount: String,
        #[arg(long)]
        description: String,
        /// Payee name (created if new)
        #[arg(long)]
        payee: Option<String>,
        #[arg(long = "check")]
        check_number: Option<String>,
    },
    /// List transactions of an account.
    List {
        #[arg(long)]
        account: String,
    },
}

#[derive(clap::Args)]
pub struct ImportArgs {
    /// Path to the statement file (CSV or other delimited text)
    pub file: String,
    /// Account name to reconcile against
    #[arg(long)]
    pub account: String,
    /// Column index (0-based) of the date
    #[arg(long = "date-col", default_value = "0")]
    pub date_col: usize,
    /// Column index of the description
    #[arg(long = "description-col", default_value = "1")]
    pub description_col: usize,
    /// Column index of a signed amount (default 2 unless debit/credit columns are given)
    #[arg(long = "amount-col")]
    pub amount_col: Option<usize>,
    #[arg(long = "debit-col")]
    pub debit_col: Option<usize>,
    #[arg(long = "credit-col")]
    pub credit_col: Option<usize>,
    #[arg(long = "check-col")]
    pub check_col: Option<usize>,
    #[arg(long = "card-col")]
    pub card_col: Option<usize>,
    /// Date format, chrono (%d/%m/%Y) or tokens (DD/MM/YYYY); default from settings
    #[arg(long = "date-format")]
    pub date_format: Option<String>,
    #[arg(long, default_value = ",")]
    pub delimiter: char,
    /// Header lines to skip
    #[arg(long = "skip-rows", default_value = "0")]
    pub skip_rows: usize,
    /// Decimal separator: dot or comma; default from settings
    #[arg(long = "decimal-separator")]
    pub decimal_separator: Option<DecimalSeparator>,
    /// Digit grouping: none, space, comma or dot; default from settings
    #[arg(long)]
    pub grouping: Option<DigitGrouping>,
}

#[derive(clap::Args)]
pub struct ConfirmArgs {
    /// Import batch ID
    pub batch: i64,
    /// Skip ROW (repeatable)
    #[arg(long)]
    pub skip: Vec<usize>,
    /// Create a new transaction for ROW
    #[arg(long)]
    pub create: Vec<usize>,
    /// Reconcile ROW with transaction ID: ROW=ID
    #[arg(long = "match", value_parser = parse_pair::<i64>)]
    pub matches: Vec<(usize, i64)>,
    /// Assign existing payee ID to ROW: ROW=ID
    #[arg(long = "payee", value_parser = parse_pair::<i64>)]
    pub payees: Vec<(usize, i64)>,
    /// Create payee NAME for ROW: ROW=NAME
    #[arg(long = "new-payee", value_parser = parse_pair::<String>)]
    pub new_payees: Vec<(usize, String)>,
    /// JSON file with a list of row overrides
    #[arg(long)]
    pub overrides: Option<String>,
    /// Print the effective action of every row without writing anything
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum BatchesCommands {
    /// List import batches, newest first.
    List {
        /// Only batches of this account
        #[arg(long)]
        account: Option<String>,
    },
    /// Show the rows and classification of a batch.
    Show { id: i64 },
    /// Re-classify a failed batch into a new pending batch.
    Retry { id: i64 },
}

#[derive(Subcommand)]
pub enum AliasesCommands {
    /// List learned description patterns.
    List,
}
