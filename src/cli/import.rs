use std::path::PathBuf;

use colored::Colorize;

use crate::batches::find_confirmed_by_checksum;
use crate::cli::batches::print_batch;
use crate::cli::{open_session, ImportArgs};
use crate::error::Result;
use crate::ledger::account_by_name;
use crate::normalizer::{read_statement, AmountFormat, ColumnMapping};
use crate::reconciler::{parse, ParseRequest};

fn mapping_from(args: &ImportArgs, default_date_format: &str) -> ColumnMapping {
    let split = args.debit_col.is_some() || args.credit_col.is_some();
    ColumnMapping {
        date_column: args.date_col,
        description_column: args.description_col,
        amount_column: args.amount_col.or(if split { None } else { Some(2) }),
        debit_column: args.debit_col,
        credit_column: args.credit_col,
        check_number_column: args.check_col,
        card_column: args.card_col,
        date_format: args
            .date_format
            .clone()
            .unwrap_or_else(|| default_date_format.to_string()),
        delimiter: args.delimiter,
        skip_rows: args.skip_rows,
    }
}

pub fn run(args: &ImportArgs) -> Result<()> {
    let s = open_session()?;
    let account = account_by_name(&s.conn, s.user_id, &args.account)?;
    let mapping = mapping_from(args, &s.settings.date_format);
    let format = AmountFormat {
        decimal_separator: args
            .decimal_separator
            .unwrap_or(s.settings.amount_format.decimal_separator),
        digit_grouping: args.grouping.unwrap_or(s.settings.amount_format.digit_grouping),
    };

    let statement = read_statement(&PathBuf::from(&args.file), &mapping)?;
    if let Some(prior) = find_confirmed_by_checksum(&s.conn, account.id, &statement.checksum)? {
        println!(
            "{}",
            format!("This statement was already confirmed in batch #{prior}; repeated rows will show as duplicates.")
                .yellow()
        );
    }

    let batch = parse(
        &s.conn,
        &ParseRequest {
            user_id: s.user_id,
            account_id: account.id,
            lines: &statement.lines,
            mapping: &mapping,
            format: &format,
            source_name: statement.source_name.as_deref(),
            checksum: Some(&statement.checksum),
        },
        &s.settings.classifier(),
    )?;
    print_batch(&s.conn, &batch)?;
    println!("Apply with `budgie confirm {}` (see --help for per-row overrides).", batch.id);
    Ok(())
}
