mod aliases;
mod batches;
mod candidates;
mod classifier;
mod cli;
mod db;
mod error;
mod fmt;
mod ledger;
mod models;
mod normalizer;
mod reconciler;
mod settings;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{AccountsCommands, AliasesCommands, BatchesCommands, Cli, Commands, PayeesCommands, TransactionsCommands};

fn init_tracing(verbose: bool) {
    let default = if verbose { "budgie=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("BUDGIE_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Init { data_dir, user } => cli::init::run(data_dir, user),
        Commands::Accounts { command } => match command {
            AccountsCommands::Add {
                name,
                account_type,
                institution,
                last_four,
            } => cli::accounts::add(&name, &account_type, institution.as_deref(), last_four.as_deref()),
            AccountsCommands::List => cli::accounts::list(),
        },
        Commands::Payees { command } => match command {
            PayeesCommands::Add { name } => cli::payees::add(&name),
            PayeesCommands::List => cli::payees::list(),
        },
        Commands::Transactions { command } => match command {
            TransactionsCommands::Add {
                account,
                date,
                amount,
                description,
                payee,
                check_number,
            } => cli::transactions::add(&cli::transactions::AddArgs {
                account: &account,
                date: &date,
                amount: &amount,
                description: &description,
                payee: payee.as_deref(),
                check_number: check_number.as_deref(),
            }),
            TransactionsCommands::List { account } => cli::transactions::list(&account),
        },
        Commands::Import(args) => cli::import::run(&args),
        Commands::Candidates { account, amount, date } => cli::candidates::run(&account, &amount, &date),
        Commands::Confirm(args) => cli::confirm::run(&args),
        Commands::Batches { command } => match command {
            BatchesCommands::List { account } => cli::batches::list(account.as_deref()),
            BatchesCommands::Show { id } => cli::batches::show(id),
            BatchesCommands::Retry { id } => cli::batches::retry(id),
        },
        Commands::Aliases { command } => match command {
            AliasesCommands::List => cli::aliases::list(),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
