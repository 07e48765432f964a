mod categorizer;
mod cli;
mod coordinator;
mod db;
mod error;
mod fmt;
mod learner;
mod ledger;
mod llm;
mod mailbox;
mod matcher;
mod models;
mod parsers;
mod reconcile;
mod router;
mod rules;
mod settings;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, RulesCommands};

fn init_tracing(verbose: bool) {
    let default = if verbose { "penny=debug" } else { "penny=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        None | Some(Commands::Status) => cli::status::run(),
        Some(Commands::Init { data_dir, mail_dir }) => cli::init::run(data_dir, mail_dir),
        Some(Commands::Run {
            dry_run,
            reprocess,
            days,
            limit,
            reconcile,
        }) => cli::run::run(dry_run, reprocess, days, limit, reconcile),
        Some(Commands::Categorize {
            days,
            account,
            skip_categorized,
            dry_run,
        }) => cli::categorize::run(days, account, skip_categorized, dry_run),
        Some(Commands::Learn {
            dry_run,
            min_frequency,
        }) => cli::learn::run(dry_run, min_frequency),
        Some(Commands::Rules { command }) => match command {
            RulesCommands::List => cli::rules::list(),
            RulesCommands::Add {
                category,
                keywords,
                confidence,
            } => cli::rules::add(&category, &keywords, confidence),
        },
        Some(Commands::Parse { file, parser }) => cli::parse::run(&file, parser.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
