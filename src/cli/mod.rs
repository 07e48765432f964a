pub mod categorize;
pub mod init;
pub mod learn;
pub mod parse;
pub mod rules;
pub mod run;
pub mod status;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::categorizer::CategoryIndex;
use crate::error::{PennyError, Result};
use crate::ledger::{Ledger, YnabClient};
use crate::llm::AnthropicClient;
use crate::settings::Credentials;

#[derive(Parser)]
#[command(
    name = "penny",
    about = "Reconcile forwarded purchase and payment emails into a YNAB budget."
)]
pub struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write settings, create the data directory and a starter rule file.
    Init {
        /// Path for Penny data (default: ~/Documents/penny)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Directory holding forwarded .eml files (default: <data-dir>/inbox)
        #[arg(long = "mail-dir")]
        mail_dir: Option<String>,
    },
    /// Process new emails: match orders, record payments, categorize.
    Run {
        /// Show what would change without touching the ledger or marking mail
        #[arg(long)]
        dry_run: bool,
        /// Include emails already marked processed
        #[arg(long)]
        reprocess: bool,
        /// Lookback window in days (default from settings)
        #[arg(long)]
        days: Option<i64>,
        /// Maximum emails per run (default from settings)
        #[arg(long)]
        limit: Option<usize>,
        /// Reclassify recent ledger entries after the email batch
        #[arg(long)]
        reconcile: bool,
    },
    /// Reclassify recent ledger entries independently of email.
    Categorize {
        /// Days back to scan (default from settings)
        #[arg(long)]
        days: Option<i64>,
        /// Only this ledger account
        #[arg(long)]
        account: Option<String>,
        /// Leave entries that already have a category alone
        #[arg(long)]
        skip_categorized: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Learn keyword rules from approved, categorized ledger entries.
    Learn {
        #[arg(long)]
        dry_run: bool,
        /// Distinct entries a keyword must appear in
        #[arg(long, default_value_t = 3)]
        min_frequency: usize,
    },
    /// Manage category rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// Parse one .eml file and print what would be extracted.
    Parse {
        /// Path to the .eml file
        file: String,
        /// Force a parser (amazon_order, venmo_payment) instead of detecting one
        #[arg(long)]
        parser: Option<String>,
    },
    /// Show settings, mailbox state and rule counts.
    Status,
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// List all rules.
    List,
    /// Add a manual keyword rule.
    Add {
        /// Ledger category name
        category: String,
        /// Keyword (repeatable)
        #[arg(long = "keyword", short = 'k', required = true)]
        keywords: Vec<String>,
        #[arg(long, default_value_t = 0.9)]
        confidence: f64,
    },
}

// ---------------------------------------------------------------------------
// Shared collaborator setup
// ---------------------------------------------------------------------------

pub(crate) fn ledger_client(creds: &Credentials) -> Result<YnabClient> {
    let token = creds
        .ynab_token
        .as_deref()
        .ok_or(PennyError::MissingCredential("YNAB_ACCESS_TOKEN"))?;
    let budget = creds
        .ynab_budget_id
        .as_deref()
        .ok_or(PennyError::MissingCredential("YNAB_BUDGET_ID"))?;
    YnabClient::new(token, budget)
}

/// The generative classifier, or `None` when no key is configured.
pub(crate) fn generative_client(creds: &Credentials) -> Option<AnthropicClient> {
    let key = creds.anthropic_api_key.as_deref()?;
    match AnthropicClient::new(key, creds.anthropic_model.clone()) {
        Ok(client) => {
            info!(model = client.model(), "generative classification enabled");
            Some(client)
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), "generative classification disabled");
            None
        }
    }
}

/// Visible ledger categories. A failed listing leaves classification without
/// targets rather than failing the command.
pub(crate) fn category_index(ledger: &dyn Ledger) -> CategoryIndex {
    match ledger.list_categories() {
        Ok(groups) => {
            let index = CategoryIndex::from_groups(&groups);
            if index.is_empty() {
                warn!("ledger has no visible categories, nothing can be categorized");
            } else {
                info!(count = index.len(), "loaded ledger categories");
            }
            index
        }
        Err(e) => {
            warn!(error = %e, "could not list ledger categories");
            CategoryIndex::default()
        }
    }
}
