use chrono::Local;
use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::categorizer::Classifier;
use crate::coordinator::{BatchCoordinator, RunOptions, RunSummary};
use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::llm::GenerativeClassifier;
use crate::mailbox::EmlDirMailbox;
use crate::reconcile::ReconcileOptions;
use crate::router::UserRouter;
use crate::rules::{load_or_default, YamlRuleStore};
use crate::settings::{load_settings, Credentials};

pub fn run(dry_run: bool, reprocess: bool, days: Option<i64>, limit: Option<usize>, reconcile: bool) -> Result<()> {
    let settings = load_settings()?;
    let creds = Credentials::from_env();
    let ledger = super::ledger_client(&creds)?;

    let conn = get_connection(&settings.db_path())?;
    init_db(&conn)?;
    let mut mailbox = EmlDirMailbox::new(&settings.mail_path(), conn);

    let config = load_or_default(&YamlRuleStore::new(&settings.rules_path()));
    let index = super::category_index(&ledger);
    let model = super::generative_client(&creds);
    let classifier = Classifier::new(
        &config,
        &index,
        model.as_ref().map(|m| m as &dyn GenerativeClassifier),
    );
    let router = UserRouter::new(settings.users.clone());

    let mut options = RunOptions::from_settings(&settings);
    options.dry_run = dry_run;
    options.reprocess = reprocess;
    if let Some(days) = days {
        options.lookback_days = days;
    }
    if let Some(limit) = limit {
        options.fetch_limit = limit;
    }
    if reconcile {
        options.reconcile = Some(ReconcileOptions {
            days: settings.reconcile_days,
            vendor_token: settings.vendor_token.clone(),
            ..ReconcileOptions::default()
        });
    }

    if dry_run {
        println!("{}", "Dry run: nothing will be written.".yellow());
    }
    if !classifier.has_model() {
        println!("{}", "No ANTHROPIC_API_KEY: categorizing with keyword rules only.".dimmed());
    }
    let summary = BatchCoordinator::new(&mut mailbox, &ledger, &router, &classifier, options)
        .run(Local::now().date_naive());
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let mut table = Table::new();
    table.set_header(vec!["", "Count"]);
    let rows = [
        ("Emails fetched", summary.fetched),
        ("Order emails", summary.orders),
        ("Payment emails", summary.payments),
        ("Unrecognized", summary.unrecognized),
        ("Nothing extracted", summary.parse_misses),
        ("No user", summary.unattributed),
        ("Matched", summary.matched),
        ("Unmatched", summary.unmatched),
        ("Memos updated", summary.memos_updated),
        ("Created", summary.created),
        ("Already recorded", summary.duplicates),
        ("Categorized", summary.categorized),
        ("Errors", summary.errors),
    ];
    for (label, count) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(count)]);
    }
    println!("Run summary\n{table}");

    if let Some(stats) = &summary.reconcile {
        println!(
            "Reconciliation: {} processed, {} newly classified, {} updated, {} no match, {} errors",
            stats.processed, stats.newly_classified, stats.updated, stats.no_match, stats.errors
        );
    }
    if summary.errors > 0 {
        println!("{}", format!("{} error(s), see the log above.", summary.errors).red());
    }
}
