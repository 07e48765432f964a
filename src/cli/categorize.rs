use chrono::Local;
use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::categorizer::Classifier;
use crate::error::Result;
use crate::fmt::clip;
use crate::llm::GenerativeClassifier;
use crate::reconcile::{bulk_categorize, ReconcileOptions};
use crate::rules::{load_or_default, YamlRuleStore};
use crate::settings::{load_settings, Credentials};

pub fn run(days: Option<i64>, account: Option<String>, skip_categorized: bool, dry_run: bool) -> Result<()> {
    let settings = load_settings()?;
    let creds = Credentials::from_env();
    let ledger = super::ledger_client(&creds)?;

    let config = load_or_default(&YamlRuleStore::new(&settings.rules_path()));
    let index = super::category_index(&ledger);
    let model = super::generative_client(&creds);
    let classifier = Classifier::new(
        &config,
        &index,
        model.as_ref().map(|m| m as &dyn GenerativeClassifier),
    );

    let options = ReconcileOptions {
        days: days.unwrap_or(settings.reconcile_days),
        account,
        skip_categorized,
        dry_run,
        vendor_token: settings.vendor_token.clone(),
    };
    if dry_run {
        println!("{}", "Dry run: no categories will be written.".yellow());
    }
    let report = bulk_categorize(&ledger, &classifier, &options, Local::now().date_naive())?;

    if !report.changes.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Date", "Payee", "From", "To"]);
        for change in &report.changes {
            table.add_row(vec![
                Cell::new(change.date),
                Cell::new(clip(&change.payee, 40)),
                Cell::new(change.from.as_deref().unwrap_or("(none)")),
                Cell::new(&change.to),
            ]);
        }
        println!("{table}");
    }

    let stats = &report.stats;
    println!(
        "{} processed, {} classified ({} newly, {} changed), {} skipped, {} no match",
        stats.processed, stats.classified, stats.newly_classified, stats.updated, stats.skipped, stats.no_match
    );
    if stats.errors > 0 {
        println!("{}", format!("{} update(s) failed", stats.errors).red());
    }
    Ok(())
}
