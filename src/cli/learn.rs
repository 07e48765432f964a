use chrono::Local;
use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::learner::{apply, learn, since_date};
use crate::ledger::Ledger;
use crate::rules::{load_or_default, RuleStore, YamlRuleStore};
use crate::settings::{load_settings, Credentials};

pub fn run(dry_run: bool, min_frequency: usize) -> Result<()> {
    let settings = load_settings()?;
    let store = YamlRuleStore::new(&settings.rules_path());
    let config = load_or_default(&store);
    if !config.learning.enabled {
        println!(
            "{} (learning.enabled is false in {})",
            "Learning is disabled".yellow(),
            store.path().display()
        );
        return Ok(());
    }
    let ledger = super::ledger_client(&Credentials::from_env())?;

    let now = Local::now().naive_local();
    let since = since_date(&config, now.date());
    println!("Scanning approved entries since {since}");
    let entries = ledger.list_transactions(since)?;
    let outcome = learn(&entries, &config, min_frequency, now);

    println!("{} approved, categorized entries examined", outcome.examined);
    for category in &outcome.skipped {
        println!("  {} {category} already has rules", "skip".dimmed());
    }
    if outcome.proposed.is_empty() {
        println!("No new rules.");
    } else {
        let mut table = Table::new();
        table.set_header(vec!["Category", "Keywords", "Samples"]);
        for rule in &outcome.proposed {
            table.add_row(vec![
                Cell::new(&rule.category),
                Cell::new(rule.keywords.join(", ")),
                Cell::new(rule.sample_count.unwrap_or_default()),
            ]);
        }
        println!("{table}");
    }

    if dry_run {
        println!("{}", "Dry run: rule file left unchanged.".yellow());
        return Ok(());
    }
    let mut next = apply(&config, &outcome, now);
    store.save(&mut next)?;
    println!(
        "{} {} rule(s) learned, saved to {} (revision {})",
        "✓".green(),
        outcome.proposed.len(),
        store.path().display(),
        next.revision
    );
    Ok(())
}
