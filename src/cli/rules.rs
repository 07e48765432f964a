use comfy_table::{Cell, Table};

use crate::error::{PennyError, Result};
use crate::rules::{CategoryRule, RuleStore, YamlRuleStore};
use crate::settings::load_settings;

pub fn list() -> Result<()> {
    let settings = load_settings()?;
    let store = YamlRuleStore::new(&settings.rules_path());
    if !store.exists() {
        println!("No rule file at {}. Run `penny init` to create one.", store.path().display());
        return Ok(());
    }
    let config = store.load()?;

    let mut table = Table::new();
    table.set_header(vec!["Category", "Keywords", "Confidence", "Source", "Excluded when"]);
    for rule in &config.rules {
        table.add_row(vec![
            Cell::new(&rule.category),
            Cell::new(rule.keywords.join(", ")),
            Cell::new(format!("{:.2}", rule.confidence)),
            Cell::new(rule.source.label()),
            Cell::new(rule.exclude_when.join(", ")),
        ]);
    }
    println!("Rules (revision {})\n{table}", config.revision);
    println!(
        "Minimum confidence {:.2}, model threshold {:.2}",
        config.conservative.minimum_confidence, config.llm.confidence_threshold
    );
    if !config.llm.force_llm_for.is_empty() {
        println!("Model first for: {}", config.llm.force_llm_for.join(", "));
    }
    Ok(())
}

pub fn add(category: &str, keywords: &[String], confidence: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(PennyError::Other(format!(
            "Confidence must be between 0 and 1, got {confidence}"
        )));
    }
    let keywords: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return Err(PennyError::Other("At least one keyword is required".to_string()));
    }

    let settings = load_settings()?;
    let store = YamlRuleStore::new(&settings.rules_path());
    let mut config = if store.exists() { store.load()? } else { Default::default() };
    config
        .rules
        .push(CategoryRule::manual(category, keywords.clone(), confidence));
    store.save(&mut config)?;
    println!("Added rule: {} \u{2192} {category}", keywords.join(", "));
    Ok(())
}
