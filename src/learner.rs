use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use tracing::info;

use crate::models::LedgerEntry;
use crate::rules::{CategoryRule, RuleConfig, RuleSource};

pub const LEARNED_CONFIDENCE: f64 = 0.85;
pub const MAX_KEYWORDS: usize = 10;
pub const FIRST_RUN_DAYS: i64 = 90;
pub const CHECKPOINT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const STOP_WORDS: &[&str] = &[
    "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "a", "an", "this",
    "that", "these", "those", "is", "was", "are", "were", "be", "been", "being", "have", "has",
    "had", "do", "does", "did", "will", "would", "could", "should", "may", "might", "can", "from",
    "by", "as", "payment", "purchase", "transaction", "order", "transfer", "deposit", "amazon",
    "link", "http", "https", "www", "com", "net", "org", "return", "refund",
];

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[a-z][a-z0-9]*\b").expect("invalid word regex"))
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://\S+").expect("invalid url regex"))
}

/// Tokens present in at least `min_frequency` distinct texts, most frequent
/// first (alphabetical among equals), at most [`MAX_KEYWORDS`].
pub fn extract_keywords(texts: &[String], min_frequency: usize) -> Vec<String> {
    let mut freq: BTreeMap<String, usize> = BTreeMap::new();
    for text in texts {
        let lower = text.to_lowercase();
        let lower = url_re().replace_all(&lower, "");
        let unique: BTreeSet<&str> = word_re()
            .find_iter(&lower)
            .map(|m| m.as_str())
            .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
            .collect();
        for word in unique {
            *freq.entry(word.to_string()).or_default() += 1;
        }
    }
    let mut keywords: Vec<(String, usize)> = freq
        .into_iter()
        .filter(|(_, n)| *n >= min_frequency)
        .collect();
    keywords.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    keywords.into_iter().take(MAX_KEYWORDS).map(|(w, _)| w).collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearnOutcome {
    /// Approved, categorized entries examined.
    pub examined: usize,
    /// New rules for categories that have none yet.
    pub proposed: Vec<CategoryRule>,
    /// Categories with enough samples that already carry a rule.
    pub skipped: Vec<String>,
}

/// Derive keyword rules from user-approved ledger entries.
pub fn learn(entries: &[LedgerEntry], existing: &RuleConfig, min_frequency: usize, now: NaiveDateTime) -> LearnOutcome {
    let mut by_category: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut examined = 0;
    for entry in entries {
        if !entry.approved || entry.category_id.is_none() {
            continue;
        }
        let Some(name) = entry.category_name.as_deref().filter(|n| !n.is_empty()) else {
            continue;
        };
        examined += 1;
        let text = entry.text();
        if !text.is_empty() {
            by_category.entry(name.to_string()).or_default().push(text);
        }
    }

    let learned_at = now.format(CHECKPOINT_FORMAT).to_string();
    let mut outcome = LearnOutcome {
        examined,
        ..LearnOutcome::default()
    };
    for (category, texts) in by_category {
        if texts.len() < min_frequency {
            continue;
        }
        let keywords = extract_keywords(&texts, min_frequency);
        if keywords.is_empty() {
            continue;
        }
        if existing.has_rule_for(&category) {
            info!(category = %category, "category already has rules, not learning");
            outcome.skipped.push(category);
            continue;
        }
        outcome.proposed.push(CategoryRule {
            category,
            keywords,
            confidence: LEARNED_CONFIDENCE,
            source: RuleSource::Learned,
            learned_at: Some(learned_at.clone()),
            sample_count: Some(texts.len()),
            exclude_when: Vec::new(),
        });
    }
    outcome
}

/// Append proposed rules and advance the checkpoint. The checkpoint never
/// moves backwards.
pub fn apply(config: &RuleConfig, outcome: &LearnOutcome, now: NaiveDateTime) -> RuleConfig {
    let mut next = config.clone();
    for rule in &outcome.proposed {
        if !next.has_rule_for(&rule.category) {
            next.rules.push(rule.clone());
        }
    }
    let previous = next
        .learning
        .last_checkpoint
        .as_deref()
        .and_then(parse_checkpoint);
    let checkpoint = previous.map_or(now, |p| p.max(now));
    next.learning.last_checkpoint = Some(checkpoint.format(CHECKPOINT_FORMAT).to_string());
    next
}

fn parse_checkpoint(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d")
                .ok()?
                .and_hms_opt(0, 0, 0)
        })
}

/// Where the next scan starts: the checkpoint's date, or a fixed lookback on
/// the first run.
pub fn since_date(config: &RuleConfig, today: NaiveDate) -> NaiveDate {
    config
        .learning
        .last_checkpoint
        .as_deref()
        .and_then(parse_checkpoint)
        .map(|c| c.date())
        .unwrap_or_else(|| today - Duration::days(FIRST_RUN_DAYS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClearedState;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn entry(payee: &str, memo: &str, category: Option<&str>, approved: bool) -> LedgerEntry {
        LedgerEntry {
            id: format!("{payee}-{memo}"),
            account_id: "acct".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
            amount: -10_000,
            payee_name: Some(payee.to_string()),
            memo: Some(memo.to_string()),
            category_id: category.map(|c| format!("id-{c}")),
            category_name: category.map(str::to_string),
            approved,
            cleared: ClearedState::Cleared,
        }
    }

    #[test]
    fn test_extract_keywords_counts_distinct_texts() {
        let texts: Vec<String> = [
            "Chewy dog dog dog food",
            "Chewy cat litter",
            "Chewy dog treats",
            "Petco dog bed",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(extract_keywords(&texts, 3), vec!["chewy", "dog"]);
    }

    #[test]
    fn test_extract_keywords_drops_stop_words_short_words_and_urls() {
        let texts: Vec<String> = (0..3)
            .map(|_| "Amazon order for the TV https://example.com/track payment".to_string())
            .collect();
        assert!(extract_keywords(&texts, 3).is_empty());
    }

    #[test]
    fn test_extract_keywords_limit_and_tie_order() {
        let line = "alpha bravo charlie delta echo foxtrot golf hotel india juliet kilo lima";
        let texts: Vec<String> = (0..3).map(|_| line.to_string()).collect();
        let keywords = extract_keywords(&texts, 3);
        assert_eq!(keywords.len(), MAX_KEYWORDS);
        assert_eq!(keywords[0], "alpha");
        assert_eq!(keywords[9], "juliet");
    }

    #[test]
    fn test_learn_uses_only_approved_categorized_entries() {
        let entries = vec![
            entry("Chewy", "dog food", Some("Pet"), true),
            entry("Chewy", "dog treats", Some("Pet"), true),
            entry("Chewy", "dog bowl", Some("Pet"), true),
            entry("Chewy", "dog toy", Some("Pet"), false),
            entry("Chewy", "dog bed", None, true),
        ];
        let outcome = learn(&entries, &RuleConfig::default(), 3, at("2025-12-10 08:00:00"));
        assert_eq!(outcome.examined, 3);
        assert_eq!(outcome.proposed.len(), 1);
        let rule = &outcome.proposed[0];
        assert_eq!(rule.category, "Pet");
        assert_eq!(rule.keywords, vec!["chewy", "dog"]);
        assert_eq!(rule.confidence, LEARNED_CONFIDENCE);
        assert_eq!(rule.source, RuleSource::Learned);
        assert_eq!(rule.sample_count, Some(3));
        assert_eq!(rule.learned_at.as_deref(), Some("2025-12-10T08:00:00"));
    }

    #[test]
    fn test_learn_skips_categories_with_rules() {
        let entries: Vec<LedgerEntry> = (0..3)
            .map(|i| entry("Chewy", &format!("dog food {i}"), Some("Pet"), true))
            .collect();
        let existing = crate::rules::starter_config();
        let outcome = learn(&entries, &existing, 3, at("2025-12-10 08:00:00"));
        assert!(outcome.proposed.is_empty());
        assert_eq!(outcome.skipped, vec!["Pet".to_string()]);
    }

    #[test]
    fn test_learn_needs_min_frequency_samples() {
        let entries = vec![
            entry("Chewy", "dog food", Some("Pet"), true),
            entry("Chewy", "dog food", Some("Pet"), true),
        ];
        let outcome = learn(&entries, &RuleConfig::default(), 3, at("2025-12-10 08:00:00"));
        assert!(outcome.proposed.is_empty());
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn test_apply_appends_and_checkpoint_is_monotonic() {
        let entries: Vec<LedgerEntry> = (0..3)
            .map(|i| entry("Shell", &format!("fuel stop {i}"), Some("Gas"), true))
            .collect();
        let mut config = RuleConfig::default();
        config.learning.last_checkpoint = Some("2025-12-20T00:00:00".to_string());
        let now = at("2025-12-10 08:00:00");
        let outcome = learn(&entries, &config, 3, now);
        let next = apply(&config, &outcome, now);
        assert_eq!(next.rules.len(), 1);
        assert_eq!(next.learning.last_checkpoint.as_deref(), Some("2025-12-20T00:00:00"));

        let later = at("2026-01-05 09:30:00");
        let again = apply(&next, &LearnOutcome::default(), later);
        assert_eq!(again.rules.len(), 1);
        assert_eq!(again.learning.last_checkpoint.as_deref(), Some("2026-01-05T09:30:00"));
    }

    #[test]
    fn test_apply_keeps_learning_switch() {
        let mut config = RuleConfig::default();
        config.learning.enabled = false;
        let next = apply(&config, &LearnOutcome::default(), at("2025-12-10 08:00:00"));
        assert!(!next.learning.enabled);
    }

    #[test]
    fn test_since_date() {
        let today = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        let mut config = RuleConfig::default();
        assert_eq!(since_date(&config, today), NaiveDate::from_ymd_opt(2025, 10, 2).unwrap());
        config.learning.last_checkpoint = Some("2025-12-15T10:11:12.123456".to_string());
        assert_eq!(since_date(&config, today), NaiveDate::from_ymd_opt(2025, 12, 15).unwrap());
    }
}
