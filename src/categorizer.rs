use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::llm::GenerativeClassifier;
use crate::models::{CategoryGroup, ClassificationResult, Method, Vendor};
use crate::rules::RuleConfig;

/// Similarity floor for mapping a rule's category name onto a ledger category.
const FUZZY_FLOOR: f64 = 0.8;

fn vendor_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Amazon Link:\s*\S+").expect("invalid vendor link regex"))
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://\S+").expect("invalid url regex"))
}

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("invalid ws regex"))
}

/// Strip vendor links and URLs, collapse whitespace.
pub fn clean_text(text: &str) -> String {
    let text = vendor_link_re().replace_all(text, "");
    let text = url_re().replace_all(&text, "");
    ws_re().replace_all(&text, " ").trim().to_string()
}

fn word_pattern(word: &str) -> Option<Regex> {
    let word = word.trim();
    if word.is_empty() {
        return None;
    }
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word))).ok()
}

// ---------------------------------------------------------------------------
// Category names
// ---------------------------------------------------------------------------

/// Keep letters, digits and spaces; lowercase. Drops emoji and punctuation.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
        .trim()
        .to_string()
}

/// Ratcliff/Obershelp similarity: twice the matched characters over the
/// combined length.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / (a.len() + b.len()) as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, k) = longest_block(a, b);
    if k == 0 {
        return 0;
    }
    k + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + k..], &b[j + k..])
}

/// Longest common run as `(start_a, start_b, len)`, earliest on ties.
fn longest_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        let mut cur = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                let len = prev[j] + 1;
                cur[j + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        prev = cur;
    }
    best
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub category: CategoryRef,
    pub fuzzy: bool,
}

/// Visible ledger categories in ledger order.
#[derive(Debug, Clone, Default)]
pub struct CategoryIndex {
    entries: Vec<CategoryRef>,
}

impl CategoryIndex {
    pub fn from_groups(groups: &[CategoryGroup]) -> Self {
        let entries = groups
            .iter()
            .flat_map(|g| g.categories.iter())
            .filter(|c| !c.hidden && !c.deleted)
            .map(|c| CategoryRef {
                id: c.id.clone(),
                name: c.name.clone(),
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|c| c.name.clone()).collect()
    }

    /// Exact name first, then the most similar normalized name above the floor.
    pub fn resolve(&self, name: &str) -> Option<Resolved> {
        if let Some(exact) = self.entries.iter().find(|c| c.name == name) {
            return Some(Resolved {
                category: exact.clone(),
                fuzzy: false,
            });
        }
        let target = normalize_name(name);
        let mut best: Option<(&CategoryRef, f64)> = None;
        for entry in &self.entries {
            let ratio = similarity(&normalize_name(&entry.name), &target);
            if ratio > FUZZY_FLOOR && best.map_or(true, |(_, b)| ratio > b) {
                best = Some((entry, ratio));
            }
        }
        best.map(|(entry, ratio)| {
            debug!(rule_category = name, ledger_category = %entry.name, ratio, "fuzzy category match");
            Resolved {
                category: entry.clone(),
                fuzzy: true,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

struct CompiledRule {
    category: String,
    confidence: f64,
    keywords: Vec<Regex>,
    exclude: Vec<Regex>,
}

pub struct Classifier<'a> {
    config: &'a RuleConfig,
    index: &'a CategoryIndex,
    model: Option<&'a dyn GenerativeClassifier>,
    compiled: Vec<CompiledRule>,
}

impl<'a> Classifier<'a> {
    pub fn new(
        config: &'a RuleConfig,
        index: &'a CategoryIndex,
        model: Option<&'a dyn GenerativeClassifier>,
    ) -> Self {
        let compiled = config
            .rules
            .iter()
            .map(|rule| CompiledRule {
                category: rule.category.clone(),
                confidence: rule.confidence,
                keywords: rule.keywords.iter().filter_map(|k| word_pattern(k)).collect(),
                exclude: rule.exclude_when.iter().filter_map(|w| word_pattern(w)).collect(),
            })
            .collect();
        Self {
            config,
            index,
            model,
            compiled,
        }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn minimum_confidence(&self) -> f64 {
        self.config.conservative.minimum_confidence
    }

    /// Highest-confidence rule with a whole-word keyword hit. Ties keep the
    /// earlier rule.
    pub fn match_rules(&self, text: &str) -> Option<(String, f64)> {
        let mut best: Option<(&CompiledRule, f64)> = None;
        for rule in &self.compiled {
            if rule.exclude.iter().any(|re| re.is_match(text)) {
                continue;
            }
            if !rule.keywords.iter().any(|re| re.is_match(text)) {
                continue;
            }
            if best.map_or(true, |(_, c)| rule.confidence > c) {
                best = Some((rule, rule.confidence));
            }
        }
        best.map(|(rule, c)| (rule.category.clone(), c))
    }

    /// Ask the model; every failure reads as "no answer".
    fn ask_model(&self, text: &str) -> Option<(String, f64)> {
        let model = self.model?;
        let categories = self.index.names();
        if categories.is_empty() {
            return None;
        }
        let verdict = match model.classify_text(text, &categories) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "generative classification failed");
                return None;
            }
        };
        debug!(category = ?verdict.category, confidence = verdict.confidence, reasoning = %verdict.reasoning, "model verdict");
        let category = verdict.category?;
        if verdict.confidence < self.config.llm.confidence_threshold {
            return None;
        }
        Some((category, verdict.confidence))
    }

    /// Classify free text. `vendor` selects the per-source generative override.
    pub fn classify(&self, text: &str, vendor: Option<Vendor>) -> ClassificationResult {
        let cleaned = clean_text(text);
        if cleaned.is_empty() {
            return ClassificationResult::none();
        }
        let minimum = self.minimum_confidence();
        let model_first = vendor.is_some_and(|v| self.config.force_llm_for(v));

        let mut decided = None;
        if !model_first {
            decided = self
                .match_rules(&cleaned)
                .filter(|(_, c)| *c >= minimum)
                .map(|(name, c)| (name, c, Method::Rule));
        }
        if decided.is_none() {
            decided = self
                .ask_model(&cleaned)
                .filter(|(_, c)| *c >= minimum)
                .map(|(name, c)| (name, c, Method::Generative));
        }
        let Some((name, confidence, method)) = decided else {
            return ClassificationResult::none();
        };

        match self.index.resolve(&name) {
            Some(resolved) => ClassificationResult {
                category_id: Some(resolved.category.id),
                category_name: Some(resolved.category.name),
                confidence,
                method: if resolved.fuzzy && method == Method::Rule {
                    Method::FuzzyRule
                } else {
                    method
                },
            },
            None => {
                warn!(category = %name, "no ledger category matches");
                ClassificationResult::none()
            }
        }
    }
}
