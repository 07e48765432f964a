use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::models::Vendor;

/// Words that mark a payee as a place serving food. A rule listing them in
/// `exclude_when` stays silent for "Lazy Dog Restaurant" and the like.
pub const FOOD_ESTABLISHMENT_WORDS: &[&str] =
    &["restaurant", "cafe", "bar", "grill", "kitchen", "bistro"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    #[default]
    Manual,
    Learned,
}

impl RuleSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Learned => "learned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_rule_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub source: RuleSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learned_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<usize>,
    /// Context words that suppress this rule when present in the text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_when: Vec<String>,
}

fn default_rule_confidence() -> f64 {
    0.9
}

impl CategoryRule {
    pub fn manual(category: &str, keywords: Vec<String>, confidence: f64) -> Self {
        Self {
            category: category.to_string(),
            keywords,
            confidence,
            source: RuleSource::Manual,
            learned_at: None,
            sample_count: None,
            exclude_when: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConservativeConfig {
    #[serde(default = "default_minimum_confidence")]
    pub minimum_confidence: f64,
}

fn default_minimum_confidence() -> f64 {
    0.75
}

impl Default for ConservativeConfig {
    fn default() -> Self {
        Self {
            minimum_confidence: default_minimum_confidence(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Vendor keys (`amazon`, `venmo`) that skip keyword rules entirely.
    #[serde(default)]
    pub force_llm_for: Vec<String>,
    #[serde(default = "default_llm_threshold")]
    pub confidence_threshold: f64,
}

fn default_llm_threshold() -> f64 {
    0.8
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            force_llm_for: Vec::new(),
            confidence_threshold: default_llm_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default)]
    pub last_checkpoint: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            last_checkpoint: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub rules: Vec<CategoryRule>,
    #[serde(default)]
    pub conservative: ConservativeConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub learning: LearningConfig,
}

impl RuleConfig {
    pub fn has_rule_for(&self, category: &str) -> bool {
        self.rules
            .iter()
            .any(|r| r.category.eq_ignore_ascii_case(category))
    }

    pub fn force_llm_for(&self, vendor: Vendor) -> bool {
        self.llm
            .force_llm_for
            .iter()
            .any(|s| s.eq_ignore_ascii_case(vendor.key()))
    }

    pub fn count_by_source(&self, source: RuleSource) -> usize {
        self.rules.iter().filter(|r| r.source == source).count()
    }
}

/// Rule set written by `penny init`.
pub fn starter_config() -> RuleConfig {
    let words = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let mut pet = CategoryRule::manual(
        "Pet",
        words(&["dog", "cat", "pet", "puppy", "kitten", "litter", "chewy"]),
        0.9,
    );
    pet.exclude_when = words(FOOD_ESTABLISHMENT_WORDS);
    RuleConfig {
        rules: vec![
            pet,
            CategoryRule::manual(
                "Groceries",
                words(&["grocery", "groceries", "produce", "trader joe", "safeway"]),
                0.9,
            ),
            CategoryRule::manual(
                "Dining Out",
                words(&["restaurant", "cafe", "pizza", "sushi", "dinner", "lunch"]),
                0.85,
            ),
            CategoryRule::manual(
                "Household",
                words(&["paper towels", "detergent", "trash bags", "dish soap"]),
                0.9,
            ),
        ],
        ..RuleConfig::default()
    }
}

/// Whole-file persistence for the rule set.
pub trait RuleStore {
    fn load(&self) -> Result<RuleConfig>;
    /// Rewrite the whole file, bumping `revision`.
    fn save(&self, config: &mut RuleConfig) -> Result<()>;
}

pub struct YamlRuleStore {
    path: PathBuf,
}

impl YamlRuleStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl RuleStore for YamlRuleStore {
    fn load(&self) -> Result<RuleConfig> {
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(RuleConfig::default());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    fn save(&self, config: &mut RuleConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.revision += 1;
        let yaml = serde_yaml::to_string(config)?;
        let tmp = self.path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// A missing or unreadable rule file leaves classification without rules
/// instead of stopping the run.
pub fn load_or_default(store: &dyn RuleStore) -> RuleConfig {
    match store.load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "category rules unavailable, continuing without rules");
            RuleConfig::default()
        }
    }
}
