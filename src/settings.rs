use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PennyError, Result};
use crate::models::UserProfile;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    /// Drop directory holding forwarded `.eml` files. Empty means `<data_dir>/inbox`.
    #[serde(default)]
    pub mail_dir: String,
    /// Category rule file. Empty means `<data_dir>/category_rules.yaml`.
    #[serde(default)]
    pub rules_file: String,
    #[serde(default)]
    pub users: Vec<UserProfile>,
    #[serde(default = "default_match_window")]
    pub match_window_days: i64,
    #[serde(default = "default_duplicate_window")]
    pub duplicate_window_days: i64,
    #[serde(default = "default_lookback")]
    pub lookback_days: i64,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    #[serde(default = "default_reconcile_days")]
    pub reconcile_days: i64,
    /// Token an order's ledger payee must contain.
    #[serde(default = "default_vendor_token")]
    pub vendor_token: String,
}

fn default_match_window() -> i64 {
    1
}

fn default_duplicate_window() -> i64 {
    3
}

fn default_lookback() -> i64 {
    30
}

fn default_fetch_limit() -> usize {
    50
}

fn default_reconcile_days() -> i64 {
    90
}

fn default_vendor_token() -> String {
    "amazon".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            mail_dir: String::new(),
            rules_file: String::new(),
            users: Vec::new(),
            match_window_days: default_match_window(),
            duplicate_window_days: default_duplicate_window(),
            lookback_days: default_lookback(),
            fetch_limit: default_fetch_limit(),
            reconcile_days: default_reconcile_days(),
            vendor_token: default_vendor_token(),
        }
    }
}

impl Settings {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_path().join("penny.db")
    }

    pub fn mail_path(&self) -> PathBuf {
        if self.mail_dir.is_empty() {
            self.data_path().join("inbox")
        } else {
            PathBuf::from(&self.mail_dir)
        }
    }

    pub fn rules_path(&self) -> PathBuf {
        if self.rules_file.is_empty() {
            self.data_path().join("category_rules.yaml")
        } else {
            PathBuf::from(&self.rules_file)
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("penny")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("penny")
}

/// Missing settings fall back to defaults; malformed settings are an error so
/// a typo in the user table never silently drops every email.
pub fn load_settings() -> Result<Settings> {
    let path = settings_path();
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(&path)?;
    serde_json::from_str(&content)
        .map_err(|e| PennyError::Settings(format!("{}: {e}", path.display())))
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn settings_file_path() -> PathBuf {
    settings_path()
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

/// Credentials come from the environment (optionally a `.env` file).
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub ynab_token: Option<String>,
    pub ynab_budget_id: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            ynab_token: var("YNAB_ACCESS_TOKEN"),
            ynab_budget_id: var("YNAB_BUDGET_ID"),
            anthropic_api_key: var("ANTHROPIC_API_KEY"),
            anthropic_model: var("ANTHROPIC_MODEL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            data_dir: "/tmp/test".to_string(),
            match_window_days: 2,
            users: vec![UserProfile {
                user_id: "alex".to_string(),
                emails: vec!["alex@example.com".to_string()],
                names: vec!["Alex Rivera".to_string()],
                venmo_account: Some("Alex Venmo".to_string()),
                amazon_account: Some("Alex Amazon Card".to_string()),
                requires_recipient_validation: false,
            }],
            ..Settings::default()
        };
        let json = serde_json::to_string_pretty(&settings).unwrap();
        std::fs::write(&path, &json).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: Settings = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded.data_dir, "/tmp/test");
        assert_eq!(loaded.match_window_days, 2);
        assert_eq!(loaded.users[0].venmo_account.as_deref(), Some("Alex Venmo"));
    }

    #[test]
    fn test_load_merges_with_defaults() {
        let json = r#"{"data_dir": "/tmp/test", "users": [{"user_id": "sam"}]}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.match_window_days, 1);
        assert_eq!(s.duplicate_window_days, 3);
        assert_eq!(s.lookback_days, 30);
        assert_eq!(s.vendor_token, "amazon");
        assert!(s.users[0].emails.is_empty());
        assert!(!s.users[0].requires_recipient_validation);
    }

    #[test]
    fn test_derived_paths() {
        let s = Settings {
            data_dir: "/data".to_string(),
            ..Settings::default()
        };
        assert_eq!(s.db_path(), PathBuf::from("/data/penny.db"));
        assert_eq!(s.mail_path(), PathBuf::from("/data/inbox"));
        assert_eq!(s.rules_path(), PathBuf::from("/data/category_rules.yaml"));

        let custom = Settings {
            mail_dir: "/mail".to_string(),
            ..s
        };
        assert_eq!(custom.mail_path(), PathBuf::from("/mail"));
    }
}
