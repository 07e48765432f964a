use crate::db::{count_by_state, get_connection, init_db};
use crate::error::Result;
use crate::mailbox::collect_eml_files;
use crate::rules::{load_or_default, RuleSource, YamlRuleStore};
use crate::settings::{load_settings, settings_file_path, Credentials};

fn presence(value: &Option<String>) -> &'static str {
    if value.is_some() { "set" } else { "(not set)" }
}

pub fn run() -> Result<()> {
    let settings = load_settings()?;
    println!("Settings:   {}", settings_file_path().display());
    println!("Data dir:   {}", settings.data_dir);
    println!("Mail drop:  {}", settings.mail_path().display());
    println!("Rules:      {}", settings.rules_path().display());
    println!("Users:      {}", settings.users.len());

    let db_path = settings.db_path();
    if db_path.exists() {
        let conn = get_connection(&db_path)?;
        init_db(&conn)?;
        println!();
        println!("Mail files:    {}", collect_eml_files(&settings.mail_path()).len());
        for (state, count) in count_by_state(&conn)? {
            println!("{:<15}{count}", format!("{state}:"));
        }
    } else {
        println!();
        println!("Database not found. Run `penny init` to set up.");
    }

    let store = YamlRuleStore::new(&settings.rules_path());
    if store.exists() {
        let config = load_or_default(&store);
        println!();
        println!("Manual rules:  {}", config.count_by_source(RuleSource::Manual));
        println!("Learned rules: {}", config.count_by_source(RuleSource::Learned));
        println!(
            "Last learned:  {}",
            config.learning.last_checkpoint.as_deref().unwrap_or("never")
        );
    }

    let creds = Credentials::from_env();
    println!();
    println!("YNAB token:    {}", presence(&creds.ynab_token));
    println!("YNAB budget:   {}", presence(&creds.ynab_budget_id));
    println!("Anthropic key: {}", presence(&creds.anthropic_api_key));
    Ok(())
}
