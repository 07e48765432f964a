use colored::Colorize;

use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::rules::{starter_config, RuleStore, YamlRuleStore};
use crate::settings::{load_settings, save_settings, settings_file_path, shellexpand_path};

pub fn run(data_dir: Option<String>, mail_dir: Option<String>) -> Result<()> {
    let mut settings = load_settings()?;
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }
    if let Some(dir) = mail_dir {
        settings.mail_dir = shellexpand_path(&dir);
    }

    let data_path = settings.data_path();
    std::fs::create_dir_all(&data_path)?;
    std::fs::create_dir_all(settings.mail_path())?;

    let conn = get_connection(&settings.db_path())?;
    init_db(&conn)?;

    let store = YamlRuleStore::new(&settings.rules_path());
    if store.exists() {
        println!("Keeping existing rules at {}", store.path().display());
    } else {
        let mut config = starter_config();
        store.save(&mut config)?;
        println!("Wrote starter rules to {}", store.path().display());
    }

    save_settings(&settings)?;
    println!("{} Penny initialized at {}", "✓".green(), data_path.display());
    println!("Settings:   {}", settings_file_path().display());
    println!("Mail drop:  {}", settings.mail_path().display());
    if settings.users.is_empty() {
        println!(
            "{}",
            "No users configured yet: add them to the \"users\" list in the settings file.".yellow()
        );
    }
    Ok(())
}
