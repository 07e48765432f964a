use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::db::{get_connection, init_db, states_for};
use crate::error::{PennyError, Result};
use crate::fmt::milliunits;
use crate::mailbox::load_eml;
use crate::parsers::{self, get_by_key};
use crate::settings::load_settings;

pub fn run(file: &str, parser: Option<&str>) -> Result<()> {
    let email = load_eml(Path::new(file))?;
    println!("Message: {}", email.id);
    println!("Subject: {}", email.subject);

    let settings = load_settings()?;
    let db_path = settings.db_path();
    if db_path.exists() {
        let conn = get_connection(&db_path)?;
        init_db(&conn)?;
        let states = states_for(&conn, &email.id)?;
        let marked: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
        println!(
            "Marked:  {}",
            if marked.is_empty() { "(never handled)".to_string() } else { marked.join(", ") }
        );
    }

    let kind = match parser {
        Some(key) => Some(get_by_key(key).ok_or_else(|| PennyError::Other(format!("Unknown parser: {key}")))?),
        None => parsers::get_for_email(&email),
    };
    let Some(kind) = kind else {
        println!("{}", "Not a recognized order or payment email.".yellow());
        return Ok(());
    };
    println!("Parser:  {} ({})", kind.key(), kind.vendor().name());

    let candidates = match kind.try_parse(&email) {
        Ok(found) => found,
        Err(miss) => {
            println!("{} {miss}", "Nothing extracted:".yellow());
            return Ok(());
        }
    };

    let mut table = Table::new();
    table.set_header(vec!["Source", "Date", "Amount", "Reference", "Memo"]);
    for c in &candidates {
        table.add_row(vec![
            Cell::new(c.source.label()),
            Cell::new(c.date()),
            Cell::new(c.signed_milliunits().map(milliunits).unwrap_or_else(|| "-".to_string())),
            Cell::new(c.external_reference.as_deref().unwrap_or("-")),
            Cell::new(&c.memo_text),
        ]);
    }
    println!("{table}");
    Ok(())
}
