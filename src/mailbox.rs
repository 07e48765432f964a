use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate};
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::db;
use crate::error::Result;
use crate::models::{MailState, RawEmail};

#[derive(Debug, Clone, Default)]
pub struct FetchFilter {
    /// Skip messages dated before this day. Undated messages are kept.
    pub since: Option<NaiveDate>,
    /// Maximum number of messages returned; 0 means no limit.
    pub limit: usize,
    /// Also return messages already marked processed.
    pub include_reprocessed: bool,
}

/// Source of forwarded notification emails plus their handling markers.
pub trait Mailbox {
    fn fetch_candidates(&mut self, filter: &FetchFilter) -> Result<Vec<RawEmail>>;
    /// Additive and idempotent.
    fn mark_state(&mut self, id: &str, state: MailState) -> Result<()>;
}

/// `.eml` files under a drop directory, with markers kept in SQLite.
pub struct EmlDirMailbox {
    root: PathBuf,
    conn: Connection,
}

impl EmlDirMailbox {
    pub fn new(root: &Path, conn: Connection) -> Self {
        Self {
            root: root.to_path_buf(),
            conn,
        }
    }
}

impl Mailbox for EmlDirMailbox {
    fn fetch_candidates(&mut self, filter: &FetchFilter) -> Result<Vec<RawEmail>> {
        let mut found = Vec::new();
        for path in collect_eml_files(&self.root) {
            let email = match load_eml(&path) {
                Ok(email) => email,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable email file");
                    continue;
                }
            };
            if !filter.include_reprocessed && db::has_state(&self.conn, &email.id, MailState::Processed)? {
                continue;
            }
            if let (Some(since), Some(sent)) = (filter.since, header_day(&email.date_header)) {
                if sent < since {
                    continue;
                }
            }
            debug!(email_id = %email.id, subject = %email.subject, "candidate email");
            found.push(email);
            if filter.limit > 0 && found.len() >= filter.limit {
                break;
            }
        }
        Ok(found)
    }

    fn mark_state(&mut self, id: &str, state: MailState) -> Result<()> {
        db::mark_state(&self.conn, id, state, None)
    }
}

/// Sorted `.eml` paths below `root`. A missing directory holds no mail.
pub fn collect_eml_files(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        warn!(path = %root.display(), "mail directory does not exist");
        return Vec::new();
    }
    let mut files = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.eq_ignore_ascii_case("eml"))
        })
        .collect::<Vec<_>>();
    files.sort();
    files
}

/// HTML part if there is one, else the first plain-text part.
fn extract_best_body(mail: &ParsedMail) -> Option<String> {
    fn walk(mail: &ParsedMail, want_html: bool) -> Option<String> {
        let mime = mail.ctype.mimetype.to_ascii_lowercase();
        if (want_html && mime == "text/html") || (!want_html && mime == "text/plain") {
            if let Ok(body) = mail.get_body() {
                return Some(body);
            }
        }
        mail.subparts.iter().find_map(|part| walk(part, want_html))
    }

    walk(mail, true).or_else(|| walk(mail, false))
}

pub fn load_eml(path: &Path) -> Result<RawEmail> {
    let bytes = std::fs::read(path)?;
    let mail = parse_mail(&bytes)?;
    let header = |name: &str| mail.headers.get_first_value(name).unwrap_or_default();
    let id = mail
        .headers
        .get_first_value("Message-ID")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            hex::encode(hasher.finalize())
        });
    Ok(RawEmail {
        id,
        from: header("From"),
        to: mail.headers.get_first_value("To").filter(|v| !v.trim().is_empty()),
        subject: header("Subject"),
        date_header: header("Date"),
        body: extract_best_body(&mail).unwrap_or_default(),
    })
}

fn header_day(date_header: &str) -> Option<NaiveDate> {
    let ts = mailparse::dateparse(date_header).ok()?;
    DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive())
}
