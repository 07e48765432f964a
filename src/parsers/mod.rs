pub mod amazon;
pub mod venmo;

use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use scraper::Html;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{CandidateTransaction, RawEmail, Vendor};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Why an email produced no transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseMiss {
    #[error("not a transaction notification")]
    NotATransaction,
    #[error("subject matches no known template")]
    UnrecognizedSubject,
    #[error("neither order number nor amount found")]
    NothingExtracted,
    #[error("amount is zero or missing")]
    ZeroAmount,
}

/// Parse a dollar literal into unsigned milliunits, ignoring `$`, quotes and
/// thousands separators. Exact: no float round trip.
pub fn parse_amount(raw: &str) -> Option<i64> {
    let s: String = raw
        .chars()
        .filter(|c| !matches!(*c, ',' | '$' | '"') && !c.is_whitespace())
        .collect();
    let (whole, frac) = s.split_once('.').unwrap_or((s.as_str(), ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit())
        || !frac.chars().all(|c| c.is_ascii_digit())
        || frac.len() > 3
    {
        return None;
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac: i64 = format!("{frac:0<3}").parse().ok()?;
    whole.checked_mul(1000)?.checked_add(frac)
}

/// Parse an RFC 2822 style `Date:` header as local wall-clock time, dropping
/// the weekday and the timezone offset.
pub fn parse_header_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    let without_weekday = match raw.split_once(',') {
        Some((head, rest)) if head.trim().chars().all(|c| c.is_ascii_alphabetic()) => rest,
        _ => raw,
    };
    let tokens: Vec<&str> = without_weekday.split_whitespace().take(4).collect();
    if tokens.len() < 4 {
        return None;
    }
    let joined = tokens.join(" ");
    NaiveDateTime::parse_from_str(&joined, "%d %b %Y %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(&joined, "%d %b %Y %H:%M"))
        .ok()
}

pub fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("invalid ws regex"))
}

fn forward_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*(?:(?:fwd?|fw)\s*:\s*)+").expect("invalid fwd regex"))
}

pub fn collapse_ws(s: &str) -> String {
    ws_re().replace_all(s.trim(), " ").to_string()
}

/// Drop any number of leading `Fwd:` / `FW:` markers.
pub fn strip_forward_prefix(subject: &str) -> String {
    forward_prefix_re().replace(subject, "").trim().to_string()
}

/// Render an HTML (or plain text) body as text, one text node per line.
/// Script and style contents are skipped.
pub fn render_text(body: &str) -> String {
    let doc = Html::parse_document(body);
    let mut lines = Vec::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let in_code = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_ascii_lowercase()))
            .is_some_and(|name| name == "script" || name == "style");
        if in_code {
            continue;
        }
        for line in text.lines() {
            let line = collapse_ws(line);
            if !line.is_empty() {
                lines.push(line);
            }
        }
    }
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Parser kinds: enum dispatch instead of trait objects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParserKind {
    AmazonOrder,
    VenmoPayment,
}

impl ParserKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::AmazonOrder => "amazon_order",
            Self::VenmoPayment => "venmo_payment",
        }
    }

    pub fn vendor(&self) -> Vendor {
        match self {
            Self::AmazonOrder => Vendor::Amazon,
            Self::VenmoPayment => Vendor::Venmo,
        }
    }

    fn matches_subject(&self, subject_lower: &str) -> bool {
        match self {
            Self::AmazonOrder => {
                subject_lower.contains("ordered:")
                    || subject_lower.contains("order")
                    || subject_lower.contains("return")
                    || subject_lower.contains("refund")
            }
            Self::VenmoPayment => {
                subject_lower.contains("paid you")
                    || subject_lower.contains("you paid")
                    || subject_lower.contains("charged you")
                    || subject_lower.contains("sent you")
                    || subject_lower.contains("transaction history")
            }
        }
    }

    fn matches_sender(&self, sender_lower: &str) -> bool {
        match self {
            Self::AmazonOrder => sender_lower.contains("@amazon.com"),
            Self::VenmoPayment => sender_lower.contains("@venmo.com"),
        }
    }

    /// Parse with a structured reason on failure.
    pub fn try_parse(&self, email: &RawEmail) -> Result<Vec<CandidateTransaction>, ParseMiss> {
        match self {
            Self::AmazonOrder => amazon::parse(email),
            Self::VenmoPayment => venmo::parse(email),
        }
    }

    /// Parse, degrading every miss to an empty result with a logged reason.
    pub fn parse(&self, email: &RawEmail) -> Vec<CandidateTransaction> {
        match self.try_parse(email) {
            Ok(found) => {
                debug!(email_id = %email.id, parser = self.key(), count = found.len(), "parsed email");
                found
            }
            Err(miss) => {
                info!(email_id = %email.id, subject = %email.subject, parser = self.key(), reason = %miss, "no transaction in email");
                Vec::new()
            }
        }
    }
}

/// Peer-payment subjects are checked first: an order note inside a payment
/// subject must not route the email to the order parser.
const ALL_PARSERS: &[ParserKind] = &[ParserKind::VenmoPayment, ParserKind::AmazonOrder];

pub fn get_by_key(key: &str) -> Option<ParserKind> {
    ALL_PARSERS.iter().find(|p| p.key() == key).copied()
}

/// Pick a parser by subject pattern, then by sender domain. Forwarded
/// emails all share the forwarder's sender, so the subject is the stronger signal.
pub fn get_for_email(email: &RawEmail) -> Option<ParserKind> {
    let subject = email.subject.to_lowercase();
    if let Some(kind) = ALL_PARSERS.iter().find(|p| p.matches_subject(&subject)) {
        return Some(*kind);
    }
    let sender = email.from.to_lowercase();
    ALL_PARSERS.iter().find(|p| p.matches_sender(&sender)).copied()
}
