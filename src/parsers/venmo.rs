use std::sync::OnceLock;

use regex::Regex;

use super::{collapse_ws, now, parse_amount, parse_header_date, render_text, strip_forward_prefix, ParseMiss};
use crate::models::{CandidateTransaction, Details, RawEmail, Source};

/// Notes shorter than this are layout debris, not something a person typed.
const MIN_NOTE_LEN: usize = 3;

const NOTE_BOILERPLATE: &[&str] = &[
    "payment",
    "you paid",
    "paid you",
    "charged you",
    "sent you",
    "view transaction",
    "see transaction",
    "private",
    "like",
    "comment",
    "transfer",
    "charge",
];

/// Subject phrasings of a completed payment. The counterparty is captured
/// before the amount in every form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Template {
    YouPaid,
    PaidYou,
    ChargedYou,
    SentYou,
}

impl Template {
    fn source(self) -> Source {
        match self {
            Self::YouPaid | Self::ChargedYou => Source::PeerSent,
            Self::PaidYou | Self::SentYou => Source::PeerReceived,
        }
    }

    fn describe(self, counterparty: &str) -> String {
        match self {
            Self::YouPaid => format!("You paid {counterparty}"),
            Self::PaidYou => format!("{counterparty} paid you"),
            Self::ChargedYou => format!("{counterparty} charged you"),
            Self::SentYou => format!("{counterparty} sent you"),
        }
    }
}

fn subject_res() -> &'static [(Template, Regex); 4] {
    static RES: OnceLock<[(Template, Regex); 4]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            (
                Template::YouPaid,
                Regex::new(r"(?i)^You paid (.+?) \$([\d,]+(?:\.\d{2})?)").expect("invalid you paid regex"),
            ),
            (
                Template::PaidYou,
                Regex::new(r"(?i)^(.+?) paid you \$([\d,]+(?:\.\d{2})?)").expect("invalid paid you regex"),
            ),
            (
                Template::ChargedYou,
                Regex::new(r"(?i)^(.+?) charged you \$([\d,]+(?:\.\d{2})?)").expect("invalid charged you regex"),
            ),
            (
                Template::SentYou,
                Regex::new(r"(?i)^(.+?) sent you \$([\d,]+(?:\.\d{2})?)").expect("invalid sent you regex"),
            ),
        ]
    })
}

fn note_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)\$\s*[\d,]+\.\d{2}\s*(.*?)\s*See transaction").expect("invalid note regex")
    })
}

fn transaction_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)Transaction ID[:\s#]*(\d{6,})").expect("invalid transaction id regex")
    })
}

pub fn parse(email: &RawEmail) -> Result<Vec<CandidateTransaction>, ParseMiss> {
    let subject = collapse_ws(&html_escape::decode_html_entities(&strip_forward_prefix(
        &email.subject,
    )));
    if subject.to_lowercase().contains("transaction history") {
        return Err(ParseMiss::NotATransaction);
    }

    let (template, counterparty, raw_amount) = subject_res()
        .iter()
        .find_map(|(template, re)| {
            re.captures(&subject)
                .map(|c| (*template, c[1].trim().to_string(), c[2].to_string()))
        })
        .ok_or(ParseMiss::UnrecognizedSubject)?;
    let source = template.source();
    let amount = parse_amount(&raw_amount)
        .filter(|a| *a > 0)
        .ok_or(ParseMiss::ZeroAmount)?;

    let text = render_text(&email.body);
    let note = extract_note(&text);
    let occurred_at = parse_header_date(&email.date_header).unwrap_or_else(now);
    let memo_text = format_memo(&template.describe(&counterparty), note.as_deref());

    Ok(vec![CandidateTransaction {
        source,
        external_reference: transaction_id_re()
            .captures(&text)
            .map(|c| c[1].to_string()),
        amount_milliunits: Some(amount),
        occurred_at,
        details: Details::Peer { counterparty, note },
        memo_text,
        raw_subject: email.subject.clone(),
        raw_message_id: email.id.clone(),
    }])
}

/// Free text between the amount and the `See transaction` button.
fn extract_note(text: &str) -> Option<String> {
    let caps = note_re().captures(text)?;
    let note = collapse_ws(&caps[1])
        .trim_matches(|c: char| matches!(c, '"' | '\u{201c}' | '\u{201d}'))
        .trim()
        .to_string();
    let lower = note.to_lowercase();
    if note.chars().count() < MIN_NOTE_LEN || NOTE_BOILERPLATE.contains(&lower.as_str()) {
        return None;
    }
    Some(note)
}

fn format_memo(base: &str, note: Option<&str>) -> String {
    match note {
        Some(note) => format!("{base} - {note}"),
        None => base.to_string(),
    }
}
