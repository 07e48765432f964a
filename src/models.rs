use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Vendor whose notification emails we know how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    Amazon,
    Venmo,
}

impl Vendor {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Amazon => "amazon",
            Self::Venmo => "venmo",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Amazon => "Amazon",
            Self::Venmo => "Venmo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    OrderPurchase,
    OrderReturn,
    PeerSent,
    PeerReceived,
}

impl Source {
    pub fn vendor(&self) -> Vendor {
        match self {
            Self::OrderPurchase | Self::OrderReturn => Vendor::Amazon,
            Self::PeerSent | Self::PeerReceived => Vendor::Venmo,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Self::OrderPurchase | Self::PeerSent => Direction::Outflow,
            Self::OrderReturn | Self::PeerReceived => Direction::Inflow,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::OrderPurchase => "order-purchase",
            Self::OrderReturn => "order-return",
            Self::PeerSent => "peer-sent",
            Self::PeerReceived => "peer-received",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outflow,
    Inflow,
}

impl Direction {
    pub fn sign(&self) -> i64 {
        match self {
            Self::Outflow => -1,
            Self::Inflow => 1,
        }
    }
}

/// Vendor-specific payload of a parsed email.
#[derive(Debug, Clone, PartialEq)]
pub enum Details {
    Order {
        items: Vec<String>,
        /// Item name quoted in the subject line (`Ordered: "..."`) or named in a return subject.
        subject_item: Option<String>,
        order_url: Option<String>,
    },
    Peer {
        counterparty: String,
        note: Option<String>,
    },
}

/// One transaction recovered from a notification email, not yet reconciled.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateTransaction {
    pub source: Source,
    pub external_reference: Option<String>,
    /// Unsigned amount in milliunits; `None` when the email did not reveal it.
    pub amount_milliunits: Option<i64>,
    pub occurred_at: NaiveDateTime,
    pub details: Details,
    pub memo_text: String,
    pub raw_subject: String,
    pub raw_message_id: String,
}

impl CandidateTransaction {
    pub fn direction(&self) -> Direction {
        self.source.direction()
    }

    pub fn date(&self) -> NaiveDate {
        self.occurred_at.date()
    }

    /// Signed ledger amount. Never zero: a zero or missing amount yields `None`.
    pub fn signed_milliunits(&self) -> Option<i64> {
        self.amount_milliunits
            .filter(|a| *a > 0)
            .map(|a| a * self.direction().sign())
    }

    pub fn amount(&self) -> Option<f64> {
        self.amount_milliunits.map(|m| m as f64 / 1000.0)
    }

    /// The single most descriptive item name for an order.
    pub fn primary_item(&self) -> Option<&str> {
        match &self.details {
            Details::Order {
                items,
                subject_item,
                ..
            } => subject_item
                .as_deref()
                .or_else(|| items.first().map(String::as_str)),
            Details::Peer { .. } => None,
        }
    }

    pub fn counterparty(&self) -> Option<&str> {
        match &self.details {
            Details::Peer { counterparty, .. } => Some(counterparty),
            Details::Order { .. } => None,
        }
    }

    /// Text handed to the classifier. Item names classify far better than
    /// the merchant brand, so orders use the item alone.
    pub fn classification_text(&self) -> Option<String> {
        match &self.details {
            Details::Order { .. } => self.primary_item().map(str::to_string),
            Details::Peer { counterparty, .. } => {
                Some(format!("{counterparty} {}", self.memo_text).trim().to_string())
            }
        }
    }
}

/// An email as handed over by the mailbox.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEmail {
    pub id: String,
    pub from: String,
    pub to: Option<String>,
    pub subject: String,
    pub date_header: String,
    pub body: String,
}

/// Cumulative markers stored against an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MailState {
    Processed,
    Matched,
    Created,
}

impl MailState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Matched => "matched",
            Self::Created => "created",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "processed" => Some(Self::Processed),
            "matched" => Some(Self::Matched),
            "created" => Some(Self::Created),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClearedState {
    Cleared,
    #[default]
    Uncleared,
    Reconciled,
}

impl ClearedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cleared => "cleared",
            Self::Uncleared => "uncleared",
            Self::Reconciled => "reconciled",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "cleared" => Self::Cleared,
            "reconciled" => Self::Reconciled,
            _ => Self::Uncleared,
        }
    }
}

/// A transaction as stored in the budgeting ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub id: String,
    pub account_id: String,
    pub date: NaiveDate,
    /// Signed milliunits, negative for outflows.
    pub amount: i64,
    pub payee_name: Option<String>,
    pub memo: Option<String>,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
    pub approved: bool,
    pub cleared: ClearedState,
}

impl LedgerEntry {
    /// `payee + memo`, the text both the learner and the bulk pass work from.
    pub fn text(&self) -> String {
        format!(
            "{} {}",
            self.payee_name.as_deref().unwrap_or(""),
            self.memo.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }
}

/// A transaction to be created in the ledger. `approved` is never sent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub account_id: String,
    pub date: NaiveDate,
    pub amount: i64,
    pub payee_name: String,
    pub memo: Option<String>,
    pub category_id: Option<String>,
    pub cleared: Option<ClearedState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub hidden: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryGroup {
    pub name: String,
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Rule,
    FuzzyRule,
    Generative,
    None,
}

impl Method {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::FuzzyRule => "fuzzy-rule",
            Self::Generative => "generative",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub category_id: Option<String>,
    pub category_name: Option<String>,
    pub confidence: f64,
    pub method: Method,
}

impl ClassificationResult {
    pub fn none() -> Self {
        Self {
            category_id: None,
            category_name: None,
            confidence: 0.0,
            method: Method::None,
        }
    }
}

/// Static per-person configuration used to attribute emails and pick accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub venmo_account: Option<String>,
    #[serde(default)]
    pub amazon_account: Option<String>,
    /// Set when the user's Amazon account is shared with other people.
    #[serde(default)]
    pub requires_recipient_validation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn candidate(source: Source, amount: Option<i64>) -> CandidateTransaction {
        CandidateTransaction {
            source,
            external_reference: None,
            amount_milliunits: amount,
            occurred_at: NaiveDate::from_ymd_opt(2025, 12, 9)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            details: Details::Peer {
                counterparty: "Jane Doe".to_string(),
                note: None,
            },
            memo_text: "You paid Jane Doe".to_string(),
            raw_subject: String::new(),
            raw_message_id: "1".to_string(),
        }
    }

    #[test]
    fn test_sign_follows_direction() {
        assert_eq!(candidate(Source::OrderPurchase, Some(19_990)).signed_milliunits(), Some(-19_990));
        assert_eq!(candidate(Source::OrderReturn, Some(19_990)).signed_milliunits(), Some(19_990));
        assert_eq!(candidate(Source::PeerSent, Some(42_500)).signed_milliunits(), Some(-42_500));
        assert_eq!(candidate(Source::PeerReceived, Some(42_500)).signed_milliunits(), Some(42_500));
    }

    #[test]
    fn test_zero_or_missing_amount_has_no_sign() {
        assert_eq!(candidate(Source::PeerSent, Some(0)).signed_milliunits(), None);
        assert_eq!(candidate(Source::OrderPurchase, None).signed_milliunits(), None);
    }

    #[test]
    fn test_peer_classification_text_combines_counterparty_and_memo() {
        let c = candidate(Source::PeerSent, Some(1000));
        assert_eq!(
            c.classification_text().as_deref(),
            Some("Jane Doe You paid Jane Doe")
        );
    }

    #[test]
    fn test_order_prefers_subject_item() {
        let mut c = candidate(Source::OrderPurchase, Some(1000));
        c.details = Details::Order {
            items: vec!["Parsed Item".to_string()],
            subject_item: Some("Subject Item...".to_string()),
            order_url: None,
        };
        assert_eq!(c.primary_item(), Some("Subject Item..."));
        assert_eq!(c.classification_text().as_deref(), Some("Subject Item..."));
    }

    #[test]
    fn test_mail_state_roundtrips_through_str() {
        for state in [MailState::Processed, MailState::Matched, MailState::Created] {
            assert_eq!(MailState::parse(state.as_str()), Some(state));
        }
        assert_eq!(MailState::parse("archived"), None);
    }
}
