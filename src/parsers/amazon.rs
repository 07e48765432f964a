use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use scraper::{Html, Selector};

use super::{collapse_ws, now, parse_amount, parse_header_date, render_text, strip_forward_prefix, ParseMiss};
use crate::models::{CandidateTransaction, Details, RawEmail, Source};

const SITE_ROOT: &str = "https://www.amazon.com";
const ORDER_DETAILS_URL: &str = "https://www.amazon.com/gp/your-account/order-details?orderID=";
const MAX_LINK_ITEMS: usize = 5;
const MEMO_ITEMS: usize = 3;

/// Product-link texts that are UI chrome, not item names. Compared lowercased.
const LINK_BOILERPLATE: &[&str] = &[
    "view order",
    "view or edit order",
    "view order details",
    "order details",
    "track package",
    "your orders",
    "buy it again",
    "write a product review",
    "return or replace items",
    "view or manage order",
];

const ITEM_PREFIXES: &[&str] = &["View or edit order", "View order"];

fn order_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{3}-\d{7}-\d{7})\b").expect("invalid order id regex"))
}

fn order_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)Order\s*#[^\d]{0,20}(\d{3}-\d{7}-\d{7})").expect("invalid order marker regex")
    })
}

fn grand_total_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)Grand\s+Total:?\s*\$?\s*([\d,]+\.\d{2})").expect("invalid grand total regex")
    })
}

/// Labeled totals in priority order.
fn labeled_total_res() -> &'static [Regex; 3] {
    static RES: OnceLock<[Regex; 3]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"(?i)Order\s+Total:?\s*\$?\s*([\d,]+\.\d{2})").expect("invalid order total regex"),
            Regex::new(r"(?i)Grand\s+Total:?\s*\$?\s*([\d,]+\.\d{2})").expect("invalid grand total regex"),
            Regex::new(r"(?i)\bTotal:?\s*\$?\s*([\d,]+\.\d{2})").expect("invalid total regex"),
        ]
    })
}

fn dollar_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\s*([\d,]+\.\d{2})").expect("invalid dollar regex"))
}

fn forwarded_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Date:\s*[A-Za-z]+,\s*([A-Za-z]+\.?\s+\d{1,2},\s+\d{4})")
            .expect("invalid forwarded date regex")
    })
}

fn product_href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(?:dp|gp/product)/[A-Z0-9]+").expect("invalid product href regex"))
}

fn return_subject_res() -> &'static [Regex; 3] {
    static RES: OnceLock<[Regex; 3]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"(?i)return request confirmed for\s+(.+)$").expect("invalid return regex"),
            Regex::new(r"(?i)return drop[- ]?off confirmation for\s+(.+)$").expect("invalid drop off regex"),
            Regex::new(r"(?i)your refund for\s+(.+)$").expect("invalid refund regex"),
        ]
    })
}

fn return_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:returns?|returned|refunds?|refunded)\b").expect("invalid return word regex"))
}

fn anchor_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("a[href]").expect("invalid anchor selector"))
}

/// One order found by the multi-order scan.
#[derive(Debug, Clone, PartialEq)]
struct OrderBlock {
    order_id: String,
    amount: Option<i64>,
    first_item: Option<String>,
}

pub fn parse(email: &RawEmail) -> Result<Vec<CandidateTransaction>, ParseMiss> {
    let text = render_text(&email.body);
    let is_return = is_return_subject(&email.subject);
    let source = if is_return {
        Source::OrderReturn
    } else {
        Source::OrderPurchase
    };
    let occurred_at = order_date(&text, &email.date_header);
    let subject_item = if is_return {
        return_item_from_subject(&email.subject)
    } else {
        ordered_item_from_subject(&email.subject)
    };

    let blocks = scan_orders(&text);
    if blocks.len() >= 2 {
        return Ok(blocks
            .into_iter()
            .map(|block| {
                let order_url = Some(order_details_url(&block.order_id));
                // The subject names a single item; each order keeps its own when found.
                let (items, subject_item) = match block.first_item {
                    Some(item) => (vec![item], None),
                    None => (Vec::new(), subject_item.clone()),
                };
                build(email, source, Some(block.order_id), block.amount, occurred_at, items, subject_item, order_url)
            })
            .collect());
    }

    let order_id = order_id_re()
        .captures(&text)
        .or_else(|| order_id_re().captures(&email.body))
        .map(|c| c[1].to_string());
    let amount = order_total(&text);
    if order_id.is_none() && amount.is_none() {
        return Err(ParseMiss::NothingExtracted);
    }
    let items = product_links(&email.body);
    let order_url = order_id
        .as_deref()
        .map(order_details_url)
        .or_else(|| order_details_link(&email.body));
    Ok(vec![build(
        email,
        source,
        order_id,
        amount,
        occurred_at,
        items,
        subject_item,
        order_url,
    )])
}

#[allow(clippy::too_many_arguments)]
fn build(
    email: &RawEmail,
    source: Source,
    order_id: Option<String>,
    amount: Option<i64>,
    occurred_at: NaiveDateTime,
    items: Vec<String>,
    subject_item: Option<String>,
    order_url: Option<String>,
) -> CandidateTransaction {
    let memo_text = format_memo(
        source == Source::OrderReturn,
        subject_item.as_deref(),
        &items,
        order_url.as_deref(),
        order_id.as_deref(),
    );
    CandidateTransaction {
        source,
        external_reference: order_id,
        amount_milliunits: amount,
        occurred_at,
        details: Details::Order {
            items,
            subject_item,
            order_url,
        },
        memo_text,
        raw_subject: email.subject.clone(),
        raw_message_id: email.id.clone(),
    }
}

pub fn order_details_url(order_id: &str) -> String {
    format!("{ORDER_DETAILS_URL}{order_id}")
}

/// Memo written onto the matched ledger entry: `<item>. Amazon Link: <url>`.
pub fn format_memo(
    is_return: bool,
    subject_item: Option<&str>,
    items: &[String],
    order_url: Option<&str>,
    order_id: Option<&str>,
) -> String {
    let mut parts = Vec::new();
    if let Some(item) = subject_item.filter(|s| !s.is_empty()) {
        parts.push(with_period(item));
    } else if !items.is_empty() {
        let mut shown = items
            .iter()
            .take(MEMO_ITEMS)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        if items.len() > MEMO_ITEMS {
            shown.push_str(&format!(" +{} more", items.len() - MEMO_ITEMS));
        }
        parts.push(with_period(&shown));
    }
    if let Some(url) = order_url {
        parts.push(format!("Amazon Link: {url}"));
    }
    let memo = if parts.is_empty() {
        format!("Order {}", order_id.unwrap_or("unknown"))
    } else {
        parts.join(" ")
    };
    if is_return {
        format!("RETURN: {memo}")
    } else {
        memo
    }
}

fn with_period(text: &str) -> String {
    if text.ends_with('.') {
        text.to_string()
    } else {
        format!("{text}.")
    }
}

/// Whole-word `return`/`refund` outside an `Ordered:` confirmation, whose
/// quoted item name may contain either word.
fn is_return_subject(subject: &str) -> bool {
    let subject = clean_subject(subject);
    if subject.to_lowercase().starts_with("ordered:") {
        return false;
    }
    return_word_re().is_match(&subject)
}

fn clean_subject(subject: &str) -> String {
    let stripped = strip_forward_prefix(subject);
    collapse_ws(&html_escape::decode_html_entities(&stripped))
}

fn trim_quotes(s: &str) -> String {
    s.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '\u{201c}' | '\u{201d}'))
        .trim()
        .to_string()
}

fn return_item_from_subject(subject: &str) -> Option<String> {
    let subject = clean_subject(subject);
    return_subject_res()
        .iter()
        .find_map(|re| re.captures(&subject))
        .map(|c| trim_quotes(&c[1]))
        .filter(|item| !item.is_empty())
}

/// `Ordered: "Item name..." and 2 more items` yields `Item name...`.
fn ordered_item_from_subject(subject: &str) -> Option<String> {
    let subject = clean_subject(subject);
    let idx = subject.find("Ordered:")?;
    let rest = subject[idx + "Ordered:".len()..].trim();
    let item = match rest.chars().next() {
        Some(open @ ('"' | '\u{201c}')) => {
            let inner = &rest[open.len_utf8()..];
            let end = inner
                .find(|c: char| c == '"' || c == '\u{201d}')
                .unwrap_or(inner.len());
            inner[..end].trim().to_string()
        }
        _ => trim_quotes(rest),
    };
    (!item.is_empty()).then_some(item)
}

fn order_date(text: &str, date_header: &str) -> NaiveDateTime {
    forwarded_date(text)
        .or_else(|| parse_header_date(date_header))
        .unwrap_or_else(now)
}

/// Date line of the original message embedded in a forward.
fn forwarded_date(text: &str) -> Option<NaiveDateTime> {
    let caps = forwarded_date_re().captures(text)?;
    let raw = collapse_ws(&caps[1].replace('.', ""));
    ["%b %d, %Y", "%B %d, %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&raw, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Labeled total by priority, else the first dollar amount in the text.
fn order_total(text: &str) -> Option<i64> {
    labeled_total_res()
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|c| parse_amount(&c[1]))
        .or_else(|| {
            dollar_re()
                .captures(text)
                .and_then(|c| parse_amount(&c[1]))
        })
}

/// Pair every `Order #` marker with the nearest following unclaimed
/// `Grand Total`. Repeated order ids keep their first occurrence.
fn scan_orders(text: &str) -> Vec<OrderBlock> {
    let totals: Vec<(usize, Option<i64>)> = grand_total_re()
        .captures_iter(text)
        .filter_map(|c| Some((c.get(0)?.start(), parse_amount(&c[1]))))
        .collect();
    let mut claimed = vec![false; totals.len()];
    let mut seen = HashSet::new();
    let mut blocks = Vec::new();

    for caps in order_marker_re().captures_iter(text) {
        let Some(marker) = caps.get(0) else { continue };
        let order_id = caps[1].to_string();
        if !seen.insert(order_id.clone()) {
            continue;
        }
        let Some(idx) = (0..totals.len()).find(|&i| !claimed[i] && totals[i].0 >= marker.end()) else {
            continue;
        };
        claimed[idx] = true;
        let (total_start, amount) = totals[idx];
        blocks.push(OrderBlock {
            order_id,
            amount,
            first_item: first_item_in(&text[marker.end()..total_start]),
        });
    }
    blocks
}

/// Capitalized line right before the first `Quantity:` label.
fn first_item_in(window: &str) -> Option<String> {
    let idx = window.find("Quantity:")?;
    let line = window[..idx]
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()?;
    let mut name = line.to_string();
    for prefix in ITEM_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            name = rest.trim().to_string();
        }
    }
    let capitalized = name
        .chars()
        .next()
        .is_some_and(|c| c.is_uppercase() || c.is_ascii_digit());
    (capitalized && name.chars().count() > 2).then_some(name)
}

fn is_link_boilerplate(text: &str) -> bool {
    let lower = text.to_lowercase();
    LINK_BOILERPLATE.contains(&lower.as_str()) || lower.starts_with("order #")
}

/// Item names from product-detail links.
fn product_links(body: &str) -> Vec<String> {
    let doc = Html::parse_document(body);
    let mut items: Vec<String> = Vec::new();
    for anchor in doc.select(anchor_selector()) {
        let href = anchor.value().attr("href").unwrap_or_default();
        if !product_href_re().is_match(href) {
            continue;
        }
        let text = collapse_ws(&anchor.text().collect::<Vec<_>>().join(" "));
        if text.chars().count() <= 5 || is_link_boilerplate(&text) || items.contains(&text) {
            continue;
        }
        items.push(text);
        if items.len() == MAX_LINK_ITEMS {
            break;
        }
    }
    items
}

/// Absolute URL of the first order-details anchor. Site-relative hrefs are
/// rooted at the storefront; anything else is not a usable link.
fn order_details_link(body: &str) -> Option<String> {
    let doc = Html::parse_document(body);
    let found = doc
        .select(anchor_selector())
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| href.contains("order-details") || href.contains("orderID="))
        .find_map(|href| {
            if href.starts_with("http") {
                Some(href.to_string())
            } else if href.starts_with('/') {
                Some(format!("{SITE_ROOT}{href}"))
            } else {
                None
            }
        });
    found
}
