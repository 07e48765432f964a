use chrono::{Duration, NaiveDate};
use tracing::{debug, info, warn};

use crate::categorizer::Classifier;
use crate::error::{PennyError, Result};
use crate::ledger::Ledger;
use crate::models::{LedgerEntry, Vendor};

const LINK_MARKER: &str = "Amazon Link:";
const RETURN_PREFIX: &str = "RETURN:";
const MIN_ITEM_LEN: usize = 4;

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub days: i64,
    /// Ledger account name, compared case-insensitively.
    pub account: Option<String>,
    pub skip_categorized: bool,
    pub dry_run: bool,
    pub vendor_token: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            days: 90,
            account: None,
            skip_categorized: false,
            dry_run: false,
            vendor_token: "amazon".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkStats {
    pub processed: usize,
    pub classified: usize,
    /// Entries that had a different category.
    pub updated: usize,
    /// Entries that had no category.
    pub newly_classified: usize,
    pub skipped: usize,
    pub no_match: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryChange {
    pub entry_id: String,
    pub date: NaiveDate,
    pub payee: String,
    pub from: Option<String>,
    pub to: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub stats: BulkStats,
    pub changes: Vec<CategoryChange>,
}

/// The item name out of a memo written by the order pipeline:
/// `"RETURN: Dog Food. Amazon Link: https://..."` gives `"Dog Food"`.
pub fn item_from_memo(memo: &str) -> Option<String> {
    let mut text = memo.trim();
    if let Some(rest) = text.strip_prefix(RETURN_PREFIX) {
        text = rest.trim_start();
    }
    if let Some((before, _)) = text.split_once(LINK_MARKER) {
        text = before;
    }
    let text = text.trim().trim_end_matches("...").trim_end_matches('.').trim();
    (text.chars().count() >= MIN_ITEM_LEN).then(|| text.to_string())
}

fn is_vendor_payee(entry: &LedgerEntry, token: &str) -> bool {
    !token.is_empty()
        && entry
            .payee_name
            .as_deref()
            .is_some_and(|p| p.to_lowercase().contains(&token.to_lowercase()))
}

/// What the classifier should read for an entry, and the vendor override
/// that applies to it.
fn classification_input(entry: &LedgerEntry, token: &str) -> (String, Option<Vendor>) {
    if is_vendor_payee(entry, token) {
        if let Some(item) = entry.memo.as_deref().and_then(item_from_memo) {
            return (item, Some(Vendor::Amazon));
        }
    }
    (entry.text(), None)
}

fn account_filter(ledger: &dyn Ledger, name: &str) -> Result<String> {
    ledger
        .list_accounts()?
        .into_iter()
        .find(|a| a.name.eq_ignore_ascii_case(name))
        .map(|a| a.id)
        .ok_or_else(|| PennyError::Other(format!("Unknown ledger account: {name}")))
}

/// Reclassify recent ledger entries independently of any email.
pub fn bulk_categorize(
    ledger: &dyn Ledger,
    classifier: &Classifier,
    options: &ReconcileOptions,
    today: NaiveDate,
) -> Result<ReconcileReport> {
    let since = today - Duration::days(options.days);
    let mut entries = ledger.list_transactions(since)?;
    if let Some(name) = options.account.as_deref() {
        let account_id = account_filter(ledger, name)?;
        entries.retain(|e| e.account_id == account_id);
    }
    info!(count = entries.len(), since = %since, dry_run = options.dry_run, "reconciling ledger entries");

    let mut report = ReconcileReport::default();
    for entry in &entries {
        let stats = &mut report.stats;
        stats.processed += 1;
        if options.skip_categorized && entry.category_id.is_some() {
            stats.skipped += 1;
            continue;
        }
        let (text, vendor) = classification_input(entry, &options.vendor_token);
        if text.is_empty() {
            stats.no_match += 1;
            continue;
        }
        let result = classifier.classify(&text, vendor);
        let (Some(category_id), Some(category_name)) = (result.category_id, result.category_name) else {
            stats.no_match += 1;
            continue;
        };
        stats.classified += 1;
        if entry.category_id.as_deref() == Some(category_id.as_str()) {
            continue;
        }
        debug!(entry_id = %entry.id, text = %text, category = %category_name, method = result.method.label(), "recategorizing");

        if !options.dry_run {
            if let Err(e) = ledger.update_category(entry, &category_id) {
                warn!(entry_id = %entry.id, error = %e, "category update failed");
                stats.errors += 1;
                continue;
            }
        }
        if entry.category_id.is_some() {
            stats.updated += 1;
        } else {
            stats.newly_classified += 1;
        }
        report.changes.push(CategoryChange {
            entry_id: entry.id.clone(),
            date: entry.date,
            payee: entry.payee_name.clone().unwrap_or_default(),
            from: entry.category_name.clone(),
            to: category_name,
        });
    }
    Ok(report)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::categorizer::CategoryIndex;
    use crate::models::{Account, Category, CategoryGroup, ClearedState, NewTransaction};
    use crate::rules::starter_config;

    /// In-memory ledger recording every mutation.
    #[derive(Default)]
    pub(crate) struct FakeLedger {
        pub entries: RefCell<Vec<LedgerEntry>>,
        pub accounts: Vec<Account>,
        pub groups: Vec<CategoryGroup>,
        pub created: RefCell<Vec<NewTransaction>>,
        pub memo_updates: RefCell<Vec<(String, String)>>,
        pub category_updates: RefCell<Vec<(String, String)>>,
        pub fail_writes: bool,
    }

    impl FakeLedger {
        pub fn mutations(&self) -> usize {
            self.created.borrow().len() + self.memo_updates.borrow().len() + self.category_updates.borrow().len()
        }

        fn category_name(&self, id: &str) -> Option<String> {
            self.groups
                .iter()
                .flat_map(|g| &g.categories)
                .find(|c| c.id == id)
                .map(|c| c.name.clone())
        }

        fn store(&self, entry: LedgerEntry) -> LedgerEntry {
            let mut entries = self.entries.borrow_mut();
            match entries.iter_mut().find(|e| e.id == entry.id) {
                Some(slot) => *slot = entry.clone(),
                None => entries.push(entry.clone()),
            }
            entry
        }
    }

    impl Ledger for FakeLedger {
        fn list_transactions(&self, since: NaiveDate) -> Result<Vec<LedgerEntry>> {
            Ok(self
                .entries
                .borrow()
                .iter()
                .filter(|e| e.date >= since)
                .cloned()
                .collect())
        }

        fn create_transaction(&self, txn: &NewTransaction) -> Result<LedgerEntry> {
            if self.fail_writes {
                return Err(PennyError::Api { status: 500, body: "boom".to_string() });
            }
            self.created.borrow_mut().push(txn.clone());
            let entry = LedgerEntry {
                id: format!("new-{}", self.created.borrow().len()),
                account_id: txn.account_id.clone(),
                date: txn.date,
                amount: txn.amount,
                payee_name: Some(txn.payee_name.clone()),
                memo: txn.memo.clone(),
                category_name: txn.category_id.as_deref().and_then(|c| self.category_name(c)),
                category_id: txn.category_id.clone(),
                approved: false,
                cleared: txn.cleared.unwrap_or_default(),
            };
            Ok(self.store(entry))
        }

        fn update_memo(&self, entry: &LedgerEntry, memo: &str) -> Result<LedgerEntry> {
            if self.fail_writes {
                return Err(PennyError::Api { status: 500, body: "boom".to_string() });
            }
            self.memo_updates.borrow_mut().push((entry.id.clone(), memo.to_string()));
            let mut next = entry.clone();
            next.memo = Some(memo.to_string());
            Ok(self.store(next))
        }

        fn update_category(&self, entry: &LedgerEntry, category_id: &str) -> Result<LedgerEntry> {
            if self.fail_writes {
                return Err(PennyError::Api { status: 500, body: "boom".to_string() });
            }
            self.category_updates
                .borrow_mut()
                .push((entry.id.clone(), category_id.to_string()));
            let mut next = entry.clone();
            next.category_id = Some(category_id.to_string());
            next.category_name = self.category_name(category_id);
            Ok(self.store(next))
        }

        fn list_accounts(&self) -> Result<Vec<Account>> {
            Ok(self.accounts.clone())
        }

        fn list_categories(&self) -> Result<Vec<CategoryGroup>> {
            Ok(self.groups.clone())
        }
    }

    pub(crate) fn groups() -> Vec<CategoryGroup> {
        let cat = |id: &str, name: &str| Category {
            id: id.to_string(),
            name: name.to_string(),
            hidden: false,
            deleted: false,
        };
        vec![CategoryGroup {
            name: "Everyday".to_string(),
            categories: vec![
                cat("c-pet", "Pet"),
                cat("c-groceries", "Groceries"),
                cat("c-dining", "Dining Out"),
                cat("c-household", "Household"),
            ],
        }]
    }

    pub(crate) fn ledger_entry(id: &str, date: &str, amount: i64, payee: &str, memo: Option<&str>) -> LedgerEntry {
        LedgerEntry {
            id: id.to_string(),
            account_id: "acct-card".to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            amount,
            payee_name: Some(payee.to_string()),
            memo: memo.map(str::to_string),
            category_id: None,
            category_name: None,
            approved: false,
            cleared: ClearedState::Cleared,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()
    }

    #[test]
    fn test_item_from_memo() {
        assert_eq!(
            item_from_memo("Organic Dog Food. Amazon Link: https://www.amazon.com/x").as_deref(),
            Some("Organic Dog Food")
        );
        assert_eq!(
            item_from_memo("RETURN: Cat Litter Box... Amazon Link: https://x").as_deref(),
            Some("Cat Litter Box")
        );
        assert_eq!(item_from_memo("Paper Towels...").as_deref(), Some("Paper Towels"));
        assert_eq!(item_from_memo("Amazon Link: https://x"), None);
        assert_eq!(item_from_memo("TV"), None);
    }

    #[test]
    fn test_bulk_categorize_updates_only_changed_categories() {
        let mut already = ledger_entry("t3", "2025-12-03", -5_000, "Chewy", Some("dog treats"));
        already.category_id = Some("c-pet".to_string());
        already.category_name = Some("Pet".to_string());
        let mut wrong = ledger_entry("t4", "2025-12-04", -8_000, "Safeway", Some("groceries run"));
        wrong.category_id = Some("c-household".to_string());
        wrong.category_name = Some("Household".to_string());
        let ledger = FakeLedger {
            entries: RefCell::new(vec![
                ledger_entry(
                    "t1",
                    "2025-12-01",
                    -25_000,
                    "AMAZON.COM",
                    Some("Organic Dog Food 5lb. Amazon Link: https://www.amazon.com/gp/x"),
                ),
                ledger_entry("t2", "2025-12-02", -1_000, "Mystery Vendor", None),
                already,
                wrong,
            ]),
            groups: groups(),
            ..FakeLedger::default()
        };
        let config = starter_config();
        let index = CategoryIndex::from_groups(&groups());
        let classifier = Classifier::new(&config, &index, None);

        let report = bulk_categorize(&ledger, &classifier, &ReconcileOptions::default(), today()).unwrap();
        let stats = &report.stats;
        assert_eq!(stats.processed, 4);
        assert_eq!(stats.classified, 3);
        assert_eq!(stats.newly_classified, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.no_match, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(
            *ledger.category_updates.borrow(),
            vec![
                ("t1".to_string(), "c-pet".to_string()),
                ("t4".to_string(), "c-groceries".to_string()),
            ]
        );
        assert_eq!(report.changes[1].from.as_deref(), Some("Household"));
        assert_eq!(report.changes[1].to, "Groceries");
    }

    #[test]
    fn test_bulk_categorize_dry_run_and_skip_categorized() {
        let mut done = ledger_entry("t2", "2025-12-02", -4_000, "Safeway", Some("groceries"));
        done.category_id = Some("c-household".to_string());
        let ledger = FakeLedger {
            entries: RefCell::new(vec![
                ledger_entry("t1", "2025-12-01", -4_000, "Safeway", Some("groceries")),
                done,
            ]),
            groups: groups(),
            ..FakeLedger::default()
        };
        let config = starter_config();
        let index = CategoryIndex::from_groups(&groups());
        let classifier = Classifier::new(&config, &index, None);
        let options = ReconcileOptions {
            skip_categorized: true,
            dry_run: true,
            ..ReconcileOptions::default()
        };
        let report = bulk_categorize(&ledger, &classifier, &options, today()).unwrap();
        assert_eq!(report.stats.skipped, 1);
        assert_eq!(report.stats.newly_classified, 1);
        assert_eq!(report.changes.len(), 1);
        assert_eq!(ledger.mutations(), 0);
    }

    #[test]
    fn test_bulk_categorize_account_filter() {
        let mut other = ledger_entry("t2", "2025-12-02", -4_000, "Safeway", Some("groceries"));
        other.account_id = "acct-venmo".to_string();
        let ledger = FakeLedger {
            entries: RefCell::new(vec![
                ledger_entry("t1", "2025-12-01", -4_000, "Safeway", Some("groceries")),
                other,
            ]),
            accounts: vec![
                Account { id: "acct-card".to_string(), name: "Visa".to_string() },
                Account { id: "acct-venmo".to_string(), name: "Venmo".to_string() },
            ],
            groups: groups(),
            ..FakeLedger::default()
        };
        let config = starter_config();
        let index = CategoryIndex::from_groups(&groups());
        let classifier = Classifier::new(&config, &index, None);
        let options = ReconcileOptions {
            account: Some("venmo".to_string()),
            ..ReconcileOptions::default()
        };
        let report = bulk_categorize(&ledger, &classifier, &options, today()).unwrap();
        assert_eq!(report.stats.processed, 1);
        assert_eq!(report.changes[0].entry_id, "t2");

        let missing = ReconcileOptions {
            account: Some("Checking".to_string()),
            ..ReconcileOptions::default()
        };
        assert!(bulk_categorize(&ledger, &classifier, &missing, today()).is_err());
    }

    #[test]
    fn test_bulk_categorize_counts_write_failures() {
        let ledger = FakeLedger {
            entries: RefCell::new(vec![ledger_entry("t1", "2025-12-01", -4_000, "Safeway", Some("groceries"))]),
            groups: groups(),
            fail_writes: true,
            ..FakeLedger::default()
        };
        let config = starter_config();
        let index = CategoryIndex::from_groups(&groups());
        let classifier = Classifier::new(&config, &index, None);
        let report = bulk_categorize(&ledger, &classifier, &ReconcileOptions::default(), today()).unwrap();
        assert_eq!(report.stats.errors, 1);
        assert_eq!(report.stats.newly_classified, 0);
        assert!(report.changes.is_empty());
    }
}
