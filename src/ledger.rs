use chrono::NaiveDate;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PennyError, Result};
use crate::models::{Account, Category, CategoryGroup, ClearedState, LedgerEntry, NewTransaction};

const YNAB_API: &str = "https://api.ynab.com/v1";

/// The budgeting ledger as seen by the pipeline.
pub trait Ledger {
    fn list_transactions(&self, since: NaiveDate) -> Result<Vec<LedgerEntry>>;
    fn create_transaction(&self, txn: &NewTransaction) -> Result<LedgerEntry>;
    /// Resubmits the whole record with the new memo.
    fn update_memo(&self, entry: &LedgerEntry, memo: &str) -> Result<LedgerEntry>;
    fn update_category(&self, entry: &LedgerEntry, category_id: &str) -> Result<LedgerEntry>;
    fn list_accounts(&self) -> Result<Vec<Account>>;
    fn list_categories(&self) -> Result<Vec<CategoryGroup>>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct TransactionsData {
    transactions: Vec<WireTransaction>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    transaction: WireTransaction,
}

#[derive(Debug, Deserialize)]
struct AccountsData {
    accounts: Vec<WireAccount>,
}

#[derive(Debug, Deserialize)]
struct CategoriesData {
    category_groups: Vec<WireCategoryGroup>,
}

#[derive(Debug, Deserialize)]
struct WireTransaction {
    id: String,
    date: String,
    amount: i64,
    #[serde(default)]
    memo: Option<String>,
    #[serde(default)]
    cleared: String,
    #[serde(default)]
    approved: bool,
    account_id: String,
    #[serde(default)]
    payee_name: Option<String>,
    #[serde(default)]
    category_id: Option<String>,
    #[serde(default)]
    category_name: Option<String>,
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct WireAccount {
    id: String,
    name: String,
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct WireCategoryGroup {
    name: String,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    categories: Vec<WireCategory>,
}

#[derive(Debug, Deserialize)]
struct WireCategory {
    id: String,
    name: String,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    deleted: bool,
}

/// Body of a create or full update. `approved` is never sent.
#[derive(Debug, Serialize, PartialEq)]
struct SaveTransaction<'a> {
    account_id: &'a str,
    date: String,
    amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    payee_name: Option<&'a str>,
    memo: Option<&'a str>,
    category_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cleared: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct SaveWrapper<'a> {
    transaction: SaveTransaction<'a>,
}

impl WireTransaction {
    fn into_entry(self) -> Result<LedgerEntry> {
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
            .map_err(|e| PennyError::Other(format!("bad transaction date '{}': {e}", self.date)))?;
        Ok(LedgerEntry {
            id: self.id,
            account_id: self.account_id,
            date,
            amount: self.amount,
            payee_name: self.payee_name,
            memo: self.memo,
            category_id: self.category_id,
            category_name: self.category_name,
            approved: self.approved,
            cleared: ClearedState::parse(&self.cleared),
        })
    }
}

fn entries_from(data: TransactionsData) -> Result<Vec<LedgerEntry>> {
    data.transactions
        .into_iter()
        .filter(|t| !t.deleted)
        .map(WireTransaction::into_entry)
        .collect()
}

fn groups_from(data: CategoriesData) -> Vec<CategoryGroup> {
    data.category_groups
        .into_iter()
        .filter(|g| !g.deleted)
        .map(|g| CategoryGroup {
            name: g.name,
            categories: g
                .categories
                .into_iter()
                .map(|c| Category {
                    id: c.id,
                    name: c.name,
                    hidden: c.hidden || g.hidden,
                    deleted: c.deleted,
                })
                .collect(),
        })
        .collect()
}

fn full_record<'a>(entry: &'a LedgerEntry, memo: Option<&'a str>, category_id: Option<&'a str>) -> SaveTransaction<'a> {
    SaveTransaction {
        account_id: &entry.account_id,
        date: entry.date.format("%Y-%m-%d").to_string(),
        amount: entry.amount,
        payee_name: entry.payee_name.as_deref(),
        memo,
        category_id,
        cleared: Some(entry.cleared.as_str()),
    }
}

// ---------------------------------------------------------------------------
// YNAB over HTTP
// ---------------------------------------------------------------------------

pub struct YnabClient {
    http: Client,
    budget_id: String,
}

impl YnabClient {
    pub fn new(token: &str, budget_id: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| PennyError::MissingCredential("YNAB_ACCESS_TOKEN"))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        let http = Client::builder().default_headers(headers).build()?;
        Ok(Self {
            http,
            budget_id: budget_id.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{YNAB_API}/budgets/{}/{path}", self.budget_id)
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(PennyError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let envelope: Envelope<T> = response.json()?;
        Ok(envelope.data)
    }
}

impl Ledger for YnabClient {
    fn list_transactions(&self, since: NaiveDate) -> Result<Vec<LedgerEntry>> {
        let request = self
            .http
            .get(self.url("transactions"))
            .query(&[("since_date", since.format("%Y-%m-%d").to_string())]);
        let entries = entries_from(self.send(request)?)?;
        debug!(count = entries.len(), since = %since, "fetched ledger transactions");
        Ok(entries)
    }

    fn create_transaction(&self, txn: &NewTransaction) -> Result<LedgerEntry> {
        let body = SaveWrapper {
            transaction: SaveTransaction {
                account_id: &txn.account_id,
                date: txn.date.format("%Y-%m-%d").to_string(),
                amount: txn.amount,
                payee_name: Some(&txn.payee_name),
                memo: txn.memo.as_deref(),
                category_id: txn.category_id.as_deref(),
                cleared: txn.cleared.map(|c| c.as_str()),
            },
        };
        let data: TransactionData = self.send(self.http.post(self.url("transactions")).json(&body))?;
        data.transaction.into_entry()
    }

    fn update_memo(&self, entry: &LedgerEntry, memo: &str) -> Result<LedgerEntry> {
        let body = SaveWrapper {
            transaction: full_record(entry, Some(memo), entry.category_id.as_deref()),
        };
        let path = format!("transactions/{}", entry.id);
        let data: TransactionData = self.send(self.http.put(self.url(&path)).json(&body))?;
        data.transaction.into_entry()
    }

    fn update_category(&self, entry: &LedgerEntry, category_id: &str) -> Result<LedgerEntry> {
        let body = SaveWrapper {
            transaction: full_record(entry, entry.memo.as_deref(), Some(category_id)),
        };
        let path = format!("transactions/{}", entry.id);
        let data: TransactionData = self.send(self.http.put(self.url(&path)).json(&body))?;
        data.transaction.into_entry()
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let data: AccountsData = self.send(self.http.get(self.url("accounts")))?;
        Ok(data
            .accounts
            .into_iter()
            .filter(|a| !a.deleted)
            .map(|a| Account { id: a.id, name: a.name })
            .collect())
    }

    fn list_categories(&self) -> Result<Vec<CategoryGroup>> {
        let data: CategoriesData = self.send(self.http.get(self.url("categories")))?;
        Ok(groups_from(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transactions_drop_deleted_and_map_fields() {
        let json = r#"{"data": {"transactions": [
            {"id": "t1", "date": "2025-12-08", "amount": -25000, "memo": null, "cleared": "cleared",
             "approved": false, "account_id": "a1", "payee_name": "AMAZON.COM", "category_id": null,
             "category_name": null, "deleted": false, "flag_color": null},
            {"id": "t2", "date": "2025-12-09", "amount": -1000, "cleared": "uncleared",
             "approved": true, "account_id": "a1", "deleted": true}
        ], "server_knowledge": 12}}"#;
        let envelope: Envelope<TransactionsData> = serde_json::from_str(json).unwrap();
        let entries = entries_from(envelope.data).unwrap();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.id, "t1");
        assert_eq!(e.amount, -25_000);
        assert_eq!(e.date, NaiveDate::from_ymd_opt(2025, 12, 8).unwrap());
        assert_eq!(e.payee_name.as_deref(), Some("AMAZON.COM"));
        assert_eq!(e.cleared, ClearedState::Cleared);
        assert!(!e.approved);
    }

    #[test]
    fn test_hidden_group_hides_its_categories() {
        let json = r#"{"data": {"category_groups": [
            {"name": "Everyday", "hidden": false, "deleted": false, "categories": [
                {"id": "c1", "name": "Pet", "hidden": false, "deleted": false},
                {"id": "c2", "name": "Old", "hidden": true, "deleted": false}]},
            {"name": "Archive", "hidden": true, "deleted": false, "categories": [
                {"id": "c3", "name": "Boat", "hidden": false, "deleted": false}]},
            {"name": "Gone", "hidden": false, "deleted": true, "categories": []}
        ]}}"#;
        let envelope: Envelope<CategoriesData> = serde_json::from_str(json).unwrap();
        let groups = groups_from(envelope.data);
        assert_eq!(groups.len(), 2);
        assert!(!groups[0].categories[0].hidden);
        assert!(groups[0].categories[1].hidden);
        assert!(groups[1].categories[0].hidden);
    }

    #[test]
    fn test_full_record_resubmits_everything_but_approval() {
        let entry = LedgerEntry {
            id: "t1".to_string(),
            account_id: "a1".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 12, 8).unwrap(),
            amount: -25_000,
            payee_name: Some("Amazon".to_string()),
            memo: Some("old".to_string()),
            category_id: Some("c1".to_string()),
            category_name: Some("Pet".to_string()),
            approved: true,
            cleared: ClearedState::Reconciled,
        };
        let body = SaveWrapper {
            transaction: full_record(&entry, Some("new memo"), entry.category_id.as_deref()),
        };
        let value = serde_json::to_value(&body).unwrap();
        let txn = &value["transaction"];
        assert_eq!(txn["memo"], "new memo");
        assert_eq!(txn["category_id"], "c1");
        assert_eq!(txn["amount"], -25_000);
        assert_eq!(txn["date"], "2025-12-08");
        assert_eq!(txn["cleared"], "reconciled");
        assert!(txn.get("approved").is_none());
    }
}
