use std::collections::HashSet;

use chrono::NaiveDate;

use crate::models::{CandidateTransaction, LedgerEntry};

/// Predicates an entry must satisfy besides the exact signed amount.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchCriteria<'a> {
    /// Inclusive day tolerance either side of the candidate date.
    pub window_days: i64,
    pub account_id: Option<&'a str>,
    /// Case-insensitive substring the payee must contain.
    pub payee_token: Option<&'a str>,
}

pub fn entry_matches(entry: &LedgerEntry, date: NaiveDate, amount: i64, criteria: &MatchCriteria) -> bool {
    if criteria.account_id.is_some_and(|a| a != entry.account_id) {
        return false;
    }
    if (entry.date - date).num_days().abs() > criteria.window_days {
        return false;
    }
    if entry.amount != amount {
        return false;
    }
    match criteria.payee_token {
        Some(token) => entry
            .payee_name
            .as_deref()
            .is_some_and(|p| p.to_lowercase().contains(&token.to_lowercase())),
        None => true,
    }
}

/// First entry, in slice order, satisfying every predicate. `None` when the
/// candidate has no usable amount.
pub fn find_match<'e, I>(candidate: &CandidateTransaction, entries: I, criteria: &MatchCriteria) -> Option<&'e LedgerEntry>
where
    I: IntoIterator<Item = &'e LedgerEntry>,
{
    let amount = candidate.signed_milliunits()?;
    let date = candidate.date();
    entries
        .into_iter()
        .find(|e| entry_matches(e, date, amount, criteria))
}

/// The run's ledger snapshot plus the set of entries already claimed by an
/// earlier candidate. Claimed entries never match again within the run.
#[derive(Debug, Default)]
pub struct MatchEngine {
    entries: Vec<LedgerEntry>,
    claimed: HashSet<String>,
}

impl MatchEngine {
    pub fn new(entries: Vec<LedgerEntry>) -> Self {
        Self {
            entries,
            claimed: HashSet::new(),
        }
    }

    pub fn find(&self, candidate: &CandidateTransaction, criteria: &MatchCriteria) -> Option<&LedgerEntry> {
        let unclaimed = self.entries.iter().filter(|e| !self.claimed.contains(&e.id));
        find_match(candidate, unclaimed, criteria)
    }

    pub fn claim(&mut self, entry_id: &str) {
        self.claimed.insert(entry_id.to_string());
    }

    /// Find and claim in one step, returning an owned copy of the entry.
    pub fn take(&mut self, candidate: &CandidateTransaction, criteria: &MatchCriteria) -> Option<LedgerEntry> {
        let found = self.find(candidate, criteria).cloned()?;
        self.claim(&found.id);
        Some(found)
    }

    /// Add an entry created during the run so later duplicates see it.
    pub fn push(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    /// Replace the stored copy after a successful update.
    pub fn replace(&mut self, entry: LedgerEntry) {
        if let Some(slot) = self.entries.iter_mut().find(|e| e.id == entry.id) {
            *slot = entry;
        }
    }
}
