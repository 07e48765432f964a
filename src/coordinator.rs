use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use tracing::{debug, error, info, warn};

use crate::categorizer::Classifier;
use crate::ledger::Ledger;
use crate::mailbox::{FetchFilter, Mailbox};
use crate::matcher::{MatchCriteria, MatchEngine};
use crate::models::{CandidateTransaction, ClearedState, LedgerEntry, MailState, NewTransaction, RawEmail, Vendor};
use crate::parsers::{self, ParserKind};
use crate::reconcile::{self, BulkStats, ReconcileOptions};
use crate::router::UserRouter;
use crate::settings::Settings;

/// Order in which vendor groups are worked through.
const VENDOR_ORDER: [ParserKind; 2] = [ParserKind::AmazonOrder, ParserKind::VenmoPayment];

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Log what would change without touching the ledger or the mailbox.
    pub dry_run: bool,
    /// Fetch emails already marked processed.
    pub reprocess: bool,
    pub lookback_days: i64,
    pub fetch_limit: usize,
    pub match_window_days: i64,
    pub duplicate_window_days: i64,
    pub vendor_token: String,
    /// Reconciliation pass to run after the email batch.
    pub reconcile: Option<ReconcileOptions>,
}

impl RunOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            dry_run: false,
            reprocess: false,
            lookback_days: settings.lookback_days,
            fetch_limit: settings.fetch_limit,
            match_window_days: settings.match_window_days,
            duplicate_window_days: settings.duplicate_window_days,
            vendor_token: settings.vendor_token.clone(),
            reconcile: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub fetched: usize,
    pub orders: usize,
    pub payments: usize,
    pub unrecognized: usize,
    pub parse_misses: usize,
    pub unattributed: usize,
    pub candidates: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub memos_updated: usize,
    pub created: usize,
    pub duplicates: usize,
    pub categorized: usize,
    pub errors: usize,
    pub reconcile: Option<BulkStats>,
}

/// Mutable state of one run.
struct RunState {
    engine: MatchEngine,
    /// Lowercased ledger account name to id.
    accounts: HashMap<String, String>,
    summary: RunSummary,
    synthetic_ids: usize,
}

/// What to record against an email once it has been handled. `None` leaves
/// the email unmarked so a later run picks it up again.
type Marks = Option<Vec<MailState>>;

pub struct BatchCoordinator<'a> {
    mailbox: &'a mut dyn Mailbox,
    ledger: &'a dyn Ledger,
    router: &'a UserRouter,
    classifier: &'a Classifier<'a>,
    options: RunOptions,
}

impl<'a> BatchCoordinator<'a> {
    pub fn new(
        mailbox: &'a mut dyn Mailbox,
        ledger: &'a dyn Ledger,
        router: &'a UserRouter,
        classifier: &'a Classifier<'a>,
        options: RunOptions,
    ) -> Self {
        Self {
            mailbox,
            ledger,
            router,
            classifier,
            options,
        }
    }

    /// Process one batch. Individual failures are logged and counted; the run
    /// always completes with a summary.
    pub fn run(&mut self, today: NaiveDate) -> RunSummary {
        let since = today - Duration::days(self.options.lookback_days);
        let filter = FetchFilter {
            since: Some(since),
            limit: self.options.fetch_limit,
            include_reprocessed: self.options.reprocess,
        };
        let emails = match self.mailbox.fetch_candidates(&filter) {
            Ok(emails) => emails,
            Err(e) => {
                error!(error = %e, "mailbox fetch failed");
                return RunSummary {
                    errors: 1,
                    ..RunSummary::default()
                };
            }
        };
        info!(count = emails.len(), since = %since, dry_run = self.options.dry_run, "fetched candidate emails");

        let mut state = self.snapshot(since);
        state.summary.fetched = emails.len();

        let mut grouped: Vec<(ParserKind, &RawEmail)> = Vec::new();
        for email in &emails {
            match parsers::get_for_email(email) {
                Some(kind) => grouped.push((kind, email)),
                None => {
                    info!(email_id = %email.id, subject = %email.subject, "unrecognized email, skipping");
                    state.summary.unrecognized += 1;
                }
            }
        }

        for kind in VENDOR_ORDER {
            for (_, email) in grouped.iter().filter(|(k, _)| *k == kind) {
                let marks = match kind {
                    ParserKind::AmazonOrder => {
                        state.summary.orders += 1;
                        self.process_order(email, &mut state)
                    }
                    ParserKind::VenmoPayment => {
                        state.summary.payments += 1;
                        self.process_payment(email, &mut state)
                    }
                };
                if let Some(marks) = marks {
                    self.mark(email, &marks, &mut state.summary);
                }
            }
        }

        if let Some(options) = self.options.reconcile.clone() {
            let options = ReconcileOptions {
                dry_run: self.options.dry_run,
                ..options
            };
            match reconcile::bulk_categorize(self.ledger, self.classifier, &options, today) {
                Ok(report) => state.summary.reconcile = Some(report.stats),
                Err(e) => {
                    error!(error = %e, "reconciliation pass failed");
                    state.summary.errors += 1;
                }
            }
        }
        state.summary
    }

    /// Ledger transactions and accounts, fetched once per run.
    fn snapshot(&self, since: NaiveDate) -> RunState {
        let widest = self.options.match_window_days.max(self.options.duplicate_window_days);
        let ledger_since = since - Duration::days(widest);
        let entries = self.ledger.list_transactions(ledger_since).unwrap_or_else(|e| {
            warn!(error = %e, "could not list ledger transactions, matching against nothing");
            Vec::new()
        });
        let accounts = match self.ledger.list_accounts() {
            Ok(accounts) => accounts
                .into_iter()
                .map(|a| (a.name.to_lowercase(), a.id))
                .collect(),
            Err(e) => {
                warn!(error = %e, "could not list ledger accounts");
                HashMap::new()
            }
        };
        debug!(entries = entries.len(), since = %ledger_since, "ledger snapshot");
        RunState {
            engine: MatchEngine::new(entries),
            accounts,
            summary: RunSummary::default(),
            synthetic_ids: 0,
        }
    }

    fn mark(&mut self, email: &RawEmail, marks: &[MailState], summary: &mut RunSummary) {
        if self.options.dry_run {
            return;
        }
        for state in marks {
            if let Err(e) = self.mailbox.mark_state(&email.id, *state) {
                warn!(email_id = %email.id, state = state.as_str(), error = %e, "could not mark email");
                summary.errors += 1;
            }
        }
    }

    /// Resolve the sending user and the ledger account for `vendor`. `Err`
    /// means the email cannot be attributed.
    fn attribute(&self, email: &RawEmail, vendor: Vendor, state: &RunState) -> Result<(String, Option<String>), ()> {
        let Some(user) = self.router.identify(email) else {
            info!(email_id = %email.id, subject = %email.subject, "no user for email, leaving unmarked");
            return Err(());
        };
        let text = parsers::render_text(&email.body);
        if !self.router.validate_recipient(&user.user_id, &text) {
            info!(email_id = %email.id, user = %user.user_id, "recipient not confirmed on shared account, leaving unmarked");
            return Err(());
        }
        let account = self.router.resolve_account(&user.user_id, vendor).and_then(|name| {
            let id = state.accounts.get(&name.to_lowercase()).cloned();
            if id.is_none() {
                warn!(user = %user.user_id, account = %name, "configured account not found in ledger");
            }
            id
        });
        Ok((user.user_id.clone(), account))
    }

    fn process_order(&self, email: &RawEmail, state: &mut RunState) -> Marks {
        let candidates = ParserKind::AmazonOrder.parse(email);
        if candidates.is_empty() {
            state.summary.parse_misses += 1;
            return Some(vec![MailState::Processed]);
        }
        let Ok((user_id, account_id)) = self.attribute(email, Vendor::Amazon, state) else {
            state.summary.unattributed += 1;
            return None;
        };

        let mut matched_any = false;
        let mut failed = false;
        for candidate in &candidates {
            state.summary.candidates += 1;
            let criteria = MatchCriteria {
                window_days: self.options.match_window_days,
                account_id: account_id.as_deref(),
                payee_token: Some(self.options.vendor_token.as_str()),
            };
            let Some(entry) = state.engine.take(candidate, &criteria) else {
                info!(
                    email_id = %email.id,
                    order = candidate.external_reference.as_deref().unwrap_or("-"),
                    amount = ?candidate.amount(),
                    "no ledger entry for order"
                );
                state.summary.unmatched += 1;
                continue;
            };
            state.summary.matched += 1;
            matched_any = true;
            info!(email_id = %email.id, user = %user_id, entry_id = %entry.id, "order matched ledger entry");
            if self.enrich_order(candidate, entry, state).is_err() {
                failed = true;
            }
        }

        if failed {
            None
        } else if matched_any {
            Some(vec![MailState::Processed, MailState::Matched])
        } else {
            Some(vec![MailState::Processed])
        }
    }

    /// Write the order memo and category onto a matched entry, each only when
    /// it differs from what the ledger already holds.
    fn enrich_order(&self, candidate: &CandidateTransaction, entry: LedgerEntry, state: &mut RunState) -> Result<(), ()> {
        let mut current = entry;
        if current.memo.as_deref() != Some(candidate.memo_text.as_str()) {
            if self.options.dry_run {
                info!(entry_id = %current.id, memo = %candidate.memo_text, "would update memo");
            } else {
                current = self.ledger.update_memo(&current, &candidate.memo_text).map_err(|e| {
                    error!(entry_id = %current.id, error = %e, "memo update failed");
                    state.summary.errors += 1;
                })?;
                state.engine.replace(current.clone());
            }
            state.summary.memos_updated += 1;
        }

        let Some(text) = candidate.classification_text() else {
            return Ok(());
        };
        let result = self.classifier.classify(&text, Some(candidate.source.vendor()));
        let Some(category_id) = result.category_id else {
            debug!(entry_id = %current.id, text = %text, "order item left uncategorized");
            return Ok(());
        };
        if current.category_id.as_deref() == Some(category_id.as_str()) {
            return Ok(());
        }
        if self.options.dry_run {
            info!(entry_id = %current.id, category = ?result.category_name, "would update category");
        } else {
            let updated = self.ledger.update_category(&current, &category_id).map_err(|e| {
                error!(entry_id = %current.id, error = %e, "category update failed");
                state.summary.errors += 1;
            })?;
            state.engine.replace(updated);
        }
        info!(
            entry_id = %current.id,
            category = result.category_name.as_deref().unwrap_or("-"),
            method = result.method.label(),
            confidence = result.confidence,
            "categorized order"
        );
        state.summary.categorized += 1;
        Ok(())
    }

    fn process_payment(&self, email: &RawEmail, state: &mut RunState) -> Marks {
        let candidates = ParserKind::VenmoPayment.parse(email);
        if candidates.is_empty() {
            state.summary.parse_misses += 1;
            return Some(vec![MailState::Processed]);
        }
        let Ok((user_id, account)) = self.attribute(email, Vendor::Venmo, state) else {
            state.summary.unattributed += 1;
            return None;
        };
        let Some(account_id) = account else {
            warn!(email_id = %email.id, user = %user_id, "no payment account for user, leaving unmarked");
            state.summary.unattributed += 1;
            return None;
        };

        let mut marks = vec![MailState::Processed];
        for candidate in &candidates {
            state.summary.candidates += 1;
            let criteria = MatchCriteria {
                window_days: self.options.duplicate_window_days,
                account_id: Some(account_id.as_str()),
                payee_token: None,
            };
            if let Some(existing) = state.engine.find(candidate, &criteria) {
                info!(email_id = %email.id, entry_id = %existing.id, "payment already in ledger");
                state.summary.duplicates += 1;
                if !marks.contains(&MailState::Matched) {
                    marks.push(MailState::Matched);
                }
                continue;
            }
            match self.create_payment(candidate, &account_id, state) {
                Some(entry) => {
                    state.engine.push(entry);
                    if !marks.contains(&MailState::Created) {
                        marks.push(MailState::Created);
                    }
                }
                None => return None,
            }
        }
        Some(marks)
    }

    fn create_payment(&self, candidate: &CandidateTransaction, account_id: &str, state: &mut RunState) -> Option<LedgerEntry> {
        let amount = candidate.signed_milliunits()?;
        let payee = candidate.counterparty().unwrap_or_default().to_string();
        let category = candidate
            .classification_text()
            .map(|text| self.classifier.classify(&text, Some(candidate.source.vendor())))
            .and_then(|r| r.category_id.map(|id| (id, r.category_name, r.method)));

        let txn = NewTransaction {
            account_id: account_id.to_string(),
            date: candidate.date(),
            amount,
            payee_name: payee,
            memo: Some(candidate.memo_text.clone()),
            category_id: category.as_ref().map(|(id, _, _)| id.clone()),
            cleared: Some(ClearedState::Cleared),
        };

        let entry = if self.options.dry_run {
            info!(payee = %txn.payee_name, amount = txn.amount, date = %txn.date, "would create payment");
            state.synthetic_ids += 1;
            LedgerEntry {
                id: format!("dry-run-{}", state.synthetic_ids),
                account_id: txn.account_id.clone(),
                date: txn.date,
                amount: txn.amount,
                payee_name: Some(txn.payee_name.clone()),
                memo: txn.memo.clone(),
                category_id: txn.category_id.clone(),
                category_name: category.as_ref().and_then(|(_, name, _)| name.clone()),
                approved: false,
                cleared: ClearedState::Cleared,
            }
        } else {
            match self.ledger.create_transaction(&txn) {
                Ok(entry) => entry,
                Err(e) => {
                    error!(payee = %txn.payee_name, amount = txn.amount, error = %e, "could not create payment");
                    state.summary.errors += 1;
                    return None;
                }
            }
        };
        info!(entry_id = %entry.id, payee = %txn.payee_name, amount = txn.amount, "created payment");
        state.summary.created += 1;
        if let Some((_, name, method)) = &category {
            debug!(category = name.as_deref().unwrap_or("-"), method = method.label(), "payment categorized");
            state.summary.categorized += 1;
        }
        Some(entry)
    }
}
