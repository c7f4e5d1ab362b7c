//! Line reconciliation engine
//!
//! Matches a bank statement line against existing receivables/payables, a
//! freshly created payment, or write-offs, and derives the balanced journal
//! entries. Every public operation runs inside one store transaction: either
//! all generated payments, entries and line links commit together, or none
//! do.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::reconciliation::currency::{apply_currency, balancing_line, CurrencyContext};
use crate::traits::*;
use crate::types::*;

/// A move line to settle against an existing open item. The referenced
/// journal item is matched partially when the given debit/credit is lower
/// than its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartSpec {
    pub name: String,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    /// Existing receivable/payable journal item to reconcile
    pub journal_line_id: String,
}

/// A residual amount to post to a designated account instead of matching it
/// against an existing open item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOffSpec {
    pub name: String,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    pub account_id: String,
}

/// The reconciliation engine, generic over the persistence/ledger backend
pub struct ReconciliationEngine<S> {
    store: S,
    converter: Arc<dyn CurrencyConverter>,
    /// Journal overrides for write-off accounts. The source system routed a
    /// handful of accounts to dedicated journals through hard-coded
    /// identifiers; that mapping is environment data, so it is carried as
    /// configuration here. Unmapped accounts use the statement's journal.
    write_off_routing: HashMap<String, String>,
}

impl<S: StatementStore + LedgerPosting> ReconciliationEngine<S> {
    /// Create an engine over the given store and rate collaborator
    pub fn new(store: S, converter: Arc<dyn CurrencyConverter>) -> Self {
        Self {
            store,
            converter,
            write_off_routing: HashMap::new(),
        }
    }

    /// Route write-offs on `account_id` to `journal_id` instead of the
    /// statement's own journal
    pub fn route_write_off(&mut self, account_id: impl Into<String>, journal_id: impl Into<String>) {
        self.write_off_routing
            .insert(account_id.into(), journal_id.into());
    }

    /// Match a statement line with existing payments and/or open
    /// receivables/payables and/or write-offs.
    ///
    /// With a known counterparty a payment is created and posted, and its
    /// non-liquidity legs are reconciled together with the supplied
    /// counterpart items and write-off legs. Without one, a single journal
    /// entry is built directly from the line plus the write-off legs.
    pub async fn reconcile(
        &mut self,
        line_id: &str,
        counterparts: &[CounterpartSpec],
        payment_line_ids: &[String],
        write_offs: &[WriteOffSpec],
    ) -> ReconcileResult<()> {
        self.store.begin().await?;
        match self
            .reconcile_inner(line_id, counterparts, payment_line_ids, write_offs)
            .await
        {
            Ok(()) => self.store.commit().await,
            Err(err) => {
                self.store.rollback().await?;
                Err(err)
            }
        }
    }

    async fn reconcile_inner(
        &mut self,
        line_id: &str,
        counterparts: &[CounterpartSpec],
        payment_line_ids: &[String],
        write_offs: &[WriteOffSpec],
    ) -> ReconcileResult<()> {
        let zero = BigDecimal::from(0);
        let mut line = self.require_line(line_id).await?;
        let statement = self.require_statement(&line.statement_id).await?;
        let journal = self.require_journal(&statement.journal_id).await?;
        let company = self.store.company().await?;
        let statement_currency = journal
            .currency
            .clone()
            .unwrap_or_else(|| company.currency.clone());

        if line.is_reconciled() {
            return Err(ReconcileError::OverReconciled(line.id.clone()));
        }
        for id in payment_line_ids {
            let item = self.require_journal_line(id).await?;
            if item.statement_line_id.is_some() {
                return Err(ReconcileError::AlreadyReconciled);
            }
        }
        let mut counterpart_items = Vec::with_capacity(counterparts.len());
        for spec in counterparts {
            let item = self.require_journal_line(&spec.journal_line_id).await?;
            if item.reconciled {
                return Err(ReconcileError::AlreadyReconciled);
            }
            let matched = (&spec.credit - &spec.debit).abs();
            if matched > item.balance().abs() {
                return Err(ReconcileError::Validation(format!(
                    "cannot match {} against journal item '{}': it exceeds the item's residual",
                    matched, item.id
                )));
            }
            counterpart_items.push(item);
        }
        // Netting unrelated open items would corrupt both balances; the
        // matched items must share one account.
        let distinct_accounts: HashSet<&str> = counterpart_items
            .iter()
            .map(|l| l.account_id.as_str())
            .collect();
        if distinct_accounts.len() > 1 {
            return Err(ReconcileError::MixedAccounts);
        }
        if let Some(account_id) = distinct_accounts.iter().next() {
            if let Some(account) = self.store.get_account(account_id).await? {
                if !account.reconcilable {
                    return Err(ReconcileError::Validation(format!(
                        "account '{}' does not allow reconciling open items",
                        account.name
                    )));
                }
            }
        }

        // Receivable/payable kinds involved, to infer the partner type
        let mut kinds: HashSet<AccountKind> = HashSet::new();
        for account_id in counterpart_items
            .iter()
            .map(|l| l.account_id.clone())
            .chain(write_offs.iter().map(|w| w.account_id.clone()))
        {
            if let Some(account) = self.store.get_account(&account_id).await? {
                if matches!(account.kind, AccountKind::Receivable | AccountKind::Payable) {
                    kinds.insert(account.kind);
                }
            }
        }

        let partner = match &line.partner_id {
            Some(id) => Some(self.require_partner(id).await?),
            None => None,
        };
        let entry_date = statement.accounting_date.unwrap_or(line.date);
        let entry_reference = entry_ref(statement.name.as_deref(), line.reference.as_deref());

        let Some(partner) = partner else {
            // No known counterparty: one entry built directly from the line,
            // one leg for the line's own account movement plus the write-off
            // legs; posting enforces the double-entry invariant.
            let mut entry =
                JournalEntry::new(journal.id.clone(), entry_date, entry_reference.clone());
            if let Some(name) = &line.move_name {
                entry.name = Some(name.clone());
            }
            let account_id = if line.amount > zero {
                journal.default_credit_account.clone()
            } else {
                journal.default_debit_account.clone()
            };
            let ctx = CurrencyContext {
                line: &line,
                company_currency: &company.currency,
                statement_currency: &statement_currency,
                partner_currency: None,
            };
            let mut own = JournalLine::new(
                line.name.clone(),
                account_id,
                positive_part(&line.amount),
                negative_part(&line.amount),
            );
            own.statement_line_id = Some(line.id.clone());
            apply_currency(&mut own, &ctx, &*self.converter, line.date)?;
            entry.lines.push(own);
            for spec in write_offs {
                let mut leg = JournalLine::new(
                    spec.name.clone(),
                    spec.account_id.clone(),
                    spec.debit.clone(),
                    spec.credit.clone(),
                );
                leg.statement_line_id = Some(line.id.clone());
                apply_currency(&mut leg, &ctx, &*self.converter, line.date)?;
                entry.lines.push(leg);
            }
            self.store.save_entry(&entry).await?;
            let name = self.store.post(&entry.id).await?;
            line.entry_ids = vec![entry.id.clone()];
            line.move_name = Some(name);
            self.store.save_line(&line).await?;
            return Ok(());
        };

        // Known counterparty: payment + reconciliation closure.
        // Keep the line's visual position as its sequence.
        let siblings = self.store.statement_lines(&statement.id).await?;
        if let Some(pos) = siblings.iter().position(|l| l.id == line.id) {
            line.sequence = (pos + 1) as i32;
        }

        let total = line.amount.clone();
        let mut candidates: Vec<JournalLine> = Vec::new();

        if !statement_currency.is_zero(&total) {
            let partner_type = if kinds.len() == 1 {
                if kinds.contains(&AccountKind::Receivable) {
                    PartnerType::Customer
                } else {
                    PartnerType::Supplier
                }
            } else if total < zero {
                PartnerType::Supplier
            } else {
                PartnerType::Customer
            };
            let direction = if total > zero {
                PaymentDirection::Inbound
            } else {
                PaymentDirection::Outbound
            };
            let mut payment = Payment::new(
                statement
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Bank Statement {}", line.date)),
                direction,
                partner_type.clone(),
                journal.id.clone(),
                line.date,
                total.abs(),
                statement_currency.clone(),
            );
            payment.partner_id = Some(partner.id.clone());
            payment.communication = Some(line.name.clone());
            payment.statement_line_id = Some(line.id.clone());

            let mut entry =
                JournalEntry::new(journal.id.clone(), entry_date, entry_reference.clone());
            if let Some(name) = &line.move_name {
                entry.name = Some(name.clone());
            }
            let liquidity_account = if total > zero {
                journal.default_debit_account.clone()
            } else {
                journal.default_credit_account.clone()
            };
            let partner_account = match partner_type {
                PartnerType::Customer => partner.receivable_account.clone(),
                PartnerType::Supplier => partner.payable_account.clone(),
            };
            let mut liquidity = JournalLine::new(
                line.name.clone(),
                liquidity_account,
                positive_part(&total),
                negative_part(&total),
            );
            let mut partner_leg = JournalLine::new(
                line.name.clone(),
                partner_account,
                negative_part(&total),
                positive_part(&total),
            );
            for leg in [&mut liquidity, &mut partner_leg] {
                leg.partner_id = Some(partner.id.clone());
                leg.statement_line_id = Some(line.id.clone());
                leg.payment_id = Some(payment.id.clone());
            }
            // The payment is denominated in the statement currency, so its
            // legs ignore the line-level transaction currency.
            let mut neutral = line.clone();
            neutral.currency = None;
            neutral.amount_currency = zero.clone();
            let payment_ctx = CurrencyContext {
                line: &neutral,
                company_currency: &company.currency,
                statement_currency: &statement_currency,
                partner_currency: None,
            };
            apply_currency(&mut liquidity, &payment_ctx, &*self.converter, line.date)?;
            apply_currency(&mut partner_leg, &payment_ctx, &*self.converter, line.date)?;
            entry.lines.push(liquidity);
            entry.lines.push(partner_leg);
            self.store.save_entry(&entry).await?;
            let name = self.store.post(&entry.id).await?;
            payment.state = PaymentState::Posted;
            payment.entry_id = Some(entry.id.clone());
            self.store.save_payment(&payment).await?;
            line.entry_ids.push(entry.id.clone());
            line.move_name = Some(name);

            // Candidate legs for the closure: everything not sitting on the
            // journal's liquidity accounts
            let posted = self.require_entry(&entry.id).await?;
            for leg in posted.lines {
                if leg.account_id != journal.default_debit_account
                    && leg.account_id != journal.default_credit_account
                {
                    candidates.push(leg);
                }
            }
        }
        candidates.extend(counterpart_items.iter().cloned());

        let mut suppress_full_reconcile = false;
        let mut write_off_entry_ids = Vec::new();
        let reconcile_account = candidates.first().map(|l| l.account_id.clone());
        {
            let ctx = CurrencyContext {
                line: &line,
                company_currency: &company.currency,
                statement_currency: &statement_currency,
                partner_currency: partner.currency.as_ref(),
            };
            for spec in write_offs {
                // The caller states the write-off from the statement's point
                // of view; the ledger leg swaps the columns.
                let mut leg = JournalLine::new(
                    spec.name.clone(),
                    spec.account_id.clone(),
                    spec.credit.clone(),
                    spec.debit.clone(),
                );
                leg.partner_id = Some(partner.id.clone());
                leg.statement_line_id = Some(line.id.clone());
                apply_currency(&mut leg, &ctx, &*self.converter, line.date)?;

                if spec.account_id == partner.receivable_account
                    || spec.account_id == partner.payable_account
                {
                    // Residual pushed back onto the partner's own open-item
                    // account: accept a partial match, do not force the
                    // closure. Observed source behavior, kept as-is.
                    suppress_full_reconcile = true;
                    continue;
                }

                let target_journal = self
                    .write_off_routing
                    .get(&spec.account_id)
                    .cloned()
                    .unwrap_or_else(|| journal.id.clone());
                let account = reconcile_account.clone().ok_or_else(|| {
                    ReconcileError::Validation(
                        "a write-off needs journal items to balance against".to_string(),
                    )
                })?;
                let mut counter = JournalLine::new(
                    spec.name.clone(),
                    account,
                    leg.credit.clone(),
                    leg.debit.clone(),
                );
                counter.partner_id = Some(partner.id.clone());
                counter.statement_line_id = Some(line.id.clone());
                counter.amount_currency = -&leg.amount_currency;
                counter.currency = leg.currency.clone();

                let mut entry =
                    JournalEntry::new(target_journal, entry_date, entry_reference.clone());
                entry.lines.push(leg);
                entry.lines.push(counter.clone());
                self.store.save_entry(&entry).await?;
                self.store.post(&entry.id).await?;
                candidates.push(counter);
                write_off_entry_ids.push(entry.id);
            }
        }
        line.entry_ids.extend(write_off_entry_ids);

        // A lone payment leg has nothing to close against; with two or more
        // candidates the closure must come out complete, unless a residual
        // was pushed back onto the partner account.
        if !suppress_full_reconcile && candidates.len() > 1 {
            let ids: Vec<String> = candidates.iter().map(|l| l.id.clone()).collect();
            let outcome = self.store.reconcile(&ids).await?;
            if outcome.full_reconcile_id.is_none() {
                return Err(ReconcileError::ReconciliationIncomplete);
            }
        }
        self.store.save_line(&line).await?;
        Ok(())
    }

    /// Bulk auto-reconciliation for lines carrying a direct counterpart
    /// account: one posted payment and one balanced two-leg entry per line,
    /// skipping lines that already have journal items. Called by the
    /// lifecycle manager during confirmation and available as an explicit
    /// bulk action.
    pub async fn fast_counterpart_creation(&mut self, line_ids: &[String]) -> ReconcileResult<()> {
        self.store.begin().await?;
        match self.fast_counterpart_inner(line_ids).await {
            Ok(()) => self.store.commit().await,
            Err(err) => {
                self.store.rollback().await?;
                Err(err)
            }
        }
    }

    async fn fast_counterpart_inner(&mut self, line_ids: &[String]) -> ReconcileResult<()> {
        let zero = BigDecimal::from(0);
        let processed = self.store.processed_line_ids(line_ids).await?;
        let company = self.store.company().await?;

        for line_id in line_ids {
            let mut line = self.require_line(line_id).await?;
            let account_id = match &line.account_id {
                Some(id) => id.clone(),
                None => continue,
            };
            if processed.contains(line_id) || line.is_reconciled() {
                continue;
            }
            let statement = self.require_statement(&line.statement_id).await?;
            let journal = self.require_journal(&statement.journal_id).await?;
            let statement_currency = journal
                .currency
                .clone()
                .unwrap_or_else(|| company.currency.clone());
            let account = self
                .store
                .get_account(&account_id)
                .await?
                .ok_or_else(|| ReconcileError::AccountNotFound(account_id.clone()))?;
            let partner = match &line.partner_id {
                Some(id) => Some(self.require_partner(id).await?),
                None => None,
            };

            let total = line.amount.clone();
            let partner_type = if account.kind == AccountKind::Receivable {
                PartnerType::Customer
            } else {
                PartnerType::Supplier
            };
            let direction = if total > zero {
                PaymentDirection::Inbound
            } else {
                PaymentDirection::Outbound
            };
            let mut payment = Payment::new(
                statement
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Bank Statement {}", line.date)),
                direction,
                partner_type,
                journal.id.clone(),
                line.date,
                total.abs(),
                statement_currency.clone(),
            );
            payment.partner_id = line.partner_id.clone();
            payment.communication = Some(line.name.clone());
            payment.statement_line_id = Some(line.id.clone());
            // Fast-path payments are settled the moment they are created
            payment.state = PaymentState::Reconciled;

            let entry_date = statement.accounting_date.unwrap_or(line.date);
            let mut entry = JournalEntry::new(
                journal.id.clone(),
                entry_date,
                entry_ref(statement.name.as_deref(), line.reference.as_deref()),
            );
            if let Some(name) = &line.move_name {
                entry.name = Some(name.clone());
            }

            let ctx = CurrencyContext {
                line: &line,
                company_currency: &company.currency,
                statement_currency: &statement_currency,
                partner_currency: partner.as_ref().and_then(|p| p.currency.as_ref()),
            };
            let mut counterpart = JournalLine::new(
                line.name.clone(),
                account_id,
                negative_part(&total),
                positive_part(&total),
            );
            counterpart.partner_id = line.partner_id.clone();
            counterpart.statement_line_id = Some(line.id.clone());
            counterpart.payment_id = Some(payment.id.clone());
            apply_currency(&mut counterpart, &ctx, &*self.converter, line.date)?;

            let balance_amount = if total < zero {
                -&counterpart.debit
            } else {
                counterpart.credit.clone()
            };
            let mut balance = balancing_line(
                &ctx,
                &journal,
                std::slice::from_ref(&counterpart),
                &balance_amount,
            )?;
            balance.payment_id = Some(payment.id.clone());
            entry.lines.push(counterpart);
            entry.lines.push(balance);

            self.store.save_payment(&payment).await?;
            self.store.save_entry(&entry).await?;
            let name = self.store.post(&entry.id).await?;
            payment.entry_id = Some(entry.id.clone());
            payment.reference = Some(name.clone());
            self.store.save_payment(&payment).await?;
            line.move_name = Some(name);
            line.entry_ids = vec![entry.id.clone()];
            self.store.save_line(&line).await?;
        }
        Ok(())
    }

    /// Undo a line's reconciliation: cancel and delete its generated
    /// entries, dissolve their reconciliation marks and cancel the
    /// associated payment. Only legal while the statement is still open;
    /// the stored entry name is kept so renumbering stays idempotent.
    pub async fn cancel_reconciliation(&mut self, line_id: &str) -> ReconcileResult<()> {
        self.store.begin().await?;
        match self.cancel_inner(line_id).await {
            Ok(()) => self.store.commit().await,
            Err(err) => {
                self.store.rollback().await?;
                Err(err)
            }
        }
    }

    async fn cancel_inner(&mut self, line_id: &str) -> ReconcileResult<()> {
        let mut line = self.require_line(line_id).await?;
        let statement = self.require_statement(&line.statement_id).await?;
        if statement.state != StatementState::Open {
            return Err(ReconcileError::State(
                "reconciliation can only be cancelled while the statement is open".to_string(),
            ));
        }

        if line.partner_id.is_some() {
            if let Some(mut payment) = self.store.payment_for_line(&line.id).await? {
                if let Some(entry_id) = payment.entry_id.clone() {
                    self.dissolve_entry_marks(&entry_id).await?;
                }
                payment.state = PaymentState::Cancelled;
                self.store.save_payment(&payment).await?;
            }
        }
        for entry_id in line.entry_ids.clone() {
            if let Some(entry) = self.store.get_entry(&entry_id).await? {
                self.dissolve_entry_marks(&entry_id).await?;
                if entry.state == EntryState::Posted {
                    self.store.cancel(&entry_id).await?;
                }
                self.store.delete_entry(&entry_id).await?;
            }
        }
        line.entry_ids.clear();
        self.store.save_line(&line).await?;
        Ok(())
    }

    async fn dissolve_entry_marks(&mut self, entry_id: &str) -> ReconcileResult<()> {
        if let Some(entry) = self.store.get_entry(entry_id).await? {
            let marked: Vec<String> = entry
                .lines
                .iter()
                .filter(|l| l.reconciled || l.full_reconcile_id.is_some())
                .map(|l| l.id.clone())
                .collect();
            if !marked.is_empty() {
                self.store.remove_reconciliation(&marked).await?;
            }
        }
        Ok(())
    }

    async fn require_line(&self, id: &str) -> ReconcileResult<StatementLine> {
        self.store
            .get_line(id)
            .await?
            .ok_or_else(|| ReconcileError::LineNotFound(id.to_string()))
    }

    async fn require_statement(&self, id: &str) -> ReconcileResult<Statement> {
        self.store
            .get_statement(id)
            .await?
            .ok_or_else(|| ReconcileError::StatementNotFound(id.to_string()))
    }

    async fn require_journal(&self, id: &str) -> ReconcileResult<Journal> {
        self.store
            .get_journal(id)
            .await?
            .ok_or_else(|| ReconcileError::JournalNotFound(id.to_string()))
    }

    async fn require_partner(&self, id: &str) -> ReconcileResult<Partner> {
        self.store
            .get_partner(id)
            .await?
            .ok_or_else(|| ReconcileError::PartnerNotFound(id.to_string()))
    }

    async fn require_entry(&self, id: &str) -> ReconcileResult<JournalEntry> {
        self.store
            .get_entry(id)
            .await?
            .ok_or_else(|| ReconcileError::EntryNotFound(id.to_string()))
    }

    async fn require_journal_line(&self, id: &str) -> ReconcileResult<JournalLine> {
        self.store
            .get_journal_line(id)
            .await?
            .ok_or_else(|| ReconcileError::JournalLineNotFound(id.to_string()))
    }
}

/// Reference of a generated entry: statement name, line reference, or both
fn entry_ref(statement_name: Option<&str>, line_reference: Option<&str>) -> Option<String> {
    match (statement_name, line_reference) {
        (Some(name), Some(reference)) => Some(format!("{} - {}", name, reference)),
        (Some(name), None) => Some(name.to_string()),
        (None, Some(reference)) => Some(reference.to_string()),
        (None, None) => None,
    }
}

fn positive_part(amount: &BigDecimal) -> BigDecimal {
    if *amount > BigDecimal::from(0) {
        amount.clone()
    } else {
        BigDecimal::from(0)
    }
}

fn negative_part(amount: &BigDecimal) -> BigDecimal {
    if *amount < BigDecimal::from(0) {
        -amount
    } else {
        BigDecimal::from(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_ref_combines_statement_and_line_references() {
        assert_eq!(entry_ref(None, None), None);
        assert_eq!(entry_ref(Some("BNK/2024/0001"), None).as_deref(), Some("BNK/2024/0001"));
        assert_eq!(entry_ref(None, Some("INV-7")).as_deref(), Some("INV-7"));
        assert_eq!(
            entry_ref(Some("BNK/2024/0001"), Some("INV-7")).as_deref(),
            Some("BNK/2024/0001 - INV-7")
        );
    }

    #[test]
    fn sign_parts_split_a_signed_amount() {
        let amount = BigDecimal::from(-42);
        assert_eq!(positive_part(&amount), BigDecimal::from(0));
        assert_eq!(negative_part(&amount), BigDecimal::from(42));
    }
}
