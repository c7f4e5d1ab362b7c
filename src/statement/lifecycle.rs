//! Statement lifecycle: creation, line encoding, balance validation and
//! confirmation

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::reconciliation::ReconciliationEngine;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_line;

/// Orchestrates the statement lifecycle over a pluggable store.
///
/// Statements start open, accumulate lines, and are confirmed once every
/// line produced journal entries and the declared closing balance matches
/// the computed one. Balances are recomputed explicitly after every mutation
/// rather than derived on read.
pub struct StatementManager<S> {
    store: S,
    sequences: Box<dyn SequenceGenerator>,
    converter: Arc<dyn CurrencyConverter>,
    audit: Box<dyn AuditLog>,
}

impl<S: StatementStore + LedgerPosting + Clone> StatementManager<S> {
    pub fn new(
        store: S,
        sequences: Box<dyn SequenceGenerator>,
        converter: Arc<dyn CurrencyConverter>,
    ) -> Self {
        Self {
            store,
            sequences,
            converter,
            audit: Box::new(NoopAudit),
        }
    }

    /// Replace the default no-op audit trail
    pub fn with_audit(mut self, audit: Box<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    /// Reconciliation engine sharing this manager's store and rates
    pub fn engine(&self) -> ReconciliationEngine<S> {
        ReconciliationEngine::new(self.store.clone(), self.converter.clone())
    }

    /// Create an open statement on a journal. The opening balance chains
    /// from the declared closing balance of the journal's latest statement.
    pub async fn create_statement(
        &mut self,
        journal_id: &str,
        date: NaiveDate,
    ) -> ReconcileResult<Statement> {
        let journal = self.require_journal(journal_id).await?;
        let mut statement = Statement::new(Uuid::new_v4().to_string(), &journal.id, date);
        if let Some(previous) = self.store.last_statement_for_journal(&journal.id).await? {
            statement.balance_start = previous.balance_end;
        }
        statement.recompute_balances(&[]);
        self.store.save_statement(&statement).await?;
        Ok(statement)
    }

    /// Assign the statement its reference name from the journal's sequence.
    /// Idempotent: a statement that already has a name keeps it.
    pub async fn open(&mut self, statement_id: &str) -> ReconcileResult<Statement> {
        let mut statement = self.require_statement(statement_id).await?;
        if statement.name.is_none() {
            let journal = self.require_journal(&statement.journal_id).await?;
            statement.name = Some(self.sequences.next(&journal.sequence_key, statement.date));
            self.store.save_statement(&statement).await?;
        }
        Ok(statement)
    }

    /// Add a line to an open statement and recompute its balances.
    /// Unsequenced lines are appended after the existing ones.
    pub async fn add_line(&mut self, mut line: StatementLine) -> ReconcileResult<StatementLine> {
        let mut statement = self.require_statement(&line.statement_id).await?;
        self.ensure_open(&statement)?;
        let journal = self.require_journal(&statement.journal_id).await?;
        let currency = self.statement_currency(&journal).await?;
        validate_line(&line, &journal, &currency)?;

        let lines = self.store.statement_lines(&statement.id).await?;
        if line.sequence == 0 {
            line.sequence = lines.iter().map(|l| l.sequence).max().unwrap_or(0) + 1;
        }
        self.store.save_line(&line).await?;
        self.recompute(&mut statement).await?;
        Ok(line)
    }

    /// Replace a line of an open statement and recompute the balances
    pub async fn update_line(&mut self, line: &StatementLine) -> ReconcileResult<()> {
        let existing = self.require_line(&line.id).await?;
        let mut statement = self.require_statement(&existing.statement_id).await?;
        self.ensure_open(&statement)?;
        let journal = self.require_journal(&statement.journal_id).await?;
        let currency = self.statement_currency(&journal).await?;
        validate_line(line, &journal, &currency)?;
        self.store.save_line(line).await?;
        self.recompute(&mut statement).await?;
        Ok(())
    }

    /// Remove a line from an open statement. Lines that already produced
    /// journal entries must have their reconciliation cancelled first.
    pub async fn remove_line(&mut self, line_id: &str) -> ReconcileResult<()> {
        let line = self.require_line(line_id).await?;
        let mut statement = self.require_statement(&line.statement_id).await?;
        self.ensure_open(&statement)?;
        if line.is_reconciled() {
            return Err(ReconcileError::State(
                "cancel the line's reconciliation before deleting it".to_string(),
            ));
        }
        self.store.delete_line(line_id).await?;
        self.recompute(&mut statement).await?;
        Ok(())
    }

    /// Write a cashbox count into the statement's opening or declared
    /// closing balance and recompute
    pub async fn apply_cashbox(
        &mut self,
        statement_id: &str,
        count: &crate::cashbox::CashboxCount,
        slot: crate::cashbox::BalanceSlot,
    ) -> ReconcileResult<Statement> {
        let mut statement = self.require_statement(statement_id).await?;
        self.ensure_open(&statement)?;
        count.apply(&mut statement, slot)?;
        self.recompute(&mut statement).await?;
        Ok(statement)
    }

    /// Validate an open statement and freeze it.
    ///
    /// Checks the closing balance (booking a cash profit/loss adjustment
    /// line on cash journals), auto-processes lines carrying a direct
    /// counterpart account, rejects remaining unprocessed non-zero lines,
    /// posts every generated draft entry and moves the statement to
    /// confirmed. Runs in one store transaction.
    pub async fn confirm(&mut self, statement_id: &str) -> ReconcileResult<Statement> {
        self.store.begin().await?;
        match self.confirm_inner(statement_id).await {
            Ok(statement) => {
                self.store.commit().await?;
                Ok(statement)
            }
            Err(err) => {
                self.store.rollback().await?;
                Err(err)
            }
        }
    }

    async fn confirm_inner(&mut self, statement_id: &str) -> ReconcileResult<Statement> {
        let mut statement = self.require_statement(statement_id).await?;
        if statement.state != StatementState::Open {
            return Err(ReconcileError::State(
                "only an open statement can be confirmed".to_string(),
            ));
        }
        let journal = self.require_journal(&statement.journal_id).await?;
        let currency = self.statement_currency(&journal).await?;

        self.balance_check(&mut statement, &journal, &currency)
            .await?;
        if statement.name.is_none() {
            statement.name = Some(self.sequences.next(&journal.sequence_key, statement.date));
            self.store.save_statement(&statement).await?;
        }

        // Auto-process lines that carry a direct counterpart account
        let lines = self.store.statement_lines(&statement.id).await?;
        let fast_ids: Vec<String> = lines
            .iter()
            .filter(|l| l.account_id.is_some() && !l.is_reconciled())
            .map(|l| l.id.clone())
            .collect();
        if !fast_ids.is_empty() {
            let mut engine = self.engine();
            engine.fast_counterpart_creation(&fast_ids).await?;
        }

        // Every line with a non-zero amount must have journal entries by
        // now; zero-amount lines are tolerated so imported statements can
        // be confirmed verbatim
        let lines = self.store.statement_lines(&statement.id).await?;
        let mut entry_ids: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for line in &lines {
            if !line.is_reconciled() && !currency.is_zero(&line.amount) {
                return Err(ReconcileError::UnprocessedLines);
            }
            for id in &line.entry_ids {
                if seen.insert(id.clone()) {
                    entry_ids.push(id.clone());
                }
            }
        }
        for entry_id in &entry_ids {
            let entry = self
                .store
                .get_entry(entry_id)
                .await?
                .ok_or_else(|| ReconcileError::EntryNotFound(entry_id.clone()))?;
            if entry.state == EntryState::Draft {
                self.store.post(entry_id).await?;
            }
        }
        let name = statement.name.clone().unwrap_or_default();
        self.audit.post_message(
            &statement.id,
            &format!("Statement {} confirmed, journal items were created.", name),
        );

        statement.state = StatementState::Confirmed;
        statement.date_done = Some(Utc::now().naive_utc());
        self.store.save_statement(&statement).await?;
        Ok(statement)
    }

    /// Delete an open statement and its lines. Reconciled lines block the
    /// deletion until their reconciliation is cancelled.
    pub async fn delete_statement(&mut self, statement_id: &str) -> ReconcileResult<()> {
        let statement = self.require_statement(statement_id).await?;
        self.ensure_open(&statement)?;
        let lines = self.store.statement_lines(&statement.id).await?;
        for line in &lines {
            if line.is_reconciled() {
                return Err(ReconcileError::State(
                    "cancel the lines' reconciliations before deleting the statement".to_string(),
                ));
            }
        }
        for line in &lines {
            self.store.delete_line(&line.id).await?;
        }
        self.store.delete_statement(&statement.id).await?;
        Ok(())
    }

    /// Whether every non-zero line of the statement has produced journal
    /// entries or carries a direct counterpart account (and will be
    /// auto-processed); zero-amount informational lines are ignored
    pub async fn all_lines_reconciled(&self, statement_id: &str) -> ReconcileResult<bool> {
        let statement = self.require_statement(statement_id).await?;
        let journal = self.require_journal(&statement.journal_id).await?;
        let currency = self.statement_currency(&journal).await?;
        let lines = self.store.statement_lines(statement_id).await?;
        Ok(lines
            .iter()
            .filter(|l| !currency.is_zero(&l.amount))
            .all(|l| l.is_reconciled() || l.account_id.is_some()))
    }

    /// Number of distinct journal entries generated by the statement's lines
    pub async fn entry_count(&self, statement_id: &str) -> ReconcileResult<usize> {
        let lines = self.store.statement_lines(statement_id).await?;
        let distinct: HashSet<&String> = lines.iter().flat_map(|l| l.entry_ids.iter()).collect();
        Ok(distinct.len())
    }

    /// Check the declared closing balance against the computed one.
    ///
    /// On cash journals a discrepancy books an extra adjustment line on the
    /// journal's profit or loss account, which absorbs the difference; on
    /// bank journals it is an error.
    async fn balance_check(
        &mut self,
        statement: &mut Statement,
        journal: &Journal,
        currency: &Currency,
    ) -> ReconcileResult<()> {
        let lines = self.store.statement_lines(&statement.id).await?;
        statement.recompute_balances(&lines);
        if statement.is_difference_zero(currency) {
            self.store.save_statement(statement).await?;
            return Ok(());
        }
        if journal.journal_type != JournalType::Cash {
            return Err(ReconcileError::BalanceMismatch {
                declared: statement.balance_end_real.clone(),
                computed: statement.balance_end.clone(),
            });
        }
        let (account, label) = if statement.difference < BigDecimal::from(0) {
            let account =
                journal
                    .loss_account
                    .clone()
                    .ok_or_else(|| ReconcileError::MissingAdjustmentAccount {
                        journal: journal.name.clone(),
                        side: "loss".to_string(),
                    })?;
            (account, "Loss")
        } else {
            let account =
                journal
                    .profit_account
                    .clone()
                    .ok_or_else(|| ReconcileError::MissingAdjustmentAccount {
                        journal: journal.name.clone(),
                        side: "profit".to_string(),
                    })?;
            (account, "Profit")
        };
        let mut adjustment = StatementLine::new(
            Uuid::new_v4().to_string(),
            &statement.id,
            format!("Cash difference observed during the counting ({})", label),
            statement.date,
            statement.difference.clone(),
        );
        adjustment.account_id = Some(account);
        adjustment.sequence = lines.iter().map(|l| l.sequence).max().unwrap_or(0) + 1;
        self.store.save_line(&adjustment).await?;

        let lines = self.store.statement_lines(&statement.id).await?;
        statement.recompute_balances(&lines);
        self.store.save_statement(statement).await?;
        Ok(())
    }

    async fn recompute(&mut self, statement: &mut Statement) -> ReconcileResult<()> {
        let lines = self.store.statement_lines(&statement.id).await?;
        statement.recompute_balances(&lines);
        self.store.save_statement(statement).await
    }

    async fn statement_currency(&self, journal: &Journal) -> ReconcileResult<Currency> {
        match &journal.currency {
            Some(currency) => Ok(currency.clone()),
            None => Ok(self.store.company().await?.currency),
        }
    }

    fn ensure_open(&self, statement: &Statement) -> ReconcileResult<()> {
        if statement.state != StatementState::Open {
            return Err(ReconcileError::State(
                "the statement is confirmed and can no longer be modified".to_string(),
            ));
        }
        Ok(())
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

    async fn require_line(&self, id: &str) -> ReconcileResult<StatementLine> {
        self.store
            .get_line(id)
            .await?
            .ok_or_else(|| ReconcileError::LineNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{FixedRateConverter, MemoryStore, SimpleSequences};
    use std::str::FromStr;
    use std::sync::Mutex;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn manager() -> StatementManager<MemoryStore> {
        let company = Company {
            id: "co".to_string(),
            name: "Test Co".to_string(),
            currency: Currency::new("EUR", 2),
        };
        let store = MemoryStore::new(company);
        store.add_journal(Journal::new("bank", "Bank", JournalType::Bank, "101401"));
        StatementManager::new(
            store,
            Box::new(SimpleSequences::new()),
            Arc::new(FixedRateConverter::new()),
        )
    }

    #[tokio::test]
    async fn balances_recompute_after_each_line_mutation() {
        let mut manager = manager();
        let statement = manager.create_statement("bank", date()).await.unwrap();

        let line = StatementLine::new("l1", &statement.id, "incoming wire", date(), dec("250.00"));
        manager.add_line(line.clone()).await.unwrap();
        let line2 = StatementLine::new("l2", &statement.id, "fee", date(), dec("-10.00"));
        manager.add_line(line2).await.unwrap();

        let stored = manager.require_statement(&statement.id).await.unwrap();
        assert_eq!(stored.total_entry_encoding, dec("240.00"));
        assert_eq!(stored.balance_end, dec("240.00"));
        assert_eq!(stored.difference, dec("-240.00"));

        manager.remove_line("l2").await.unwrap();
        let stored = manager.require_statement(&statement.id).await.unwrap();
        assert_eq!(stored.balance_end, dec("250.00"));
    }

    #[tokio::test]
    async fn opening_balance_chains_from_the_computed_closing_balance() {
        let mut manager = manager();
        let mut first = manager.create_statement("bank", date()).await.unwrap();
        first.balance_start = dec("100.00");
        // declared closing balance still disagrees with the computed one
        first.balance_end_real = dec("999.00");
        first.recompute_balances(&[]);
        manager.store.save_statement(&first).await.unwrap();

        let next = manager
            .create_statement("bank", NaiveDate::from_ymd_opt(2024, 4, 1).unwrap())
            .await
            .unwrap();
        assert_eq!(next.balance_start, dec("100.00"));
    }

    #[tokio::test]
    async fn all_lines_reconciled_ignores_zero_amount_lines() {
        let mut manager = manager();
        let statement = manager.create_statement("bank", date()).await.unwrap();
        let memo = StatementLine::new("l1", &statement.id, "memo", date(), dec("0.00"));
        manager.add_line(memo).await.unwrap();
        assert!(manager.all_lines_reconciled(&statement.id).await.unwrap());

        let wire = StatementLine::new("l2", &statement.id, "wire", date(), dec("75.00"));
        manager.add_line(wire).await.unwrap();
        assert!(!manager.all_lines_reconciled(&statement.id).await.unwrap());
    }

    #[tokio::test]
    async fn confirmation_posts_an_audit_note_even_without_entries() {
        let messages: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let mut manager = manager().with_audit(Box::new(RecordingAudit(messages.clone())));

        // empty statement, balances agree at zero
        let statement = manager.create_statement("bank", date()).await.unwrap();
        manager.confirm(&statement.id).await.unwrap();

        let messages = messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("confirmed, journal items were created"));
    }

    struct RecordingAudit(Arc<Mutex<Vec<String>>>);

    impl AuditLog for RecordingAudit {
        fn post_message(&self, _entity: &str, body: &str) {
            self.0.lock().unwrap_or_else(|e| e.into_inner()).push(body.to_string());
        }
    }

    #[tokio::test]
    async fn open_assigns_a_sequence_name_once() {
        let mut manager = manager();
        let statement = manager.create_statement("bank", date()).await.unwrap();
        assert!(statement.name.is_none());

        let opened = manager.open(&statement.id).await.unwrap();
        let name = opened.name.clone().unwrap();
        assert!(name.contains("2024"));

        let reopened = manager.open(&statement.id).await.unwrap();
        assert_eq!(reopened.name.as_deref(), Some(name.as_str()));
    }

    #[tokio::test]
    async fn bank_confirm_rejects_a_balance_mismatch() {
        let mut manager = manager();
        let mut statement = manager.create_statement("bank", date()).await.unwrap();
        statement.balance_end_real = dec("100.00");
        manager.store.save_statement(&statement).await.unwrap();

        let mut line =
            StatementLine::new("l1", &statement.id, "incoming wire", date(), dec("90.00"));
        line.account_id = Some("700100".to_string());
        manager.add_line(line).await.unwrap();

        let err = manager.confirm(&statement.id).await.unwrap_err();
        assert!(matches!(err, ReconcileError::BalanceMismatch { .. }));
        // nothing was committed
        let stored = manager.require_statement(&statement.id).await.unwrap();
        assert_eq!(stored.state, StatementState::Open);
    }
}
