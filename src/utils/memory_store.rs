//! In-memory backend implementing both the persistence and ledger contracts
//!
//! Clones share the same underlying state, so a manager and the engines it
//! spawns see one store. Transactions snapshot the whole state at the
//! outermost `begin`; nested brackets only adjust a depth counter, and a
//! rollback at any depth restores the outermost snapshot.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Datelike;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

#[derive(Clone)]
struct Data {
    company: Company,
    journals: HashMap<String, Journal>,
    accounts: HashMap<String, Account>,
    partners: HashMap<String, Partner>,
    statements: Vec<Statement>,
    lines: Vec<StatementLine>,
    entries: Vec<JournalEntry>,
    payments: Vec<Payment>,
    entry_counters: HashMap<(String, i32), u32>,
}

struct State {
    data: Data,
    snapshot: Option<Data>,
    depth: u32,
}

/// In-memory store; thread-safe and cheap to clone
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new(company: Company) -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                data: Data {
                    company,
                    journals: HashMap::new(),
                    accounts: HashMap::new(),
                    partners: HashMap::new(),
                    statements: Vec::new(),
                    lines: Vec::new(),
                    entries: Vec::new(),
                    payments: Vec::new(),
                    entry_counters: HashMap::new(),
                },
                snapshot: None,
                depth: 0,
            })),
        }
    }

    pub fn add_journal(&self, journal: Journal) {
        self.write().data.journals.insert(journal.id.clone(), journal);
    }

    pub fn add_account(&self, account: Account) {
        self.write().data.accounts.insert(account.id.clone(), account);
    }

    pub fn add_partner(&self, partner: Partner) {
        self.write().data.partners.insert(partner.id.clone(), partner);
    }

    /// Seed a pre-existing journal entry, typically holding open items to
    /// reconcile against
    pub fn add_entry(&self, entry: JournalEntry) {
        self.write().data.entries.push(entry);
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn upsert<T: Clone>(items: &mut Vec<T>, matches: impl Fn(&T) -> bool, value: &T) {
    if let Some(slot) = items.iter_mut().find(|item| matches(&**item)) {
        *slot = value.clone();
    } else {
        items.push(value.clone());
    }
}

#[async_trait]
impl StatementStore for MemoryStore {
    async fn begin(&mut self) -> ReconcileResult<()> {
        let mut state = self.write();
        if state.depth == 0 {
            state.snapshot = Some(state.data.clone());
        }
        state.depth += 1;
        Ok(())
    }

    async fn commit(&mut self) -> ReconcileResult<()> {
        let mut state = self.write();
        if state.depth > 0 {
            state.depth -= 1;
            if state.depth == 0 {
                state.snapshot = None;
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) -> ReconcileResult<()> {
        let mut state = self.write();
        if let Some(snapshot) = state.snapshot.take() {
            state.data = snapshot;
        }
        state.depth = 0;
        Ok(())
    }

    async fn company(&self) -> ReconcileResult<Company> {
        Ok(self.read().data.company.clone())
    }

    async fn get_journal(&self, journal_id: &str) -> ReconcileResult<Option<Journal>> {
        Ok(self.read().data.journals.get(journal_id).cloned())
    }

    async fn get_account(&self, account_id: &str) -> ReconcileResult<Option<Account>> {
        Ok(self.read().data.accounts.get(account_id).cloned())
    }

    async fn get_partner(&self, partner_id: &str) -> ReconcileResult<Option<Partner>> {
        Ok(self.read().data.partners.get(partner_id).cloned())
    }

    async fn save_statement(&mut self, statement: &Statement) -> ReconcileResult<()> {
        let mut state = self.write();
        upsert(&mut state.data.statements, |s| s.id == statement.id, statement);
        Ok(())
    }

    async fn get_statement(&self, statement_id: &str) -> ReconcileResult<Option<Statement>> {
        Ok(self
            .read()
            .data
            .statements
            .iter()
            .find(|s| s.id == statement_id)
            .cloned())
    }

    async fn delete_statement(&mut self, statement_id: &str) -> ReconcileResult<()> {
        self.write().data.statements.retain(|s| s.id != statement_id);
        Ok(())
    }

    async fn last_statement_for_journal(
        &self,
        journal_id: &str,
    ) -> ReconcileResult<Option<Statement>> {
        let state = self.read();
        let mut found: Option<&Statement> = None;
        for statement in state
            .data
            .statements
            .iter()
            .filter(|s| s.journal_id == journal_id)
        {
            // latest date wins, insertion order breaks ties
            match found {
                Some(best) if statement.date < best.date => {}
                _ => found = Some(statement),
            }
        }
        Ok(found.cloned())
    }

    async fn save_line(&mut self, line: &StatementLine) -> ReconcileResult<()> {
        let mut state = self.write();
        upsert(&mut state.data.lines, |l| l.id == line.id, line);
        Ok(())
    }

    async fn get_line(&self, line_id: &str) -> ReconcileResult<Option<StatementLine>> {
        Ok(self.read().data.lines.iter().find(|l| l.id == line_id).cloned())
    }

    async fn statement_lines(&self, statement_id: &str) -> ReconcileResult<Vec<StatementLine>> {
        let state = self.read();
        let mut lines: Vec<StatementLine> = state
            .data
            .lines
            .iter()
            .filter(|l| l.statement_id == statement_id)
            .cloned()
            .collect();
        lines.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.id.cmp(&b.id)));
        Ok(lines)
    }

    async fn delete_line(&mut self, line_id: &str) -> ReconcileResult<()> {
        self.write().data.lines.retain(|l| l.id != line_id);
        Ok(())
    }

    async fn save_entry(&mut self, entry: &JournalEntry) -> ReconcileResult<()> {
        let mut state = self.write();
        upsert(&mut state.data.entries, |e| e.id == entry.id, entry);
        Ok(())
    }

    async fn get_entry(&self, entry_id: &str) -> ReconcileResult<Option<JournalEntry>> {
        Ok(self
            .read()
            .data
            .entries
            .iter()
            .find(|e| e.id == entry_id)
            .cloned())
    }

    async fn delete_entry(&mut self, entry_id: &str) -> ReconcileResult<()> {
        self.write().data.entries.retain(|e| e.id != entry_id);
        Ok(())
    }

    async fn get_journal_line(
        &self,
        journal_line_id: &str,
    ) -> ReconcileResult<Option<JournalLine>> {
        let state = self.read();
        for entry in &state.data.entries {
            if let Some(line) = entry.lines.iter().find(|l| l.id == journal_line_id) {
                return Ok(Some(line.clone()));
            }
        }
        Ok(None)
    }

    async fn save_payment(&mut self, payment: &Payment) -> ReconcileResult<()> {
        let mut state = self.write();
        upsert(&mut state.data.payments, |p| p.id == payment.id, payment);
        Ok(())
    }

    async fn get_payment(&self, payment_id: &str) -> ReconcileResult<Option<Payment>> {
        Ok(self
            .read()
            .data
            .payments
            .iter()
            .find(|p| p.id == payment_id)
            .cloned())
    }

    async fn payment_for_line(&self, line_id: &str) -> ReconcileResult<Option<Payment>> {
        Ok(self
            .read()
            .data
            .payments
            .iter()
            .rev()
            .find(|p| {
                p.statement_line_id.as_deref() == Some(line_id)
                    && p.state != PaymentState::Cancelled
            })
            .cloned())
    }

    async fn processed_line_ids(&self, line_ids: &[String]) -> ReconcileResult<HashSet<String>> {
        let wanted: HashSet<&str> = line_ids.iter().map(|s| s.as_str()).collect();
        let state = self.read();
        let mut processed = HashSet::new();
        for entry in &state.data.entries {
            for line in &entry.lines {
                if let Some(id) = &line.statement_line_id {
                    if wanted.contains(id.as_str()) {
                        processed.insert(id.clone());
                    }
                }
            }
        }
        Ok(processed)
    }
}

#[async_trait]
impl LedgerPosting for MemoryStore {
    async fn post(&mut self, entry_id: &str) -> ReconcileResult<String> {
        let mut state = self.write();
        let data = &mut state.data;
        let index = data
            .entries
            .iter()
            .position(|e| e.id == entry_id)
            .ok_or_else(|| ReconcileError::EntryNotFound(entry_id.to_string()))?;
        let (journal_id, year, existing_name) = {
            let entry = &data.entries[index];
            if !entry.is_balanced() {
                return Err(ReconcileError::Validation(format!(
                    "cannot post journal entry '{}': total debits {} differ from total credits {}",
                    entry_id,
                    entry.total_debits(),
                    entry.total_credits()
                )));
            }
            (entry.journal_id.clone(), entry.date.year(), entry.name.clone())
        };
        let name = match existing_name {
            Some(name) => name,
            None => {
                let counter = data
                    .entry_counters
                    .entry((journal_id.clone(), year))
                    .or_insert(0);
                *counter += 1;
                format!("{}/{}/{:04}", journal_id.to_uppercase(), year, counter)
            }
        };
        let entry = &mut data.entries[index];
        entry.name = Some(name.clone());
        entry.state = EntryState::Posted;
        Ok(name)
    }

    async fn cancel(&mut self, entry_id: &str) -> ReconcileResult<()> {
        let mut state = self.write();
        let entry = state
            .data
            .entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| ReconcileError::EntryNotFound(entry_id.to_string()))?;
        // the name is kept so a re-posted entry reuses its number
        entry.state = EntryState::Draft;
        Ok(())
    }

    async fn reconcile(
        &mut self,
        journal_line_ids: &[String],
    ) -> ReconcileResult<ReconciliationOutcome> {
        let mut state = self.write();
        let data = &mut state.data;

        let mut positions = Vec::with_capacity(journal_line_ids.len());
        for id in journal_line_ids {
            let mut found = None;
            'entries: for (entry_index, entry) in data.entries.iter().enumerate() {
                for (line_index, line) in entry.lines.iter().enumerate() {
                    if line.id == *id {
                        found = Some((entry_index, line_index));
                        break 'entries;
                    }
                }
            }
            let position =
                found.ok_or_else(|| ReconcileError::JournalLineNotFound(id.clone()))?;
            positions.push(position);
        }

        let accounts: HashSet<&str> = positions
            .iter()
            .map(|&(e, l)| data.entries[e].lines[l].account_id.as_str())
            .collect();
        if accounts.len() > 1 {
            return Err(ReconcileError::MixedAccounts);
        }
        if positions
            .iter()
            .any(|&(e, l)| data.entries[e].lines[l].reconciled)
        {
            return Err(ReconcileError::AlreadyReconciled);
        }

        let net: BigDecimal = positions
            .iter()
            .map(|&(e, l)| data.entries[e].lines[l].balance())
            .sum();
        if net != BigDecimal::from(0) {
            // partial match: nothing is marked, the items stay open
            return Ok(ReconciliationOutcome {
                full_reconcile_id: None,
                reconciled_line_ids: Vec::new(),
            });
        }
        let closure_id = Uuid::new_v4().to_string();
        for &(entry_index, line_index) in &positions {
            let line = &mut data.entries[entry_index].lines[line_index];
            line.reconciled = true;
            line.full_reconcile_id = Some(closure_id.clone());
        }
        Ok(ReconciliationOutcome {
            full_reconcile_id: Some(closure_id),
            reconciled_line_ids: journal_line_ids.to_vec(),
        })
    }

    async fn remove_reconciliation(&mut self, journal_line_ids: &[String]) -> ReconcileResult<()> {
        let mut state = self.write();
        let data = &mut state.data;
        let targets: HashSet<&str> = journal_line_ids.iter().map(|s| s.as_str()).collect();

        // a removed line dissolves its whole closure
        let mut closures: HashSet<String> = HashSet::new();
        for entry in &data.entries {
            for line in &entry.lines {
                if targets.contains(line.id.as_str()) {
                    if let Some(closure) = &line.full_reconcile_id {
                        closures.insert(closure.clone());
                    }
                }
            }
        }
        for entry in &mut data.entries {
            for line in &mut entry.lines {
                let in_closure = line
                    .full_reconcile_id
                    .as_ref()
                    .is_some_and(|c| closures.contains(c));
                if targets.contains(line.id.as_str()) || in_closure {
                    line.reconciled = false;
                    line.full_reconcile_id = None;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn store() -> MemoryStore {
        MemoryStore::new(Company {
            id: "co".to_string(),
            name: "Test Co".to_string(),
            currency: Currency::new("EUR", 2),
        })
    }

    #[tokio::test]
    async fn rollback_restores_the_outermost_snapshot() {
        let mut store = store();
        let statement = Statement::new("st1", "bank", date());
        store.save_statement(&statement).await.unwrap();

        store.begin().await.unwrap();
        store.begin().await.unwrap(); // nested
        store.delete_statement("st1").await.unwrap();
        let other = Statement::new("st2", "bank", date());
        store.save_statement(&other).await.unwrap();
        store.rollback().await.unwrap();

        assert!(store.get_statement("st1").await.unwrap().is_some());
        assert!(store.get_statement("st2").await.unwrap().is_none());
        // the bracket is fully unwound
        store.begin().await.unwrap();
        store.commit().await.unwrap();
    }

    #[tokio::test]
    async fn clones_share_state() {
        let mut store = store();
        let mut clone = store.clone();
        let statement = Statement::new("st1", "bank", date());
        clone.save_statement(&statement).await.unwrap();
        assert!(store.get_statement("st1").await.unwrap().is_some());

        store.begin().await.unwrap();
        clone.delete_statement("st1").await.unwrap();
        store.rollback().await.unwrap();
        assert!(clone.get_statement("st1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn posting_assigns_and_reuses_entry_names() {
        let mut store = store();
        let mut entry = JournalEntry::new("bank", date(), None);
        entry.lines.push(JournalLine::new("a", "101401", dec("50"), dec("0")));
        entry.lines.push(JournalLine::new("b", "400100", dec("0"), dec("50")));
        store.save_entry(&entry).await.unwrap();

        let name = store.post(&entry.id).await.unwrap();
        assert_eq!(name, "BANK/2024/0001");

        store.cancel(&entry.id).await.unwrap();
        let again = store.post(&entry.id).await.unwrap();
        assert_eq!(again, name);
    }

    #[tokio::test]
    async fn posting_an_unbalanced_entry_fails() {
        let mut store = store();
        let mut entry = JournalEntry::new("bank", date(), None);
        entry.lines.push(JournalLine::new("a", "101401", dec("50"), dec("0")));
        entry.lines.push(JournalLine::new("b", "400100", dec("0"), dec("49.99")));
        store.save_entry(&entry).await.unwrap();

        assert!(matches!(
            store.post(&entry.id).await,
            Err(ReconcileError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn full_reconciliation_marks_a_closure_and_dissolves_as_one() {
        let mut store = store();
        let mut entry = JournalEntry::new("sale", date(), None);
        entry.lines.push(JournalLine::new("inv", "ar", dec("100"), dec("0")));
        entry.lines.push(JournalLine::new("pay", "ar", dec("0"), dec("100")));
        store.save_entry(&entry).await.unwrap();
        let ids: Vec<String> = entry.lines.iter().map(|l| l.id.clone()).collect();

        let outcome = store.reconcile(&ids).await.unwrap();
        assert!(outcome.full_reconcile_id.is_some());
        let line = store.get_journal_line(&ids[0]).await.unwrap().unwrap();
        assert!(line.reconciled);

        store.remove_reconciliation(&ids[..1]).await.unwrap();
        for id in &ids {
            let line = store.get_journal_line(id).await.unwrap().unwrap();
            assert!(!line.reconciled);
            assert!(line.full_reconcile_id.is_none());
        }
    }

    #[tokio::test]
    async fn partial_matches_leave_items_open() {
        let mut store = store();
        let mut entry = JournalEntry::new("sale", date(), None);
        entry.lines.push(JournalLine::new("inv", "ar", dec("100"), dec("0")));
        entry.lines.push(JournalLine::new("pay", "ar", dec("0"), dec("60")));
        store.save_entry(&entry).await.unwrap();
        let ids: Vec<String> = entry.lines.iter().map(|l| l.id.clone()).collect();

        let outcome = store.reconcile(&ids).await.unwrap();
        assert!(outcome.full_reconcile_id.is_none());
        let line = store.get_journal_line(&ids[0]).await.unwrap().unwrap();
        assert!(!line.reconciled);
    }
}
