//! Collaborator contracts consumed by the reconciliation core
//!
//! The engine never owns persistence, posting, numbering, rate lookup or
//! messaging; it drives them through these traits so any backend can be
//! plugged in.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::HashSet;

use crate::types::*;

/// Persistence abstraction for statements, lines, journal entries and
/// payments, plus read access to the surrounding master data.
///
/// Multi-step operations (reconcile, confirm, fast counterpart creation) are
/// bracketed with `begin`/`commit`/`rollback`: either every record written
/// inside the bracket commits together, or none do.
#[async_trait]
pub trait StatementStore: Send + Sync {
    /// Open a transaction bracket
    async fn begin(&mut self) -> ReconcileResult<()>;

    /// Commit the current transaction bracket
    async fn commit(&mut self) -> ReconcileResult<()>;

    /// Discard every write since the outermost `begin`
    async fn rollback(&mut self) -> ReconcileResult<()>;

    /// The company owning the ledger
    async fn company(&self) -> ReconcileResult<Company>;

    async fn get_journal(&self, journal_id: &str) -> ReconcileResult<Option<Journal>>;

    async fn get_account(&self, account_id: &str) -> ReconcileResult<Option<Account>>;

    async fn get_partner(&self, partner_id: &str) -> ReconcileResult<Option<Partner>>;

    async fn save_statement(&mut self, statement: &Statement) -> ReconcileResult<()>;

    async fn get_statement(&self, statement_id: &str) -> ReconcileResult<Option<Statement>>;

    async fn delete_statement(&mut self, statement_id: &str) -> ReconcileResult<()>;

    /// Most recent statement of a journal, used to chain opening balances
    async fn last_statement_for_journal(
        &self,
        journal_id: &str,
    ) -> ReconcileResult<Option<Statement>>;

    async fn save_line(&mut self, line: &StatementLine) -> ReconcileResult<()>;

    async fn get_line(&self, line_id: &str) -> ReconcileResult<Option<StatementLine>>;

    /// Lines of a statement ordered by sequence
    async fn statement_lines(&self, statement_id: &str) -> ReconcileResult<Vec<StatementLine>>;

    async fn delete_line(&mut self, line_id: &str) -> ReconcileResult<()>;

    async fn save_entry(&mut self, entry: &JournalEntry) -> ReconcileResult<()>;

    async fn get_entry(&self, entry_id: &str) -> ReconcileResult<Option<JournalEntry>>;

    async fn delete_entry(&mut self, entry_id: &str) -> ReconcileResult<()>;

    /// Look up a single journal line across all stored entries
    async fn get_journal_line(&self, journal_line_id: &str)
        -> ReconcileResult<Option<JournalLine>>;

    async fn save_payment(&mut self, payment: &Payment) -> ReconcileResult<()>;

    async fn get_payment(&self, payment_id: &str) -> ReconcileResult<Option<Payment>>;

    /// Non-cancelled payment generated for a statement line, if any
    async fn payment_for_line(&self, line_id: &str) -> ReconcileResult<Option<Payment>>;

    /// Of the given statement lines, the subset that already has journal
    /// lines generated for it (aggregate group-by, used by the bulk fast
    /// counterpart path to skip processed lines)
    async fn processed_line_ids(&self, line_ids: &[String]) -> ReconcileResult<HashSet<String>>;
}

/// Result of a ledger reconciliation pass over a set of journal lines
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationOutcome {
    /// Closure id assigned when the matched lines net to zero; `None` means
    /// the match was only partial
    pub full_reconcile_id: Option<String>,
    pub reconciled_line_ids: Vec<String>,
}

/// Ledger posting collaborator: transitions entries between draft and
/// posted, and maintains reconciliation marks on journal lines.
#[async_trait]
pub trait LedgerPosting: Send + Sync {
    /// Post a draft entry. Enforces the double-entry invariant, assigns the
    /// entry name on first posting and returns it.
    async fn post(&mut self, entry_id: &str) -> ReconcileResult<String>;

    /// Reverse a posted entry back to draft
    async fn cancel(&mut self, entry_id: &str) -> ReconcileResult<()>;

    /// Mark the given journal lines as reconciled together; a full closure
    /// forms when their net balance is exactly zero
    async fn reconcile(
        &mut self,
        journal_line_ids: &[String],
    ) -> ReconcileResult<ReconciliationOutcome>;

    /// Remove reconciliation marks (and any closure) from the given lines
    async fn remove_reconciliation(&mut self, journal_line_ids: &[String]) -> ReconcileResult<()>;
}

/// Sequential reference numbering (statement names, entry numbers)
pub trait SequenceGenerator: Send + Sync {
    /// Next reference for the sequence identified by `key`, in the context
    /// of `date` (implementations typically embed the year)
    fn next(&mut self, key: &str, date: NaiveDate) -> String;
}

/// Pure multi-currency conversion function.
///
/// Implementations must round the result to the target currency's precision.
pub trait CurrencyConverter: Send + Sync {
    fn convert(
        &self,
        amount: &BigDecimal,
        from: &Currency,
        to: &Currency,
        date: NaiveDate,
    ) -> ReconcileResult<BigDecimal>;
}

/// Fire-and-forget audit trail; failures must never abort the calling
/// operation.
pub trait AuditLog: Send + Sync {
    fn post_message(&self, entity: &str, body: &str);
}

/// Audit log that drops every message
pub struct NoopAudit;

impl AuditLog for NoopAudit {
    fn post_message(&self, _entity: &str, _body: &str) {}
}
