//! Core types and data structures for bank statement reconciliation

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A currency with its configured rounding precision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    /// ISO-ish currency code (e.g. "EUR", "USD")
    pub code: String,
    /// Number of decimal places used for rounding amounts in this currency
    pub decimal_places: i64,
}

impl Currency {
    /// Create a new currency
    pub fn new(code: impl Into<String>, decimal_places: i64) -> Self {
        Self {
            code: code.into(),
            decimal_places,
        }
    }

    /// Round an amount to this currency's precision (half-up)
    pub fn round(&self, amount: &BigDecimal) -> BigDecimal {
        amount.with_scale_round(self.decimal_places, RoundingMode::HalfUp)
    }

    /// Check whether an amount is zero at this currency's precision
    pub fn is_zero(&self, amount: &BigDecimal) -> bool {
        self.round(amount) == BigDecimal::from(0)
    }
}

/// The company owning the ledger; its currency is the home currency of
/// every journal entry's debit/credit columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub currency: Currency,
}

/// Journal types relevant to statement handling
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JournalType {
    /// Bank journal; zero-amount lines are allowed so an imported statement
    /// can be captured exactly as the bank reported it
    Bank,
    /// Cash journal; supports cashbox counting and profit/loss adjustment
    Cash,
}

/// A bank or cash journal owning statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    pub id: String,
    pub name: String,
    pub journal_type: JournalType,
    /// The journal's own currency; statements fall back to the company
    /// currency when this is unset
    pub currency: Option<Currency>,
    /// Liquidity account debited on inflows
    pub default_debit_account: String,
    /// Liquidity account credited on outflows
    pub default_credit_account: String,
    /// Account absorbing a positive cash difference (cash journals)
    pub profit_account: Option<String>,
    /// Account absorbing a negative cash difference (cash journals)
    pub loss_account: Option<String>,
    /// Sequence key used to number statements of this journal
    pub sequence_key: String,
}

impl Journal {
    /// Create a journal with the given liquidity account on both sides
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        journal_type: JournalType,
        liquidity_account: impl Into<String>,
    ) -> Self {
        let account = liquidity_account.into();
        let id = id.into();
        Self {
            sequence_key: format!("statement.{}", id),
            id,
            name: name.into(),
            journal_type,
            currency: None,
            default_debit_account: account.clone(),
            default_credit_account: account,
            profit_account: None,
            loss_account: None,
        }
    }
}

/// Ledger account classification used to pick partner types and to guard
/// reconciliation against netting unrelated items
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountKind {
    Receivable,
    Payable,
    Other,
}

/// A ledger account, consumed by the engine but owned by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub kind: AccountKind,
    /// Whether open items on this account can be reconciled
    pub reconcilable: bool,
}

impl Account {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: AccountKind) -> Self {
        let reconcilable = matches!(kind, AccountKind::Receivable | AccountKind::Payable);
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            reconcilable,
        }
    }
}

/// A counterparty with its receivable/payable accounts and an optional
/// third-party currency driving the first branch of the currency builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partner {
    pub id: String,
    pub name: String,
    pub receivable_account: String,
    pub payable_account: String,
    pub currency: Option<Currency>,
}

/// Statement lifecycle states
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementState {
    /// New or running; lines can still be added and reconciled
    Open,
    /// Validated; balances and lines are frozen, entries are posted
    Confirmed,
}

/// A bank account's reported cash movements for a period, with declared
/// opening/closing balances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub id: String,
    /// Reference name, assigned from a sequence when the statement is opened
    pub name: Option<String>,
    /// Reference of the external mean that created this statement (imported
    /// file name, online synchronization id...)
    pub reference: Option<String>,
    pub date: NaiveDate,
    /// If set, entries created during reconciliation are booked at this date
    /// instead of the line date
    pub accounting_date: Option<NaiveDate>,
    pub journal_id: String,
    pub balance_start: BigDecimal,
    /// Ending balance as declared by the bank or counted in the cashbox
    pub balance_end_real: BigDecimal,
    pub state: StatementState,
    pub date_done: Option<NaiveDateTime>,
    /// Responsible user
    pub user_id: Option<String>,
    /// Cashbox count that produced the opening balance, if any
    pub cashbox_start_id: Option<String>,
    /// Cashbox count that produced the declared closing balance, if any
    pub cashbox_end_id: Option<String>,
    /// Total of line amounts; recomputed, never edited directly
    pub total_entry_encoding: BigDecimal,
    /// Computed closing balance: opening balance + total of lines
    pub balance_end: BigDecimal,
    /// Declared closing balance minus computed closing balance
    pub difference: BigDecimal,
}

impl Statement {
    /// Create a new open statement
    pub fn new(id: impl Into<String>, journal_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            id: id.into(),
            name: None,
            reference: None,
            date,
            accounting_date: None,
            journal_id: journal_id.into(),
            balance_start: BigDecimal::from(0),
            balance_end_real: BigDecimal::from(0),
            state: StatementState::Open,
            date_done: None,
            user_id: None,
            cashbox_start_id: None,
            cashbox_end_id: None,
            total_entry_encoding: BigDecimal::from(0),
            balance_end: BigDecimal::from(0),
            difference: BigDecimal::from(0),
        }
    }

    /// Recompute the stored balance triple from the current lines.
    ///
    /// Must be invoked after every mutation of the opening balance, the
    /// declared closing balance or any line amount; the values are never
    /// derived implicitly.
    pub fn recompute_balances(&mut self, lines: &[StatementLine]) {
        self.total_entry_encoding = lines.iter().map(|l| &l.amount).sum();
        self.balance_end = &self.balance_start + &self.total_entry_encoding;
        self.difference = &self.balance_end_real - &self.balance_end;
    }

    /// Whether the declared and computed closing balances agree at the
    /// given currency precision
    pub fn is_difference_zero(&self, currency: &Currency) -> bool {
        currency.is_zero(&self.difference)
    }
}

/// One transaction entry within a statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementLine {
    pub id: String,
    pub statement_id: String,
    /// Label of the transaction
    pub name: String,
    pub date: NaiveDate,
    /// Signed amount in the statement currency
    pub amount: BigDecimal,
    /// The amount expressed in an optional other currency if this is a
    /// multi-currency transaction; zero when unused
    pub amount_currency: BigDecimal,
    /// The optional other currency; must differ from the statement currency
    pub currency: Option<Currency>,
    /// Resolved counterparty, if known
    pub partner_id: Option<String>,
    /// Third-party name as reported by the bank, kept when the partner does
    /// not exist yet or cannot be matched
    pub partner_name: Option<String>,
    /// Direct counterpart account; when set, the line bypasses interactive
    /// reconciliation and is auto-processed at confirmation time
    pub account_id: Option<String>,
    /// Free-text reference
    pub reference: Option<String>,
    pub note: Option<String>,
    /// Display order within the statement
    pub sequence: i32,
    /// Journal entries generated by reconciling this line
    pub entry_ids: Vec<String>,
    /// Name given to the generated journal entry, stored once assigned so the
    /// same number is reused if the line is cancelled and processed again
    pub move_name: Option<String>,
}

impl StatementLine {
    /// Create a new statement line
    pub fn new(
        id: impl Into<String>,
        statement_id: impl Into<String>,
        name: impl Into<String>,
        date: NaiveDate,
        amount: BigDecimal,
    ) -> Self {
        Self {
            id: id.into(),
            statement_id: statement_id.into(),
            name: name.into(),
            date,
            amount,
            amount_currency: BigDecimal::from(0),
            currency: None,
            partner_id: None,
            partner_name: None,
            account_id: None,
            reference: None,
            note: None,
            sequence: 0,
            entry_ids: Vec::new(),
            move_name: None,
        }
    }

    /// Whether the line has already produced journal entries
    pub fn is_reconciled(&self) -> bool {
        !self.entry_ids.is_empty()
    }
}

/// Journal entry states
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryState {
    Draft,
    Posted,
}

/// One leg of a journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalLine {
    pub id: String,
    pub name: String,
    pub account_id: String,
    pub partner_id: Option<String>,
    /// Debit amount in company currency
    pub debit: BigDecimal,
    /// Credit amount in company currency
    pub credit: BigDecimal,
    /// Amount in the tagged foreign currency, zero when untagged
    pub amount_currency: BigDecimal,
    /// Foreign currency tag, if any
    pub currency: Option<Currency>,
    /// Statement line this leg was generated for, if any
    pub statement_line_id: Option<String>,
    /// Payment this leg belongs to, if any
    pub payment_id: Option<String>,
    pub reconciled: bool,
    /// Identifier of the full-reconciliation closure this leg belongs to
    pub full_reconcile_id: Option<String>,
}

impl JournalLine {
    /// Create a draft journal line with a generated id
    pub fn new(
        name: impl Into<String>,
        account_id: impl Into<String>,
        debit: BigDecimal,
        credit: BigDecimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            account_id: account_id.into(),
            partner_id: None,
            debit,
            credit,
            amount_currency: BigDecimal::from(0),
            currency: None,
            statement_line_id: None,
            payment_id: None,
            reconciled: false,
            full_reconcile_id: None,
        }
    }

    /// Signed balance of the leg in company currency
    pub fn balance(&self) -> BigDecimal {
        &self.debit - &self.credit
    }
}

/// A balanced set of journal lines; constructed by the reconciliation engine
/// but posted and stored by the ledger collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    /// Entry number, assigned when the entry is first posted
    pub name: Option<String>,
    pub journal_id: String,
    pub date: NaiveDate,
    pub reference: Option<String>,
    pub state: EntryState,
    pub lines: Vec<JournalLine>,
}

impl JournalEntry {
    /// Create a new draft entry with a generated id
    pub fn new(journal_id: impl Into<String>, date: NaiveDate, reference: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: None,
            journal_id: journal_id.into(),
            date,
            reference,
            state: EntryState::Draft,
            lines: Vec::new(),
        }
    }

    /// Calculate total debits
    pub fn total_debits(&self) -> BigDecimal {
        self.lines.iter().map(|l| &l.debit).sum()
    }

    /// Calculate total credits
    pub fn total_credits(&self) -> BigDecimal {
        self.lines.iter().map(|l| &l.credit).sum()
    }

    /// Check the double-entry invariant (debits = credits, exactly)
    pub fn is_balanced(&self) -> bool {
        self.total_debits() == self.total_credits()
    }
}

/// Direction of a payment relative to the company
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentDirection {
    Inbound,
    Outbound,
}

/// Counterparty role inferred from the accounts being settled
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartnerType {
    Customer,
    Supplier,
}

/// Payment states
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentState {
    Draft,
    Posted,
    Reconciled,
    Cancelled,
}

/// A payment record generated while reconciling a statement line against a
/// known counterparty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub name: String,
    pub direction: PaymentDirection,
    pub partner_type: PartnerType,
    pub partner_id: Option<String>,
    pub journal_id: String,
    pub date: NaiveDate,
    /// Absolute amount in the payment currency
    pub amount: BigDecimal,
    pub currency: Currency,
    /// Memo shown to the counterparty, taken from the line label
    pub communication: Option<String>,
    /// Number of the journal entry backing the payment, once posted
    pub reference: Option<String>,
    pub statement_line_id: Option<String>,
    pub state: PaymentState,
    /// Journal entry generated for the payment
    pub entry_id: Option<String>,
}

impl Payment {
    /// Create a draft payment with a generated id
    pub fn new(
        name: impl Into<String>,
        direction: PaymentDirection,
        partner_type: PartnerType,
        journal_id: impl Into<String>,
        date: NaiveDate,
        amount: BigDecimal,
        currency: Currency,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            direction,
            partner_type,
            partner_id: None,
            journal_id: journal_id.into(),
            date,
            amount,
            currency,
            communication: None,
            reference: None,
            statement_line_id: None,
            state: PaymentState::Draft,
            entry_id: None,
        }
    }
}

/// Errors raised by statement and reconciliation operations.
///
/// All of them abort the enclosing store transaction; none are retried
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("the ending balance is incorrect: the expected balance ({declared}) is different from the computed one ({computed})")]
    BalanceMismatch {
        declared: BigDecimal,
        computed: BigDecimal,
    },
    #[error("there is no {side} account defined on journal '{journal}' to absorb the cash difference")]
    MissingAdjustmentAccount { journal: String, side: String },
    #[error("all the statement lines must be processed in order to close the statement")]
    UnprocessedLines,
    #[error("statement line '{0}' was already reconciled with journal entries")]
    OverReconciled(String),
    #[error("a selected journal item was already reconciled")]
    AlreadyReconciled,
    #[error("journal items to reconcile together must share the same account")]
    MixedAccounts,
    #[error("full reconciliation failed to close the matched journal items")]
    ReconciliationIncomplete,
    #[error("statement not found: {0}")]
    StatementNotFound(String),
    #[error("statement line not found: {0}")]
    LineNotFound(String),
    #[error("journal entry not found: {0}")]
    EntryNotFound(String),
    #[error("journal item not found: {0}")]
    JournalLineNotFound(String),
    #[error("journal not found: {0}")]
    JournalNotFound(String),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("partner not found: {0}")]
    PartnerNotFound(String),
    #[error("no conversion rate from {from} to {to}")]
    MissingRate { from: String, to: String },
}

/// Result type for statement and reconciliation operations
pub type ReconcileResult<T> = Result<T, ReconcileError>;
