//! # Statement Core
//!
//! A bank statement reconciliation library covering the full life of a
//! statement: cashbox counting, balance validation, line-level
//! reconciliation and multi-currency journal entry generation.
//!
//! ## Features
//!
//! - **Statement lifecycle**: Open statements, encode lines, validate the
//!   closing balance and confirm, with explicit balance recomputation
//! - **Cashbox counting**: Denomination counts feeding the opening or
//!   declared closing balance of cash statements
//! - **Reconciliation**: Match lines against open receivables/payables,
//!   create payments, book write-offs, or auto-process lines carrying a
//!   direct counterpart account
//! - **Multi-currency**: Company, statement and transaction currencies with
//!   per-currency rounding, keeping every generated entry balanced
//! - **Storage abstraction**: Database-agnostic design with trait-based
//!   persistence, posting, numbering and rate lookup
//!
//! ## Quick Start
//!
//! ```rust
//! use statement_core::{Company, Currency, Journal, JournalType, StatementManager};
//! use statement_core::utils::{FixedRateConverter, MemoryStore, SimpleSequences};
//! use std::sync::Arc;
//!
//! let company = Company {
//!     id: "co".to_string(),
//!     name: "Example".to_string(),
//!     currency: Currency::new("EUR", 2),
//! };
//! let store = MemoryStore::new(company);
//! store.add_journal(Journal::new("bank", "Bank", JournalType::Bank, "101401"));
//! let manager = StatementManager::new(
//!     store,
//!     Box::new(SimpleSequences::new()),
//!     Arc::new(FixedRateConverter::new()),
//! );
//! ```

pub mod cashbox;
pub mod reconciliation;
pub mod statement;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use cashbox::{BalanceSlot, CashboxCount, DenominationCount};
pub use reconciliation::{CounterpartSpec, ReconciliationEngine, WriteOffSpec};
pub use statement::StatementManager;
pub use traits::*;
pub use types::*;
