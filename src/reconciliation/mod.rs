//! Statement line reconciliation: currency-aware journal line derivation and
//! the matching engine itself

pub mod currency;
pub mod engine;

pub use currency::{apply_currency, balancing_line, CurrencyContext};
pub use engine::{CounterpartSpec, ReconciliationEngine, WriteOffSpec};
