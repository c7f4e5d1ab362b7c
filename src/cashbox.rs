//! Cashbox counting: sums denomination counts into a statement balance

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::types::{ReconcileError, ReconcileResult, Statement};

/// One counted denomination: a coin or bill value and how many of it were
/// found in the box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenominationCount {
    pub value: BigDecimal,
    pub count: i64,
}

impl DenominationCount {
    pub fn new(value: BigDecimal, count: i64) -> Self {
        Self { value, count }
    }

    /// Subtotal for this denomination: value x count
    pub fn subtotal(&self) -> BigDecimal {
        &self.value * BigDecimal::from(self.count)
    }
}

/// Which statement balance a cashbox count feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceSlot {
    /// Count taken when opening the box; sets the starting balance
    Opening,
    /// Count taken when closing the box; sets the declared ending balance
    Closing,
}

/// A set of denomination counts, used transiently to set a statement's
/// opening or declared closing balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashboxCount {
    pub id: String,
    pub counts: Vec<DenominationCount>,
}

impl CashboxCount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            counts: Vec::new(),
        }
    }

    /// Add a denomination count
    pub fn add(&mut self, value: BigDecimal, count: i64) -> &mut Self {
        self.counts.push(DenominationCount::new(value, count));
        self
    }

    /// Total of all subtotals
    pub fn total(&self) -> BigDecimal {
        self.counts.iter().map(|c| c.subtotal()).sum()
    }

    /// Reject counts below zero; a cashbox cannot contain negative bills
    pub fn validate(&self) -> ReconcileResult<()> {
        for count in &self.counts {
            if count.count < 0 {
                return Err(ReconcileError::Validation(format!(
                    "the number of coins/bills of value {} cannot be negative",
                    count.value
                )));
            }
        }
        Ok(())
    }

    /// Write the counted total into the statement's opening or declared
    /// closing balance and record which count produced it.
    ///
    /// The caller is responsible for recomputing the statement balances
    /// afterwards; `StatementManager::apply_cashbox` does both.
    pub fn apply(&self, statement: &mut Statement, slot: BalanceSlot) -> ReconcileResult<()> {
        self.validate()?;
        match slot {
            BalanceSlot::Opening => {
                statement.balance_start = self.total();
                statement.cashbox_start_id = Some(self.id.clone());
            }
            BalanceSlot::Closing => {
                statement.balance_end_real = self.total();
                statement.cashbox_end_id = Some(self.id.clone());
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

    #[test]
    fn totals_sum_denomination_subtotals() {
        let mut count = CashboxCount::new("cb1");
        count.add(dec("50.00"), 3).add(dec("0.50"), 7).add(dec("20.00"), 0);
        assert_eq!(count.total(), dec("153.50"));
    }

    #[test]
    fn negative_counts_are_rejected() {
        let mut count = CashboxCount::new("cb1");
        count.add(dec("10.00"), -1);
        assert!(matches!(
            count.validate(),
            Err(ReconcileError::Validation(_))
        ));
    }

    #[test]
    fn apply_sets_the_requested_balance_slot() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut statement = Statement::new("st1", "cash", date);

        let mut opening = CashboxCount::new("cb-open");
        opening.add(dec("100.00"), 10);
        opening.apply(&mut statement, BalanceSlot::Opening).unwrap();
        assert_eq!(statement.balance_start, dec("1000.00"));
        assert_eq!(statement.cashbox_start_id.as_deref(), Some("cb-open"));

        let mut closing = CashboxCount::new("cb-close");
        closing.add(dec("100.00"), 8).add(dec("50.00"), 1);
        closing.apply(&mut statement, BalanceSlot::Closing).unwrap();
        assert_eq!(statement.balance_end_real, dec("850.00"));
        assert_eq!(statement.cashbox_end_id.as_deref(), Some("cb-close"));
        // opening slot untouched
        assert_eq!(statement.balance_start, dec("1000.00"));
    }
}
