//! Statement line validation rules

use bigdecimal::BigDecimal;

use crate::types::{Currency, Journal, JournalType, ReconcileError, ReconcileResult, StatementLine};

/// Validate a line against its journal and statement currency.
///
/// Bank journals accept zero-amount lines so an imported statement can be
/// captured exactly as reported; cash journals reject them. A line-level
/// transaction currency must differ from the statement currency, and a
/// foreign transaction amount makes no sense without one.
pub fn validate_line(
    line: &StatementLine,
    journal: &Journal,
    statement_currency: &Currency,
) -> ReconcileResult<()> {
    let zero = BigDecimal::from(0);
    if journal.journal_type == JournalType::Cash && statement_currency.is_zero(&line.amount) {
        return Err(ReconcileError::Validation(
            "a transaction with zero amount cannot be registered on a cash journal".to_string(),
        ));
    }
    if let Some(currency) = &line.currency {
        if currency == statement_currency {
            return Err(ReconcileError::Validation(
                "the transaction currency must differ from the statement currency".to_string(),
            ));
        }
    }
    if line.amount_currency != zero {
        if line.currency.is_none() {
            return Err(ReconcileError::Validation(
                "an amount in another currency requires that currency on the line".to_string(),
            ));
        }
        if statement_currency.is_zero(&line.amount) {
            return Err(ReconcileError::Validation(
                "a foreign currency amount requires a non-zero line amount".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn line(amount: &str) -> StatementLine {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        StatementLine::new("l1", "st1", "transaction", date, dec(amount))
    }

    #[test]
    fn zero_amount_is_rejected_on_cash_journals_only() {
        let eur = Currency::new("EUR", 2);
        let cash = Journal::new("cash", "Cash", JournalType::Cash, "101501");
        let bank = Journal::new("bank", "Bank", JournalType::Bank, "101401");

        assert!(validate_line(&line("0.00"), &cash, &eur).is_err());
        assert!(validate_line(&line("0.00"), &bank, &eur).is_ok());
        assert!(validate_line(&line("12.00"), &cash, &eur).is_ok());
    }

    #[test]
    fn transaction_currency_must_differ_from_the_statement_currency() {
        let eur = Currency::new("EUR", 2);
        let bank = Journal::new("bank", "Bank", JournalType::Bank, "101401");

        let mut bad = line("100.00");
        bad.amount_currency = dec("100.00");
        bad.currency = Some(eur.clone());
        assert!(validate_line(&bad, &bank, &eur).is_err());

        let mut good = bad.clone();
        good.currency = Some(Currency::new("USD", 2));
        assert!(validate_line(&good, &bank, &eur).is_ok());
    }

    #[test]
    fn foreign_amount_requires_a_currency_and_a_base_amount() {
        let eur = Currency::new("EUR", 2);
        let bank = Journal::new("bank", "Bank", JournalType::Bank, "101401");

        let mut no_currency = line("100.00");
        no_currency.amount_currency = dec("90.00");
        assert!(validate_line(&no_currency, &bank, &eur).is_err());

        let mut no_amount = line("0.00");
        no_amount.amount_currency = dec("90.00");
        no_amount.currency = Some(Currency::new("USD", 2));
        assert!(validate_line(&no_amount, &bank, &eur).is_err());
    }
}
