//! Table-driven currency conversion for tests and fixed-rate deployments

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::traits::CurrencyConverter;
use crate::types::{Currency, ReconcileError, ReconcileResult};

/// A [`CurrencyConverter`] backed by a static rate table.
///
/// Rates are directional; when only the opposite direction is configured its
/// reciprocal is used. Every result is rounded to the target currency's
/// precision.
#[derive(Debug, Clone, Default)]
pub struct FixedRateConverter {
    rates: HashMap<(String, String), BigDecimal>,
}

impl FixedRateConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the rate multiplying a `from` amount into a `to` amount
    pub fn with_rate(mut self, from: &str, to: &str, rate: BigDecimal) -> Self {
        self.rates.insert((from.to_string(), to.to_string()), rate);
        self
    }
}

impl CurrencyConverter for FixedRateConverter {
    fn convert(
        &self,
        amount: &BigDecimal,
        from: &Currency,
        to: &Currency,
        _date: NaiveDate,
    ) -> ReconcileResult<BigDecimal> {
        if from.code == to.code {
            return Ok(to.round(amount));
        }
        if let Some(rate) = self.rates.get(&(from.code.clone(), to.code.clone())) {
            return Ok(to.round(&(amount * rate)));
        }
        if let Some(rate) = self.rates.get(&(to.code.clone(), from.code.clone())) {
            return Ok(to.round(&(amount / rate)));
        }
        Err(ReconcileError::MissingRate {
            from: from.code.clone(),
            to: to.code.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    #[test]
    fn converts_and_rounds_to_the_target_precision() {
        let usd = Currency::new("USD", 2);
        let eur = Currency::new("EUR", 2);
        let converter = FixedRateConverter::new().with_rate("USD", "EUR", dec("0.333"));

        let result = converter.convert(&dec("10.00"), &usd, &eur, date()).unwrap();
        assert_eq!(result, dec("3.33"));
    }

    #[test]
    fn falls_back_to_the_reciprocal_rate() {
        let usd = Currency::new("USD", 2);
        let eur = Currency::new("EUR", 2);
        let converter = FixedRateConverter::new().with_rate("EUR", "USD", dec("1.25"));

        let result = converter.convert(&dec("10.00"), &usd, &eur, date()).unwrap();
        assert_eq!(result, dec("8.00"));
    }

    #[test]
    fn unknown_pairs_are_an_error() {
        let usd = Currency::new("USD", 2);
        let eur = Currency::new("EUR", 2);
        let converter = FixedRateConverter::new();

        assert!(matches!(
            converter.convert(&dec("10.00"), &usd, &eur, date()),
            Err(ReconcileError::MissingRate { .. })
        ));
        // same currency needs no rate
        assert_eq!(
            converter.convert(&dec("10.00"), &usd, &usd, date()).unwrap(),
            dec("10.00")
        );
    }
}
