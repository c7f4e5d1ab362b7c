//! Currency-aware journal line construction
//!
//! Three currency roles are in play: the company currency (home currency of
//! the debit/credit columns), the statement currency (the journal's
//! currency, falling back to the company's) and the line currency (optional
//! explicit transaction currency, falling back to the statement's). The
//! builder tags each leg with the right foreign amount/currency pair and
//! converts debits and credits into company currency, always rounding at the
//! target currency's precision so residual fractions cannot unbalance the
//! entry.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::traits::CurrencyConverter;
use crate::types::*;

/// Currency roles surrounding one statement line
#[derive(Debug, Clone, Copy)]
pub struct CurrencyContext<'a> {
    pub line: &'a StatementLine,
    pub company_currency: &'a Currency,
    pub statement_currency: &'a Currency,
    /// Third-party currency of the counterparty, when it has one
    pub partner_currency: Option<&'a Currency>,
}

impl<'a> CurrencyContext<'a> {
    /// Effective transaction currency: the line's own currency or the
    /// statement currency
    pub fn line_currency(&self) -> &'a Currency {
        self.line.currency.as_ref().unwrap_or(self.statement_currency)
    }

    /// Line-level exchange rate between the transaction currency and the
    /// statement currency, known only when the line carries both a foreign
    /// amount and a non-zero base amount
    pub fn line_rate(&self) -> Option<BigDecimal> {
        if self.line.currency.is_none() {
            return None;
        }
        let zero = BigDecimal::from(0);
        if self.line.amount == zero || self.line.amount_currency == zero {
            return None;
        }
        Some(&self.line.amount_currency / &self.line.amount)
    }
}

/// Rewrite a draft leg's debit/credit/foreign columns for the line's
/// currency situation.
///
/// The draft's debit and credit are expected in the transaction currency
/// (the line currency when set, the statement currency otherwise). On
/// return they are expressed in company currency and, where a foreign
/// currency is involved, `amount_currency`/`currency` carry the original
/// transaction amount.
///
/// Precedence, later branches only applying when earlier ones do not:
/// 1. a third-party currency distinct from both the company and statement
///    currencies tags the leg and converts through the rate collaborator;
/// 2. a transaction currency different from the company currency tags the
///    leg with it, then divides by the line rate (rounding in company
///    precision) or falls back to the rate collaborator;
/// 3. a foreign statement currency with a company-currency transaction
///    derives the statement-currency amount pro rata;
/// 4. a single-currency situation needs no foreign columns at all.
pub fn apply_currency(
    draft: &mut JournalLine,
    ctx: &CurrencyContext<'_>,
    converter: &dyn CurrencyConverter,
    date: NaiveDate,
) -> ReconcileResult<()> {
    let company = ctx.company_currency;
    let statement = ctx.statement_currency;
    let line_currency = ctx.line_currency().clone();
    let rate = ctx.line_rate();

    if let Some(partner) = ctx.partner_currency {
        if partner != company && partner != statement {
            draft.amount_currency = draft.balance();
            draft.currency = Some(partner.clone());
            draft.debit = converter.convert(&draft.debit, partner, company, date)?;
            draft.credit = converter.convert(&draft.credit, partner, company, date)?;
        }
    }

    if line_currency != *company {
        draft.amount_currency = draft.balance();
        draft.currency = Some(line_currency.clone());
        match (&ctx.line.currency, &rate) {
            (Some(_), Some(rate)) if statement == company => {
                // Statement in company currency, transaction in a foreign
                // one: the line rate is the only conversion needed
                draft.debit = company.round(&(&draft.debit / rate));
                draft.credit = company.round(&(&draft.credit / rate));
            }
            (Some(_), Some(rate)) => {
                // Statement foreign, transaction in yet another currency:
                // bring the amount into statement currency with the line
                // rate, then into company currency at the transaction date
                draft.debit = converter.convert(&(&draft.debit / rate), statement, company, date)?;
                draft.credit =
                    converter.convert(&(&draft.credit / rate), statement, company, date)?;
            }
            _ => {
                // Statement foreign, no extra transaction currency given
                draft.debit = converter.convert(&draft.debit, &line_currency, company, date)?;
                draft.credit = converter.convert(&draft.credit, &line_currency, company, date)?;
            }
        }
    } else if statement != company {
        // Statement foreign but the transaction is in company currency:
        // scale the line's statement-currency amount pro rata
        if ctx.line.amount_currency == BigDecimal::from(0) {
            return Err(ReconcileError::Validation(
                "a transaction amount in company currency is required to derive the pro-rata factor"
                    .to_string(),
            ));
        }
        let prorata = &draft.balance() / &ctx.line.amount_currency;
        draft.amount_currency = statement.round(&(&prorata * &ctx.line.amount));
        draft.currency = Some(statement.clone());
    }

    Ok(())
}

/// Build the leg that balances a reconciliation entry.
///
/// `amount` is the signed transaction amount still to balance, expressed in
/// company currency; `assigned` are the legs already placed in the entry.
/// The foreign column is derived as the negative sum of the foreign amounts
/// already assigned, so that when a single foreign currency runs through the
/// entry its foreign column nets to zero too.
pub fn balancing_line(
    ctx: &CurrencyContext<'_>,
    journal: &Journal,
    assigned: &[JournalLine],
    amount: &BigDecimal,
) -> ReconcileResult<JournalLine> {
    let company = ctx.company_currency;
    let statement = ctx.statement_currency;
    let line_currency = ctx.line_currency();
    let zero = BigDecimal::from(0);

    let amount_sum: BigDecimal = assigned.iter().map(|l| &l.amount_currency).sum();

    let amount_currency = if line_currency != company && line_currency == statement {
        // company in A, statement and transaction both in B
        Some(-&amount_sum)
    } else if line_currency != company && statement == company {
        // company and statement in A, transaction in B
        Some(-&amount_sum)
    } else if line_currency != company && line_currency != statement {
        // company in A, statement in B, transaction in C: go through the
        // line-level rate between B and C
        let rate = ctx.line_rate().ok_or_else(|| {
            ReconcileError::Validation(
                "a line-level rate is required to balance a three-currency entry".to_string(),
            )
        })?;
        Some(statement.round(&(&(-&amount_sum) / &rate)))
    } else if line_currency == company && statement != company {
        // company and transaction in A, statement in B
        let rate = ctx.line_rate().ok_or_else(|| {
            ReconcileError::Validation(
                "a line-level rate is required to balance a foreign statement entry".to_string(),
            )
        })?;
        Some(statement.round(&(amount / &rate)))
    } else {
        // single-currency entry, no foreign columns
        None
    };

    let currency = if statement != company {
        Some(statement.clone())
    } else if line_currency != company {
        Some(line_currency.clone())
    } else {
        None
    };

    let account_id = if *amount >= zero {
        journal.default_credit_account.clone()
    } else {
        journal.default_debit_account.clone()
    };

    let mut leg = JournalLine::new(
        ctx.line.name.clone(),
        account_id,
        if *amount > zero {
            amount.clone()
        } else {
            zero.clone()
        },
        if *amount < zero { -amount } else { zero },
    );
    leg.partner_id = ctx.line.partner_id.clone();
    leg.statement_line_id = Some(ctx.line.id.clone());
    leg.amount_currency = amount_currency.unwrap_or_else(|| BigDecimal::from(0));
    leg.currency = currency;
    Ok(leg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::FixedRateConverter;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn line(amount: &str) -> StatementLine {
        StatementLine::new("line1", "st1", "wire transfer", date(), dec(amount))
    }

    #[test]
    fn single_currency_leaves_foreign_columns_unset() {
        let eur = Currency::new("EUR", 2);
        let line = line("150.00");
        let ctx = CurrencyContext {
            line: &line,
            company_currency: &eur,
            statement_currency: &eur,
            partner_currency: None,
        };
        let converter = FixedRateConverter::new();

        let mut leg = JournalLine::new("wire transfer", "ar", dec("150.00"), dec("0"));
        apply_currency(&mut leg, &ctx, &converter, date()).unwrap();

        assert_eq!(leg.debit, dec("150.00"));
        assert_eq!(leg.amount_currency, dec("0"));
        assert!(leg.currency.is_none());
    }

    #[test]
    fn foreign_statement_converts_into_company_currency() {
        let eur = Currency::new("EUR", 2);
        let usd = Currency::new("USD", 2);
        let line = line("200.00");
        let ctx = CurrencyContext {
            line: &line,
            company_currency: &eur,
            statement_currency: &usd,
            partner_currency: None,
        };
        let converter = FixedRateConverter::new().with_rate("USD", "EUR", dec("0.9"));

        let mut leg = JournalLine::new("wire transfer", "ar", dec("200.00"), dec("0"));
        apply_currency(&mut leg, &ctx, &converter, date()).unwrap();

        assert_eq!(leg.debit, dec("180.00"));
        assert_eq!(leg.amount_currency, dec("200.00"));
        assert_eq!(leg.currency.as_ref().unwrap().code, "USD");
    }

    #[test]
    fn three_currencies_route_through_the_statement_rate() {
        // company EUR, statement USD, transaction GBP: 180 GBP over a
        // 200 USD line gives a 0.9 line rate; the leg must go GBP -> USD
        // via the line rate and USD -> EUR via the converter, not GBP -> EUR
        // directly
        let eur = Currency::new("EUR", 2);
        let usd = Currency::new("USD", 2);
        let gbp = Currency::new("GBP", 2);
        let mut line = line("200.00");
        line.amount_currency = dec("180.00");
        line.currency = Some(gbp);
        let ctx = CurrencyContext {
            line: &line,
            company_currency: &eur,
            statement_currency: &usd,
            partner_currency: None,
        };
        let converter = FixedRateConverter::new()
            .with_rate("USD", "EUR", dec("0.9"))
            // deliberately wrong direct rate to prove it is not used
            .with_rate("GBP", "EUR", dec("5.0"));

        let mut leg = JournalLine::new("wire transfer", "ar", dec("180.00"), dec("0"));
        apply_currency(&mut leg, &ctx, &converter, date()).unwrap();

        assert_eq!(leg.amount_currency, dec("180.00"));
        assert_eq!(leg.currency.as_ref().unwrap().code, "GBP");
        // 180 / 0.9 = 200 USD, then 200 * 0.9 = 180 EUR
        assert_eq!(leg.debit, dec("180.00"));
    }

    #[test]
    fn company_transaction_on_foreign_statement_is_pro_rated() {
        let eur = Currency::new("EUR", 2);
        let usd = Currency::new("USD", 2);
        let mut line = line("200.00"); // USD
        line.amount_currency = dec("180.00"); // EUR transaction amount
        line.currency = Some(eur.clone());
        let ctx = CurrencyContext {
            line: &line,
            company_currency: &eur,
            statement_currency: &usd,
            partner_currency: None,
        };
        let converter = FixedRateConverter::new();

        // half the transaction
        let mut leg = JournalLine::new("wire transfer", "ar", dec("90.00"), dec("0"));
        apply_currency(&mut leg, &ctx, &converter, date()).unwrap();

        assert_eq!(leg.currency.as_ref().unwrap().code, "USD");
        assert_eq!(leg.amount_currency, dec("100.00"));
        // debit stays in company currency
        assert_eq!(leg.debit, dec("90.00"));
    }

    #[test]
    fn conversions_compose_within_one_rounding_unit() {
        let a = Currency::new("AAA", 2);
        let b = Currency::new("BBB", 2);
        let c = Currency::new("CCC", 2);
        let converter = FixedRateConverter::new()
            .with_rate("AAA", "BBB", dec("1.17"))
            .with_rate("BBB", "CCC", dec("0.83"))
            .with_rate("AAA", "CCC", dec("0.9711"));

        let x = dec("1234.56");
        let via_b = converter
            .convert(&converter.convert(&x, &a, &b, date()).unwrap(), &b, &c, date())
            .unwrap();
        let direct = converter.convert(&x, &a, &c, date()).unwrap();
        let diff = (via_b - direct).abs();
        assert!(diff <= dec("0.01"), "difference {} exceeds one unit", diff);
    }

    #[test]
    fn balancing_leg_nets_the_foreign_column() {
        let eur = Currency::new("EUR", 2);
        let usd = Currency::new("USD", 2);
        let line = line("200.00");
        let ctx = CurrencyContext {
            line: &line,
            company_currency: &eur,
            statement_currency: &usd,
            partner_currency: None,
        };
        let journal = Journal::new("bank", "Bank", JournalType::Bank, "bank_account");

        let mut first = JournalLine::new("wire transfer", "ar", dec("180.00"), dec("0"));
        first.amount_currency = dec("200.00");
        first.currency = Some(usd.clone());

        let leg = balancing_line(&ctx, &journal, std::slice::from_ref(&first), &dec("-180.00"))
            .unwrap();
        assert_eq!(leg.credit, dec("180.00"));
        assert_eq!(leg.amount_currency, dec("-200.00"));
        assert_eq!(leg.currency.as_ref().unwrap().code, "USD");
        // foreign column nets to zero across the entry
        assert_eq!(&first.amount_currency + &leg.amount_currency, dec("0"));
    }
}
