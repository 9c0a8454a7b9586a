use std::collections::HashMap;

use crate::features::trade::orders::Order;

/// Read-only exchange-rate seam. Price discovery and its fallback chains
/// live with the wallet application; transition guards only ask whether a
/// usable rate exists right now.
pub trait RateSource: Send + Sync {
    /// PKR per unit of `token`, or `None` when no valid rate is available.
    fn rate_pkr(&self, token: &str) -> Option<f64>;
}

/// Static rate table, fed from configuration or by the embedding wallet.
#[derive(Debug, Clone, Default)]
pub struct FixedRates {
    rates: HashMap<String, f64>,
}

impl FixedRates {
    pub fn new(rates: HashMap<String, f64>) -> Self {
        Self { rates }
    }
}

impl RateSource for FixedRates {
    fn rate_pkr(&self, token: &str) -> Option<f64> {
        self.rates
            .get(token)
            .copied()
            .filter(|r| r.is_finite() && *r > 0.0)
    }
}

/// A priced trade request, checked against the rate source and, when the
/// standing order is known, against its limits.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeQuote {
    pub amount_pkr: f64,
    pub token: String,
    pub rate_pkr: f64,
    pub token_amount: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuoteError {
    #[error("invalid amount: {0}")]
    InvalidAmount(f64),
    #[error("no exchange rate available for {0}")]
    MissingRate(String),
    #[error("amount {amount} PKR outside order limits {min}..{max}")]
    OutsideLimits { amount: f64, min: f64, max: f64 },
}

pub fn quote_trade(
    rates: &dyn RateSource,
    order: Option<&Order>,
    amount_pkr: f64,
    token: &str,
) -> Result<TradeQuote, QuoteError> {
    if !amount_pkr.is_finite() || amount_pkr <= 0.0 {
        return Err(QuoteError::InvalidAmount(amount_pkr));
    }

    let rate_pkr = rates
        .rate_pkr(token)
        .ok_or_else(|| QuoteError::MissingRate(token.to_string()))?;

    if let Some(order) = order {
        if amount_pkr < order.min_amount_pkr || amount_pkr > order.max_amount_pkr {
            return Err(QuoteError::OutsideLimits {
                amount: amount_pkr,
                min: order.min_amount_pkr,
                max: order.max_amount_pkr,
            });
        }
    }

    Ok(TradeQuote {
        amount_pkr,
        token: token.to_string(),
        rate_pkr,
        token_amount: amount_pkr / rate_pkr,
    })
}
