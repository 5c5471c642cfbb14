use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IvolError {
    #[error("Invalid input for {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("No convergence: {function} did not converge after {iterations} iterations (delta: {last_delta})")]
    NoConvergence {
        function: String,
        iterations: u32,
        last_delta: Decimal,
    },

    #[error("Degenerate vega: {vega} at sigma {sigma} is too small to take a Newton step")]
    DegenerateVega { sigma: Decimal, vega: Decimal },

    #[error("Price out of bounds: market price {market_price} outside no-arbitrage range [{lower}, {upper}]")]
    PriceOutOfBounds {
        market_price: Decimal,
        lower: Decimal,
        upper: Decimal,
    },

    #[error("Bracketing failure: no sign change on volatility interval [{low}, {high}]")]
    BracketingFailure { low: Decimal, high: Decimal },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl IvolError {
    pub(crate) fn invalid(field: &str, reason: &str) -> Self {
        IvolError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-friendly tag, used when a batch reports per-quote failures.
    pub fn kind(&self) -> &'static str {
        match self {
            IvolError::InvalidInput { .. } => "invalid_input",
            IvolError::NoConvergence { .. } => "no_convergence",
            IvolError::DegenerateVega { .. } => "degenerate_vega",
            IvolError::PriceOutOfBounds { .. } => "price_out_of_bounds",
            IvolError::BracketingFailure { .. } => "bracketing_failure",
            IvolError::SerializationError(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for IvolError {
    fn from(e: serde_json::Error) -> Self {
        IvolError::SerializationError(e.to_string())
    }
}
