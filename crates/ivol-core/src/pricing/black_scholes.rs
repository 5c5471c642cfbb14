use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use crate::error::IvolError;
use crate::math::{exp_decimal, ln_decimal, norm_cdf, norm_pdf, sqrt_decimal};
use crate::types::*;
use crate::IvolResult;

/// Smallest sigma * sqrt(T) fed into d1/d2.
const MIN_TOTAL_VOL: Decimal = dec!(0.000000000001);

/// Longest maturity accepted, in years.
const MAX_TIME_TO_EXPIRY: Decimal = dec!(100);

/// Largest volatility accepted by the pricer (10,000%).
const MAX_VOLATILITY: Decimal = dec!(100);

/// |rate * T| above this would overflow the discount factors.
const MAX_RATE_TIME: Decimal = dec!(10);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    #[serde(alias = "call", alias = "CALL", alias = "C")]
    Call,
    #[serde(alias = "put", alias = "PUT", alias = "P")]
    Put,
}

impl OptionType {
    /// Payoff at expiry for a given underlying level.
    pub fn intrinsic(self, spot: Money, strike: Money) -> Money {
        intrinsic_value(spot, strike, self)
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionType::Call => write!(f, "call"),
            OptionType::Put => write!(f, "put"),
        }
    }
}

impl FromStr for OptionType {
    type Err = IvolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "call" | "c" => Ok(OptionType::Call),
            "put" | "p" => Ok(OptionType::Put),
            _ => Err(IvolError::invalid(
                "option_type",
                "must be 'call' or 'put'",
            )),
        }
    }
}

/// Black-Scholes pricing parameters for a European option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BsInputs {
    pub spot_price: Money,
    pub strike_price: Money,
    pub time_to_expiry: Years,
    pub risk_free_rate: Rate,
    #[serde(default)]
    pub dividend_yield: Rate,
    pub volatility: Rate,
    pub option_type: OptionType,
}

/// Price together with its sensitivity to volatility.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingResult {
    pub price: Money,
    /// dPrice/dSigma per 1.0 of volatility (not per 1%)
    pub vega: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionGreeks {
    pub delta: Decimal,
    pub gamma: Decimal,
    /// Per calendar day
    pub theta: Decimal,
    /// Per 1% vol move
    pub vega: Decimal,
    /// Per 1% rate move
    pub rho: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionOutput {
    pub price: Money,
    pub d1: Decimal,
    pub d2: Decimal,
    pub intrinsic_value: Money,
    pub time_value: Money,
    pub greeks: OptionGreeks,
    pub put_call_parity_price: Money,
    pub moneyness: String,
    pub breakeven: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParityInput {
    pub spot_price: Money,
    pub strike_price: Money,
    pub time_to_expiry: Years,
    pub risk_free_rate: Rate,
    #[serde(default)]
    pub dividend_yield: Rate,
    pub call_price: Money,
    pub put_price: Money,
    #[serde(default = "default_parity_tolerance")]
    pub tolerance: Decimal,
}

fn default_parity_tolerance() -> Decimal {
    dec!(0.000001)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParityOutput {
    pub holds: bool,
    /// C - P
    pub call_minus_put: Money,
    /// S*e^(-qT) - K*e^(-rT)
    pub forward_value: Money,
    pub deviation: Money,
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

pub(crate) fn validate_market(
    s: Decimal,
    k: Decimal,
    t: Decimal,
    r: Decimal,
    q: Decimal,
) -> IvolResult<()> {
    if s <= Decimal::ZERO {
        return Err(IvolError::invalid("spot_price", "must be positive"));
    }
    if k <= Decimal::ZERO {
        return Err(IvolError::invalid("strike_price", "must be positive"));
    }
    if t <= Decimal::ZERO {
        return Err(IvolError::invalid("time_to_expiry", "must be positive"));
    }
    if t > MAX_TIME_TO_EXPIRY {
        return Err(IvolError::invalid(
            "time_to_expiry",
            "must not exceed 100 years",
        ));
    }
    if (r * t).abs() > MAX_RATE_TIME {
        return Err(IvolError::invalid(
            "risk_free_rate",
            "rate times maturity is out of range",
        ));
    }
    if (q * t).abs() > MAX_RATE_TIME {
        return Err(IvolError::invalid(
            "dividend_yield",
            "yield times maturity is out of range",
        ));
    }
    if ((r - q) * t).abs() > MAX_RATE_TIME {
        return Err(IvolError::invalid(
            "dividend_yield",
            "cost of carry times maturity is out of range",
        ));
    }
    Ok(())
}

fn validate_volatility(sigma: Decimal) -> IvolResult<()> {
    if sigma <= Decimal::ZERO {
        return Err(IvolError::invalid("volatility", "must be positive"));
    }
    if sigma > MAX_VOLATILITY {
        return Err(IvolError::invalid("volatility", "must not exceed 100 (10,000%)"));
    }
    Ok(())
}

fn validate_pricing_input(input: &BsInputs) -> IvolResult<()> {
    validate_market(
        input.spot_price,
        input.strike_price,
        input.time_to_expiry,
        input.risk_free_rate,
        input.dividend_yield,
    )?;
    validate_volatility(input.volatility)
}

// ---------------------------------------------------------------------------
// Black-Scholes internals
// ---------------------------------------------------------------------------

/// Volatility-independent pieces of the formula, computed once per quote so
/// the solver only pays for d1/d2 and two CDF evaluations per iteration.
#[derive(Debug, Clone)]
pub(crate) struct BlackScholes {
    pub s: Decimal,
    pub k: Decimal,
    pub t: Decimal,
    pub r: Decimal,
    pub q: Decimal,
    pub option_type: OptionType,
    sqrt_t: Decimal,
    ln_s_over_k: Decimal,
    exp_neg_qt: Decimal,
    exp_neg_rt: Decimal,
}

impl BlackScholes {
    /// Inputs must already be validated.
    pub(crate) fn new(
        s: Decimal,
        k: Decimal,
        t: Decimal,
        r: Decimal,
        q: Decimal,
        option_type: OptionType,
    ) -> Self {
        BlackScholes {
            s,
            k,
            t,
            r,
            q,
            option_type,
            sqrt_t: sqrt_decimal(t),
            ln_s_over_k: ln_decimal(s / k),
            exp_neg_qt: exp_decimal(-q * t),
            exp_neg_rt: exp_decimal(-r * t),
        }
    }

    pub(crate) fn d1_d2(&self, sigma: Decimal) -> (Decimal, Decimal) {
        let sigma_sqrt_t = (sigma * self.sqrt_t).max(MIN_TOTAL_VOL);
        let d1 = (self.ln_s_over_k + (self.r - self.q + sigma * sigma / dec!(2)) * self.t)
            / sigma_sqrt_t;
        (d1, d1 - sigma_sqrt_t)
    }

    pub(crate) fn price(&self, sigma: Decimal) -> Decimal {
        let (d1, d2) = self.d1_d2(sigma);
        self.price_from_d(d1, d2)
    }

    fn price_from_d(&self, d1: Decimal, d2: Decimal) -> Decimal {
        let value = match self.option_type {
            OptionType::Call => {
                self.s * self.exp_neg_qt * norm_cdf(d1) - self.k * self.exp_neg_rt * norm_cdf(d2)
            }
            OptionType::Put => {
                self.k * self.exp_neg_rt * norm_cdf(-d2) - self.s * self.exp_neg_qt * norm_cdf(-d1)
            }
        };
        // The CDF approximation can dip a hair below zero far out of the money
        value.max(Decimal::ZERO)
    }

    pub(crate) fn vega(&self, sigma: Decimal) -> Decimal {
        let (d1, _) = self.d1_d2(sigma);
        self.s * self.exp_neg_qt * norm_pdf(d1) * self.sqrt_t
    }

    pub(crate) fn price_and_vega(&self, sigma: Decimal) -> PricingResult {
        let (d1, d2) = self.d1_d2(sigma);
        PricingResult {
            price: self.price_from_d(d1, d2),
            vega: self.s * self.exp_neg_qt * norm_pdf(d1) * self.sqrt_t,
        }
    }

    /// Spot discounted by the dividend yield, S*e^(-qT).
    pub(crate) fn pv_spot(&self) -> Decimal {
        self.s * self.exp_neg_qt
    }

    /// European no-arbitrage range for the premium.
    pub(crate) fn bounds(&self) -> (Decimal, Decimal) {
        let pv_spot = self.s * self.exp_neg_qt;
        let pv_strike = self.k * self.exp_neg_rt;
        match self.option_type {
            OptionType::Call => ((pv_spot - pv_strike).max(Decimal::ZERO), pv_spot),
            OptionType::Put => ((pv_strike - pv_spot).max(Decimal::ZERO), pv_strike),
        }
    }

    fn greeks(&self, sigma: Decimal) -> OptionGreeks {
        let (d1, d2) = self.d1_d2(sigma);
        let nd1 = norm_pdf(d1);
        let (s, k, r, q, t) = (self.s, self.k, self.r, self.q, self.t);

        let delta = match self.option_type {
            OptionType::Call => self.exp_neg_qt * norm_cdf(d1),
            OptionType::Put => -self.exp_neg_qt * norm_cdf(-d1),
        };

        let sigma_sqrt_t = d1 - d2;
        let gamma = self.exp_neg_qt * nd1 / (s * sigma_sqrt_t);

        let theta_annual = match self.option_type {
            OptionType::Call => {
                -s * self.exp_neg_qt * nd1 * sigma_sqrt_t / (dec!(2) * t)
                    - r * k * self.exp_neg_rt * norm_cdf(d2)
                    + q * s * self.exp_neg_qt * norm_cdf(d1)
            }
            OptionType::Put => {
                -s * self.exp_neg_qt * nd1 * sigma_sqrt_t / (dec!(2) * t)
                    + r * k * self.exp_neg_rt * norm_cdf(-d2)
                    - q * s * self.exp_neg_qt * norm_cdf(-d1)
            }
        };

        let rho = match self.option_type {
            OptionType::Call => k * t * self.exp_neg_rt * norm_cdf(d2) / dec!(100),
            OptionType::Put => -k * t * self.exp_neg_rt * norm_cdf(-d2) / dec!(100),
        };

        OptionGreeks {
            delta,
            gamma,
            theta: theta_annual / dec!(365),
            vega: s * self.exp_neg_qt * nd1 * self.sqrt_t / dec!(100),
            rho,
        }
    }
}

impl From<&BsInputs> for BlackScholes {
    fn from(input: &BsInputs) -> Self {
        BlackScholes::new(
            input.spot_price,
            input.strike_price,
            input.time_to_expiry,
            input.risk_free_rate,
            input.dividend_yield,
            input.option_type,
        )
    }
}

// ---------------------------------------------------------------------------
// Moneyness and intrinsic value helpers
// ---------------------------------------------------------------------------

fn classify_moneyness(s: Decimal, k: Decimal, option_type: OptionType) -> String {
    let ratio = s / k;
    // ATM band: within 1% of strike
    let atm_lo = dec!(0.99);
    let atm_hi = dec!(1.01);
    let (itm, otm) = match option_type {
        OptionType::Call => (ratio > atm_hi, ratio < atm_lo),
        OptionType::Put => (ratio < atm_lo, ratio > atm_hi),
    };
    if itm {
        "ITM".into()
    } else if otm {
        "OTM".into()
    } else {
        "ATM".into()
    }
}

pub fn intrinsic_value(s: Money, k: Money, option_type: OptionType) -> Money {
    match option_type {
        OptionType::Call => (s - k).max(Decimal::ZERO),
        OptionType::Put => (k - s).max(Decimal::ZERO),
    }
}

fn breakeven(k: Decimal, premium: Decimal, option_type: OptionType) -> Decimal {
    match option_type {
        OptionType::Call => k + premium,
        OptionType::Put => k - premium,
    }
}

/// Theoretical no-arbitrage bounds for a European option under continuous rates:
///   call: [max(0, S e^{-qT} - K e^{-rT}), S e^{-qT}]
///   put:  [max(0, K e^{-rT} - S e^{-qT}), K e^{-rT}]
pub fn no_arbitrage_bounds(
    option_type: OptionType,
    s: Money,
    k: Money,
    t: Years,
    r: Rate,
    q: Rate,
) -> IvolResult<(Money, Money)> {
    validate_market(s, k, t, r, q)?;
    Ok(BlackScholes::new(s, k, t, r, q, option_type).bounds())
}

// ---------------------------------------------------------------------------
// Public API: price, vega
// ---------------------------------------------------------------------------

/// Closed-form Black-Scholes price. Fails with `InvalidInput` for T <= 0 or sigma <= 0.
///
/// The accepted domain is also capped to keep Decimal `exp` from overflowing:
/// T <= 100 years, sigma <= 100, and |rT|, |qT|, |(r - q)T| <= 10. Inputs
/// beyond these caps are `InvalidInput` as well.
pub fn price(input: &BsInputs) -> IvolResult<Money> {
    validate_pricing_input(input)?;
    Ok(BlackScholes::from(input).price(input.volatility))
}

/// Vega per unit of volatility, identical for calls and puts.
pub fn vega(input: &BsInputs) -> IvolResult<Decimal> {
    validate_pricing_input(input)?;
    Ok(BlackScholes::from(input).vega(input.volatility))
}

pub fn price_and_vega(input: &BsInputs) -> IvolResult<PricingResult> {
    validate_pricing_input(input)?;
    Ok(BlackScholes::from(input).price_and_vega(input.volatility))
}

// ---------------------------------------------------------------------------
// Public API: price_option
// ---------------------------------------------------------------------------

pub fn price_option(input: &BsInputs) -> IvolResult<ComputationOutput<OptionOutput>> {
    let start = Instant::now();
    validate_pricing_input(input)?;

    let bs = BlackScholes::from(input);
    let sigma = input.volatility;
    let (d1, d2) = bs.d1_d2(sigma);
    let premium = bs.price(sigma);
    let greeks = bs.greeks(sigma);

    // Put-call parity counterpart
    let pv_spot = bs.s * exp_decimal(-bs.q * bs.t);
    let pv_strike = bs.k * exp_decimal(-bs.r * bs.t);
    let parity_price = match input.option_type {
        // If we priced a call, parity gives the put: P = C - S*e^(-qT) + K*e^(-rT)
        OptionType::Call => premium - pv_spot + pv_strike,
        // If we priced a put, parity gives the call: C = P + S*e^(-qT) - K*e^(-rT)
        OptionType::Put => premium + pv_spot - pv_strike,
    };

    let iv = intrinsic_value(bs.s, bs.k, input.option_type);

    let mut warnings = Vec::new();
    if greeks.vega < dec!(0.0001) {
        warnings.push("Vega is near zero; price is insensitive to volatility".to_string());
    }

    let output = OptionOutput {
        price: premium,
        d1,
        d2,
        intrinsic_value: iv,
        time_value: premium - iv,
        greeks,
        put_call_parity_price: parity_price,
        moneyness: classify_moneyness(bs.s, bs.k, input.option_type),
        breakeven: breakeven(bs.k, premium, input.option_type),
    };

    let assumptions = serde_json::json!({
        "model": "Black-Scholes (closed-form)",
        "risk_free_rate": input.risk_free_rate.to_string(),
        "volatility": sigma.to_string(),
        "dividend_yield": input.dividend_yield.to_string(),
        "exercise_style": "European",
        "normal_cdf": "Abramowitz-Stegun 26.2.17",
    });

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Black-Scholes (closed-form)",
        &assumptions,
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Public API: put_call_parity_check
// ---------------------------------------------------------------------------

/// Checks C - P = S e^{-qT} - K e^{-rT} within tolerance.
pub fn put_call_parity_check(input: &ParityInput) -> IvolResult<ComputationOutput<ParityOutput>> {
    let start = Instant::now();
    validate_market(
        input.spot_price,
        input.strike_price,
        input.time_to_expiry,
        input.risk_free_rate,
        input.dividend_yield,
    )?;
    if input.call_price < Decimal::ZERO {
        return Err(IvolError::invalid("call_price", "must be non-negative"));
    }
    if input.put_price < Decimal::ZERO {
        return Err(IvolError::invalid("put_price", "must be non-negative"));
    }
    if input.tolerance <= Decimal::ZERO {
        return Err(IvolError::invalid("tolerance", "must be positive"));
    }

    let t = input.time_to_expiry;
    let lhs = input.call_price - input.put_price;
    let rhs = input.spot_price * exp_decimal(-input.dividend_yield * t)
        - input.strike_price * exp_decimal(-input.risk_free_rate * t);
    let deviation = lhs - rhs;
    let holds = deviation.abs() <= input.tolerance;

    let mut warnings = Vec::new();
    if !holds {
        warnings.push(format!(
            "Parity violated by {deviation}; quotes may be stale or non-synchronous"
        ));
    }

    let output = ParityOutput {
        holds,
        call_minus_put: lhs,
        forward_value: rhs,
        deviation,
    };

    let assumptions = serde_json::json!({
        "relation": "C - P = S*e^(-qT) - K*e^(-rT)",
        "tolerance": input.tolerance.to_string(),
    });

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "European put-call parity",
        &assumptions,
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
