use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

use super::black_scholes::{validate_market, OptionType};
use super::implied_vol::{solve_implied_vol, ImpliedVolInput, SolverSettings};
use crate::error::IvolError;
use crate::math::{exp_decimal, ln_decimal, sqrt_decimal};
use crate::types::*;
use crate::IvolResult;

const DAYS_PER_YEAR: Decimal = dec!(365);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Which observed price is inverted for each quote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    /// (bid + ask) / 2, requires a two-sided market
    Mid,
    /// Last traded price
    Last,
    /// Mid when two-sided, else last trade
    #[default]
    MidOrLast,
}

/// Data-quality screens applied before solving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteFilter {
    pub min_volume: Option<u64>,
    /// (ask - bid) / mid above this is treated as unreliable
    pub max_relative_spread: Option<Decimal>,
    pub min_price: Money,
    pub min_time_to_expiry: Years,
}

impl Default for QuoteFilter {
    fn default() -> Self {
        QuoteFilter {
            min_volume: None,
            max_relative_spread: None,
            min_price: dec!(0.01),
            min_time_to_expiry: Decimal::ONE / DAYS_PER_YEAR,
        }
    }
}

/// One row of an option-chain snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainQuote {
    pub strike: Money,
    pub option_type: OptionType,
    /// Year fraction; takes precedence over `expiration`
    #[serde(default)]
    pub time_to_expiry: Option<Years>,
    #[serde(default)]
    pub expiration: Option<NaiveDate>,
    #[serde(default)]
    pub bid: Option<Money>,
    #[serde(default)]
    pub ask: Option<Money>,
    #[serde(default)]
    pub last_price: Option<Money>,
    #[serde(default)]
    pub volume: Option<u64>,
    #[serde(default)]
    pub open_interest: Option<u64>,
    /// Implied vol quoted by the data source, kept for comparison
    #[serde(default)]
    pub vendor_iv: Option<Rate>,
}

impl ChainQuote {
    /// Mid of a two-sided, uncrossed market.
    pub fn mid(&self) -> Option<Money> {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) if b > Decimal::ZERO && a >= b => Some((b + a) / dec!(2)),
            _ => None,
        }
    }

    /// Relative spread (spread / mid)
    pub fn relative_spread(&self) -> Option<Decimal> {
        let mid = self.mid()?;
        match (self.bid, self.ask) {
            (Some(b), Some(a)) => Some((a - b) / mid),
            _ => None,
        }
    }

    fn observed_price(&self, source: PriceSource) -> Option<Money> {
        let last = self.last_price.filter(|p| *p > Decimal::ZERO);
        match source {
            PriceSource::Mid => self.mid(),
            PriceSource::Last => last,
            PriceSource::MidOrLast => self.mid().or(last),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInput {
    pub spot_price: Money,
    pub risk_free_rate: Rate,
    #[serde(default)]
    pub dividend_yield: Rate,
    /// Needed when quotes carry `expiration` dates instead of year fractions
    #[serde(default)]
    pub valuation_date: Option<NaiveDate>,
    pub quotes: Vec<ChainQuote>,
    #[serde(default)]
    pub price_source: PriceSource,
    #[serde(default)]
    pub filters: QuoteFilter,
    #[serde(default)]
    pub solver: SolverSettings,
    /// Keep only out-of-the-money strikes (puts below the forward, calls above)
    #[serde(default)]
    pub otm_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuoteStatus {
    Solved,
    Filtered { reason: String },
    Failed { kind: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvPoint {
    pub strike: Money,
    pub expiry: Option<Years>,
    pub option_type: OptionType,
    pub market_price: Option<Money>,
    /// K / F
    pub moneyness: Option<Decimal>,
    pub log_moneyness: Option<Decimal>,
    pub implied_vol: Option<Rate>,
    pub vendor_iv: Option<Rate>,
    /// implied_vol - vendor_iv
    pub vendor_iv_diff: Option<Decimal>,
    pub iterations: Option<u32>,
    pub status: QuoteStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkewSlice {
    pub expiry: Years,
    pub forward: Money,
    /// Interpolated at log-moneyness 0
    pub atm_vol: Rate,
    /// Vol at the lowest solved strike
    pub put_wing_vol: Rate,
    /// Vol at the highest solved strike
    pub call_wing_vol: Rate,
    /// Least-squares d(vol)/d(ln K/F); None with fewer than two strikes
    pub skew_slope: Option<Decimal>,
    pub min_vol: Rate,
    pub min_vol_strike: Money,
    pub points: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermPoint {
    pub expiry: Years,
    pub atm_vol: Rate,
    pub total_variance: Decimal,
    pub forward_vol: Rate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainOutput {
    pub points: Vec<IvPoint>,
    pub skew: Vec<SkewSlice>,
    pub term_structure: Vec<TermPoint>,
    pub solved: usize,
    pub filtered: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn validate_input(input: &ChainInput) -> IvolResult<()> {
    if input.spot_price <= Decimal::ZERO {
        return Err(IvolError::invalid("spot_price", "must be positive"));
    }
    if input.quotes.is_empty() {
        return Err(IvolError::invalid("quotes", "at least one quote is required"));
    }
    if input.filters.min_price < Decimal::ZERO {
        return Err(IvolError::invalid("filters.min_price", "must be non-negative"));
    }
    if let Some(spread) = input.filters.max_relative_spread {
        if spread <= Decimal::ZERO {
            return Err(IvolError::invalid(
                "filters.max_relative_spread",
                "must be positive",
            ));
        }
    }
    input.solver.validate()
}

// ---------------------------------------------------------------------------
// Per-quote evaluation
// ---------------------------------------------------------------------------

fn resolve_expiry(quote: &ChainQuote, valuation_date: Option<NaiveDate>) -> Result<Years, String> {
    if let Some(t) = quote.time_to_expiry {
        return Ok(t);
    }
    match (quote.expiration, valuation_date) {
        (Some(exp), Some(val)) => {
            let days = (exp - val).num_days();
            Ok(Decimal::from(days) / DAYS_PER_YEAR)
        }
        (Some(_), None) => Err("expiration given without valuation_date".into()),
        (None, _) => Err("no time_to_expiry or expiration".into()),
    }
}

fn filtered(point: IvPoint, reason: impl Into<String>) -> IvPoint {
    IvPoint {
        status: QuoteStatus::Filtered {
            reason: reason.into(),
        },
        ..point
    }
}

fn evaluate_quote(input: &ChainInput, quote: &ChainQuote) -> IvPoint {
    let point = IvPoint {
        strike: quote.strike,
        expiry: None,
        option_type: quote.option_type,
        market_price: None,
        moneyness: None,
        log_moneyness: None,
        implied_vol: None,
        vendor_iv: quote.vendor_iv,
        vendor_iv_diff: None,
        iterations: None,
        status: QuoteStatus::Solved,
    };

    if quote.strike <= Decimal::ZERO {
        return IvPoint {
            status: QuoteStatus::Failed {
                kind: "invalid_input".into(),
                reason: "strike must be positive".into(),
            },
            ..point
        };
    }

    let t = match resolve_expiry(quote, input.valuation_date) {
        Ok(t) => t,
        Err(reason) => return filtered(point, reason),
    };
    let point = IvPoint {
        expiry: Some(t),
        ..point
    };
    if t <= Decimal::ZERO {
        return filtered(point, "expired");
    }
    if t < input.filters.min_time_to_expiry {
        return filtered(point, "time to expiry below minimum");
    }

    if let Err(e) = validate_market(
        input.spot_price,
        quote.strike,
        t,
        input.risk_free_rate,
        input.dividend_yield,
    ) {
        return IvPoint {
            status: QuoteStatus::Failed {
                kind: e.kind().into(),
                reason: e.to_string(),
            },
            ..point
        };
    }

    let forward = forward_price(input.spot_price, input.risk_free_rate, input.dividend_yield, t);
    let moneyness = quote.strike / forward;
    let point = IvPoint {
        moneyness: Some(moneyness),
        log_moneyness: Some(ln_decimal(moneyness)),
        ..point
    };

    if input.otm_only {
        let itm = match quote.option_type {
            OptionType::Call => quote.strike < forward,
            OptionType::Put => quote.strike > forward,
        };
        if itm {
            return filtered(point, "in the money");
        }
    }

    let market_price = match quote.observed_price(input.price_source) {
        Some(p) => p,
        None => return filtered(point, "no usable price"),
    };
    let point = IvPoint {
        market_price: Some(market_price),
        ..point
    };

    if let Some(min_volume) = input.filters.min_volume {
        if quote.volume.unwrap_or(0) < min_volume {
            return filtered(point, "volume below minimum");
        }
    }
    if let (Some(max_spread), Some(spread)) =
        (input.filters.max_relative_spread, quote.relative_spread())
    {
        if spread > max_spread {
            return filtered(point, "bid-ask spread too wide");
        }
    }
    if market_price < input.filters.min_price {
        return filtered(point, "price below minimum");
    }

    let iv_input = ImpliedVolInput {
        spot_price: input.spot_price,
        strike_price: quote.strike,
        time_to_expiry: t,
        risk_free_rate: input.risk_free_rate,
        dividend_yield: input.dividend_yield,
        option_type: quote.option_type,
        market_price,
        solver: input.solver.clone(),
    };

    match solve_implied_vol(&iv_input) {
        Ok(out) => IvPoint {
            implied_vol: Some(out.implied_vol),
            vendor_iv_diff: quote.vendor_iv.map(|v| out.implied_vol - v),
            iterations: Some(out.iterations),
            status: QuoteStatus::Solved,
            ..point
        },
        Err(e) => IvPoint {
            status: QuoteStatus::Failed {
                kind: e.kind().into(),
                reason: e.to_string(),
            },
            ..point
        },
    }
}

// ---------------------------------------------------------------------------
// Aggregation helpers
// ---------------------------------------------------------------------------

fn forward_price(s: Decimal, r: Decimal, q: Decimal, t: Decimal) -> Decimal {
    s * exp_decimal((r - q) * t)
}

fn lerp(x: Decimal, x0: Decimal, x1: Decimal, y0: Decimal, y1: Decimal) -> Decimal {
    if x1 == x0 {
        return y0;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// (log-moneyness, strike, vol) sorted by log-moneyness, with call/put
/// duplicates at the same strike averaged.
fn smile_nodes(points: &[&IvPoint]) -> Vec<(Decimal, Decimal, Decimal)> {
    let mut by_strike: BTreeMap<Decimal, (Decimal, Decimal, u32)> = BTreeMap::new();
    for p in points {
        if let (Some(x), Some(v)) = (p.log_moneyness, p.implied_vol) {
            let entry = by_strike.entry(p.strike).or_insert((x, Decimal::ZERO, 0));
            entry.1 += v;
            entry.2 += 1;
        }
    }
    // Log-moneyness is increasing in strike for a fixed expiry
    by_strike
        .into_iter()
        .map(|(k, (x, sum, n))| (x, k, sum / Decimal::from(n)))
        .collect()
}

fn interpolate_atm(nodes: &[(Decimal, Decimal, Decimal)]) -> Decimal {
    let first = nodes[0];
    let last = nodes[nodes.len() - 1];
    if Decimal::ZERO <= first.0 {
        return first.2;
    }
    if Decimal::ZERO >= last.0 {
        return last.2;
    }
    for pair in nodes.windows(2) {
        let (x0, _, v0) = pair[0];
        let (x1, _, v1) = pair[1];
        if x0 <= Decimal::ZERO && Decimal::ZERO <= x1 {
            return lerp(Decimal::ZERO, x0, x1, v0, v1);
        }
    }
    last.2
}

/// Ordinary least squares slope of vol against log-moneyness.
fn skew_slope(nodes: &[(Decimal, Decimal, Decimal)]) -> Option<Decimal> {
    if nodes.len() < 2 {
        return None;
    }
    let n = Decimal::from(nodes.len() as u64);
    let mean_x = nodes.iter().map(|(x, _, _)| *x).sum::<Decimal>() / n;
    let mean_v = nodes.iter().map(|(_, _, v)| *v).sum::<Decimal>() / n;
    let mut sxx = Decimal::ZERO;
    let mut sxv = Decimal::ZERO;
    for (x, _, v) in nodes {
        sxx += (*x - mean_x) * (*x - mean_x);
        sxv += (*x - mean_x) * (*v - mean_v);
    }
    if sxx.is_zero() {
        None
    } else {
        Some(sxv / sxx)
    }
}

fn build_skew(input: &ChainInput, points: &[IvPoint]) -> Vec<SkewSlice> {
    let mut by_expiry: BTreeMap<Decimal, Vec<&IvPoint>> = BTreeMap::new();
    for p in points {
        if let (QuoteStatus::Solved, Some(t)) = (&p.status, p.expiry) {
            by_expiry.entry(t).or_default().push(p);
        }
    }

    let mut slices = Vec::new();
    for (t, group) in by_expiry {
        let nodes = smile_nodes(&group);
        if nodes.is_empty() {
            continue;
        }
        let (min_vol, min_vol_strike) = nodes
            .iter()
            .map(|(_, k, v)| (*v, *k))
            .min_by(|a, b| a.0.cmp(&b.0))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));

        slices.push(SkewSlice {
            expiry: t,
            forward: forward_price(input.spot_price, input.risk_free_rate, input.dividend_yield, t),
            atm_vol: interpolate_atm(&nodes),
            put_wing_vol: nodes[0].2,
            call_wing_vol: nodes[nodes.len() - 1].2,
            skew_slope: skew_slope(&nodes),
            min_vol,
            min_vol_strike,
            points: nodes.len(),
        });
    }
    slices
}

fn build_term_structure(skew: &[SkewSlice], warnings: &mut Vec<String>) -> Vec<TermPoint> {
    let mut term = Vec::with_capacity(skew.len());
    for (i, slice) in skew.iter().enumerate() {
        let t = slice.expiry;
        let total_variance = slice.atm_vol * slice.atm_vol * t;
        let forward_vol = if i == 0 {
            slice.atm_vol
        } else {
            let prev = &skew[i - 1];
            let prev_variance = prev.atm_vol * prev.atm_vol * prev.expiry;
            let dt = t - prev.expiry;
            // sigma_fwd = sqrt((sigma2^2 * T2 - sigma1^2 * T1) / (T2 - T1))
            if total_variance >= prev_variance {
                sqrt_decimal((total_variance - prev_variance) / dt)
            } else {
                warnings.push(format!(
                    "ATM total variance decreases between T={} and T={t}",
                    prev.expiry
                ));
                Decimal::ZERO
            }
        };
        term.push(TermPoint {
            expiry: t,
            atm_vol: slice.atm_vol,
            total_variance,
            forward_vol,
        });
    }
    term
}

// ---------------------------------------------------------------------------
// Public API: analyze_chain
// ---------------------------------------------------------------------------

/// Solves implied vol for every quote of a chain snapshot. Per-quote
/// failures are recorded on the point and never abort the batch.
pub fn analyze_chain(input: &ChainInput) -> IvolResult<ComputationOutput<ChainOutput>> {
    let start = Instant::now();
    validate_input(input)?;

    let points: Vec<IvPoint> = input
        .quotes
        .iter()
        .map(|q| evaluate_quote(input, q))
        .collect();

    let solved = points
        .iter()
        .filter(|p| p.status == QuoteStatus::Solved)
        .count();
    let filtered_count = points
        .iter()
        .filter(|p| matches!(p.status, QuoteStatus::Filtered { .. }))
        .count();
    let failed = points.len() - solved - filtered_count;

    let mut warnings = Vec::new();
    if filtered_count > 0 {
        warnings.push(format!("{filtered_count} quote(s) filtered by data-quality screens"));
    }
    if failed > 0 {
        warnings.push(format!("{failed} quote(s) had no solvable implied volatility"));
    }

    let skew = build_skew(input, &points);
    let term_structure = build_term_structure(&skew, &mut warnings);

    debug!(
        quotes = points.len(),
        solved,
        filtered = filtered_count,
        failed,
        expiries = skew.len(),
        "chain analyzed"
    );

    let output = ChainOutput {
        points,
        skew,
        term_structure,
        solved,
        filtered: filtered_count,
        failed,
    };

    let assumptions = serde_json::json!({
        "model": "Black-Scholes (European)",
        "price_source": format!("{:?}", input.price_source),
        "day_count": "ACT/365",
        "otm_only": input.otm_only,
        "tolerance": input.solver.tolerance.to_string(),
        "max_iterations": input.solver.max_iterations,
    });

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Per-quote implied volatility with skew and term structure",
        &assumptions,
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
