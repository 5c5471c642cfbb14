use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, trace};

use super::black_scholes::{validate_market, BlackScholes, OptionType, PricingResult};
use crate::error::IvolError;
use crate::math::sqrt_decimal;
use crate::types::*;
use crate::IvolResult;

/// Slack applied to the no-arbitrage bounds before rejecting a price.
const BOUNDS_SLACK: Decimal = dec!(0.000000000001);

/// Bisection stops once the bracket is narrower than this.
const MIN_BRACKET_WIDTH: Decimal = dec!(0.000000000001);

const GUESS_FLOOR: Decimal = dec!(0.05);
const GUESS_CEILING: Decimal = dec!(3.0);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Tunable solver constants. Every field has a default so input files only
/// need to name what they override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Absolute tolerance on |model price - market price|
    pub tolerance: Decimal,
    pub max_iterations: u32,
    /// Starting sigma; Brenner-Subrahmanyam on the time value when absent
    pub initial_vol: Option<Rate>,
    pub vol_floor: Rate,
    pub vol_ceiling: Rate,
    /// Newton steps are refused below this vega
    pub vega_floor: Decimal,
    pub bisection_fallback: bool,
    pub max_bisection_iterations: u32,
    /// Reject prices outside the European no-arbitrage range up front
    pub enforce_bounds: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            tolerance: dec!(0.000001),
            max_iterations: 100,
            initial_vol: None,
            vol_floor: dec!(0.000001),
            vol_ceiling: dec!(5.0),
            vega_floor: dec!(0.0000000001),
            bisection_fallback: true,
            max_bisection_iterations: 200,
            enforce_bounds: true,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> IvolResult<()> {
        if self.tolerance <= Decimal::ZERO {
            return Err(IvolError::invalid("solver.tolerance", "must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(IvolError::invalid("solver.max_iterations", "must be at least 1"));
        }
        if self.vol_floor <= Decimal::ZERO {
            return Err(IvolError::invalid("solver.vol_floor", "must be positive"));
        }
        if self.vol_ceiling <= self.vol_floor {
            return Err(IvolError::invalid(
                "solver.vol_ceiling",
                "must be greater than vol_floor",
            ));
        }
        if self.vol_ceiling > dec!(100) {
            return Err(IvolError::invalid("solver.vol_ceiling", "must not exceed 100"));
        }
        if self.vega_floor < Decimal::ZERO {
            return Err(IvolError::invalid("solver.vega_floor", "must be non-negative"));
        }
        if self.bisection_fallback && self.max_bisection_iterations == 0 {
            return Err(IvolError::invalid(
                "solver.max_bisection_iterations",
                "must be at least 1 when bisection_fallback is enabled",
            ));
        }
        if let Some(v) = self.initial_vol {
            if v <= Decimal::ZERO {
                return Err(IvolError::invalid("solver.initial_vol", "must be positive"));
            }
        }
        Ok(())
    }
}

/// An observed option price to invert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpliedVolInput {
    pub spot_price: Money,
    pub strike_price: Money,
    pub time_to_expiry: Years,
    pub risk_free_rate: Rate,
    #[serde(default)]
    pub dividend_yield: Rate,
    pub option_type: OptionType,
    pub market_price: Money,
    #[serde(default)]
    pub solver: SolverSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveMethod {
    Newton,
    Bisection,
    /// Price sits on the no-arbitrage lower bound; no search was run
    LowerBound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpliedVolOutput {
    pub implied_vol: Rate,
    /// Total pricer evaluations across Newton and any bisection fallback
    pub iterations: u32,
    pub method: SolveMethod,
    /// Model price minus market price at the returned vol
    pub price_error: Money,
    pub initial_guess: Rate,
}

/// Success with sigma, or the reason the quote has no usable implied vol.
pub type VolatilityEstimate = IvolResult<ImpliedVolOutput>;

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

struct Problem {
    bs: BlackScholes,
    target: Decimal,
    lower: Decimal,
}

fn prepare(input: &ImpliedVolInput) -> IvolResult<Problem> {
    input.solver.validate()?;
    validate_market(
        input.spot_price,
        input.strike_price,
        input.time_to_expiry,
        input.risk_free_rate,
        input.dividend_yield,
    )?;
    if input.market_price < Decimal::ZERO {
        return Err(IvolError::invalid("market_price", "must be non-negative"));
    }

    let bs = BlackScholes::new(
        input.spot_price,
        input.strike_price,
        input.time_to_expiry,
        input.risk_free_rate,
        input.dividend_yield,
        input.option_type,
    );
    let (lower, upper) = bs.bounds();

    if input.solver.enforce_bounds
        && (input.market_price < lower - BOUNDS_SLACK || input.market_price > upper + BOUNDS_SLACK)
    {
        return Err(IvolError::PriceOutOfBounds {
            market_price: input.market_price,
            lower,
            upper,
        });
    }

    Ok(Problem {
        bs,
        target: input.market_price,
        lower,
    })
}

/// Brenner-Subrahmanyam applied to the time value:
/// sigma0 = sqrt(2*pi/T) * (P - lower bound) / (S*e^(-qT)).
fn initial_guess(problem: &Problem, settings: &SolverSettings) -> Decimal {
    let guess = match settings.initial_vol {
        Some(v) => v,
        None => {
            let two_pi = dec!(6.283185307179586);
            let time_value = (problem.target - problem.lower).max(Decimal::ZERO);
            let scale = sqrt_decimal(two_pi / problem.bs.t);
            (scale * time_value / problem.bs.pv_spot()).clamp(GUESS_FLOOR, GUESS_CEILING)
        }
    };
    guess.clamp(settings.vol_floor, settings.vol_ceiling)
}

/// A price within tolerance of the lower bound has no time value to invert.
/// Every sigma near zero reproduces it, so report the floor instead of the
/// starting guess.
fn at_lower_bound(problem: &Problem, sigma0: Decimal, settings: &SolverSettings) -> Option<ImpliedVolOutput> {
    if (problem.target - problem.lower).abs() >= settings.tolerance {
        return None;
    }
    let floor = settings.vol_floor;
    Some(ImpliedVolOutput {
        implied_vol: floor,
        iterations: 1,
        method: SolveMethod::LowerBound,
        price_error: problem.bs.price(floor) - problem.target,
        initial_guess: sigma0,
    })
}

// ---------------------------------------------------------------------------
// Root finders
// ---------------------------------------------------------------------------

fn newton(problem: &Problem, sigma0: Decimal, settings: &SolverSettings) -> VolatilityEstimate {
    let mut sigma = sigma0;
    let mut last_delta = Decimal::ZERO;

    for i in 0..settings.max_iterations {
        let PricingResult { price, vega } = problem.bs.price_and_vega(sigma);
        let diff = price - problem.target;
        last_delta = diff.abs();
        trace!(iteration = i + 1, sigma = %sigma, diff = %diff, vega = %vega, "newton step");

        if last_delta < settings.tolerance {
            return Ok(ImpliedVolOutput {
                implied_vol: sigma,
                iterations: i + 1,
                method: SolveMethod::Newton,
                price_error: diff,
                initial_guess: sigma0,
            });
        }

        // Vega too small: deep ITM/OTM or near expiry
        if vega < settings.vega_floor || vega.is_zero() {
            return Err(IvolError::DegenerateVega { sigma, vega });
        }

        sigma = (sigma - diff / vega).clamp(settings.vol_floor, settings.vol_ceiling);
    }

    Err(IvolError::NoConvergence {
        function: "implied_vol_newton".into(),
        iterations: settings.max_iterations,
        last_delta,
    })
}

fn bisection(problem: &Problem, sigma0: Decimal, settings: &SolverSettings) -> VolatilityEstimate {
    let mut low = settings.vol_floor;
    let mut high = settings.vol_ceiling;
    let f_low_start = problem.bs.price(low) - problem.target;
    let f_high = problem.bs.price(high) - problem.target;

    let done = |sigma: Decimal, diff: Decimal, iterations: u32| ImpliedVolOutput {
        implied_vol: sigma,
        iterations,
        method: SolveMethod::Bisection,
        price_error: diff,
        initial_guess: sigma0,
    };

    if f_low_start.abs() < settings.tolerance {
        return Ok(done(low, f_low_start, 1));
    }
    if f_high.abs() < settings.tolerance {
        return Ok(done(high, f_high, 2));
    }
    // Price is increasing in sigma, so the root needs f(low) < 0 < f(high)
    if f_low_start.is_sign_positive() == f_high.is_sign_positive() {
        return Err(IvolError::BracketingFailure { low, high });
    }

    let mut f_low = f_low_start;
    let mut last_delta = f_low.abs();
    for i in 0..settings.max_bisection_iterations {
        let mid = (low + high) / dec!(2);
        let f_mid = problem.bs.price(mid) - problem.target;
        last_delta = f_mid.abs();

        if last_delta < settings.tolerance || (high - low) < MIN_BRACKET_WIDTH {
            return Ok(done(mid, f_mid, i + 3));
        }

        if f_low.is_sign_positive() != f_mid.is_sign_positive() {
            high = mid;
        } else {
            low = mid;
            f_low = f_mid;
        }
    }

    Err(IvolError::NoConvergence {
        function: "implied_vol_bisection".into(),
        iterations: settings.max_bisection_iterations,
        last_delta,
    })
}

/// Newton first; on a degenerate vega or an exhausted budget, bisection when
/// enabled. Also returns the Newton failure that triggered the fallback.
fn solve(input: &ImpliedVolInput) -> IvolResult<(ImpliedVolOutput, Option<IvolError>)> {
    let settings = &input.solver;
    let problem = prepare(input)?;
    let sigma0 = initial_guess(&problem, settings);

    debug!(
        option_type = %input.option_type,
        strike = %input.strike_price,
        market_price = %input.market_price,
        initial_guess = %sigma0,
        "solving implied volatility"
    );

    if let Some(out) = at_lower_bound(&problem, sigma0, settings) {
        debug!(implied_vol = %out.implied_vol, "price on lower bound");
        return Ok((out, None));
    }

    match newton(&problem, sigma0, settings) {
        Ok(out) => {
            debug!(implied_vol = %out.implied_vol, iterations = out.iterations, "newton converged");
            Ok((out, None))
        }
        Err(err @ (IvolError::DegenerateVega { .. } | IvolError::NoConvergence { .. }))
            if settings.bisection_fallback =>
        {
            debug!(reason = %err, "newton failed, falling back to bisection");
            let newton_iterations = match &err {
                IvolError::NoConvergence { iterations, .. } => *iterations,
                _ => 0,
            };
            let mut out = bisection(&problem, sigma0, settings)?;
            out.iterations += newton_iterations;
            debug!(implied_vol = %out.implied_vol, iterations = out.iterations, "bisection converged");
            Ok((out, Some(err)))
        }
        Err(err) => Err(err),
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Newton-Raphson with bisection fallback, without the metadata envelope.
pub fn solve_implied_vol(input: &ImpliedVolInput) -> VolatilityEstimate {
    solve(input).map(|(out, _)| out)
}

/// Pure Newton-Raphson; never falls back.
pub fn implied_vol_newton(input: &ImpliedVolInput) -> VolatilityEstimate {
    let problem = prepare(input)?;
    let sigma0 = initial_guess(&problem, &input.solver);
    if let Some(out) = at_lower_bound(&problem, sigma0, &input.solver) {
        return Ok(out);
    }
    newton(&problem, sigma0, &input.solver)
}

/// Bisection on [vol_floor, vol_ceiling]. Slower than Newton but needs no derivative.
pub fn implied_vol_bisection(input: &ImpliedVolInput) -> VolatilityEstimate {
    let settings = &input.solver;
    if settings.max_bisection_iterations == 0 {
        return Err(IvolError::invalid(
            "solver.max_bisection_iterations",
            "must be at least 1",
        ));
    }
    let problem = prepare(input)?;
    let sigma0 = initial_guess(&problem, settings);
    bisection(&problem, sigma0, settings)
}

pub fn implied_volatility(
    input: &ImpliedVolInput,
) -> IvolResult<ComputationOutput<ImpliedVolOutput>> {
    let start = Instant::now();
    let (output, newton_failure) = solve(input)?;

    let mut warnings = Vec::new();
    if let Some(err) = newton_failure {
        warnings.push(format!("Newton-Raphson abandoned ({err}); result from bisection"));
    }
    if output.implied_vol <= input.solver.vol_floor {
        warnings.push("Implied vol sits on the solver floor; price is at its lower bound".into());
    }

    let methodology = match output.method {
        SolveMethod::Newton => "Newton-Raphson implied volatility",
        SolveMethod::Bisection => "Bisection implied volatility (Newton fallback)",
        SolveMethod::LowerBound => "Implied volatility at the no-arbitrage lower bound",
    };

    let assumptions = serde_json::json!({
        "model": "Black-Scholes (European)",
        "initial_vol": output.initial_guess.to_string(),
        "max_iterations": input.solver.max_iterations,
        "tolerance": input.solver.tolerance.to_string(),
        "vol_bracket": [input.solver.vol_floor.to_string(), input.solver.vol_ceiling.to_string()],
        "bisection_fallback": input.solver.bisection_fallback,
    });

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(methodology, &assumptions, warnings, elapsed, output))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::black_scholes::{price, BsInputs};

    fn approx_eq(a: Decimal, b: Decimal, tol: Decimal) -> bool {
        (a - b).abs() < tol
    }

    fn model_price(s: Decimal, k: Decimal, t: Decimal, sigma: Decimal, ot: OptionType) -> Decimal {
        price(&BsInputs {
            spot_price: s,
            strike_price: k,
            time_to_expiry: t,
            risk_free_rate: dec!(0.05),
            dividend_yield: dec!(0),
            volatility: sigma,
            option_type: ot,
        })
        .unwrap()
    }

    fn iv_input(market_price: Decimal) -> ImpliedVolInput {
        ImpliedVolInput {
            spot_price: dec!(100),
            strike_price: dec!(100),
            time_to_expiry: dec!(1),
            risk_free_rate: dec!(0.05),
            dividend_yield: dec!(0),
            option_type: OptionType::Call,
            market_price,
            solver: SolverSettings::default(),
        }
    }

    #[test]
    fn test_reference_roundtrip() {
        let out = solve_implied_vol(&iv_input(dec!(10.4506))).unwrap();
        assert!(approx_eq(out.implied_vol, dec!(0.20), dec!(0.0001)), "iv {}", out.implied_vol);
        assert_eq!(out.method, SolveMethod::Newton);
        assert!(out.price_error.abs() < dec!(0.000001));
    }

    #[test]
    fn test_newton_converges_quickly_atm() {
        let p = model_price(dec!(100), dec!(100), dec!(0.5), dec!(0.25), OptionType::Call);
        let input = ImpliedVolInput {
            time_to_expiry: dec!(0.5),
            ..iv_input(p)
        };
        let out = implied_vol_newton(&input).unwrap_or_else(|e| panic!("{e}"));
        assert!(approx_eq(out.implied_vol, dec!(0.25), dec!(0.0001)));
        assert!(out.iterations <= 10, "took {} iterations", out.iterations);
    }

    #[test]
    fn test_price_above_spot_out_of_bounds() {
        match solve_implied_vol(&iv_input(dec!(200))).unwrap_err() {
            IvolError::PriceOutOfBounds {
                market_price,
                upper,
                ..
            } => {
                assert_eq!(market_price, dec!(200));
                assert_eq!(upper, dec!(100));
            }
            other => panic!("Expected PriceOutOfBounds, got {other:?}"),
        }
    }

    #[test]
    fn test_price_below_intrinsic_out_of_bounds() {
        // Lower bound is S - K*e^(-rT) ~ 4.877
        let err = solve_implied_vol(&iv_input(dec!(3))).unwrap_err();
        assert!(matches!(err, IvolError::PriceOutOfBounds { .. }));
    }

    #[test]
    fn test_negative_market_price_invalid() {
        let err = solve_implied_vol(&iv_input(dec!(-1))).unwrap_err();
        assert!(matches!(err, IvolError::InvalidInput { ref field, .. } if field == "market_price"));
    }

    #[test]
    fn test_degenerate_vega_without_fallback() {
        // Deep OTM short-dated call: vega vanishes at the starting guess
        let mut input = ImpliedVolInput {
            strike_price: dec!(300),
            time_to_expiry: dec!(0.02),
            market_price: dec!(0.0000001),
            ..iv_input(dec!(0))
        };
        input.solver.bisection_fallback = false;
        input.solver.tolerance = dec!(0.000000001);
        let err = solve_implied_vol(&input).unwrap_err();
        assert!(matches!(err, IvolError::DegenerateVega { .. }), "got {err:?}");
    }

    #[test]
    fn test_bisection_fallback_recovers_deep_otm() {
        let p = model_price(dec!(100), dec!(160), dec!(0.25), dec!(0.60), OptionType::Call);
        let input = ImpliedVolInput {
            strike_price: dec!(160),
            time_to_expiry: dec!(0.25),
            market_price: p,
            solver: SolverSettings {
                initial_vol: Some(dec!(0.01)),
                ..SolverSettings::default()
            },
            ..iv_input(dec!(0))
        };
        let out = implied_volatility(&input).unwrap();
        assert!(approx_eq(out.result.implied_vol, dec!(0.60), dec!(0.001)));
        // Vega is ~0 at sigma = 0.01, so Newton bails out immediately
        assert_eq!(out.result.method, SolveMethod::Bisection);
        assert!(out.warnings.iter().any(|w| w.contains("bisection")));
    }

    #[test]
    fn test_exhausted_newton_budget_falls_back() {
        let mut input = iv_input(dec!(10.4506));
        input.solver.max_iterations = 1;
        input.solver.initial_vol = Some(dec!(1.5));
        let out = solve_implied_vol(&input).unwrap();
        assert_eq!(out.method, SolveMethod::Bisection);
        assert!(approx_eq(out.implied_vol, dec!(0.2), dec!(0.0001)));
        // One Newton step plus the bisection evaluations
        assert!(out.iterations > 1);
    }

    #[test]
    fn test_no_convergence_with_tiny_budget() {
        let mut input = iv_input(dec!(10.4506));
        input.solver.max_iterations = 1;
        input.solver.bisection_fallback = false;
        input.solver.initial_vol = Some(dec!(1.5));
        let err = solve_implied_vol(&input).unwrap_err();
        match err {
            IvolError::NoConvergence { iterations, .. } => assert_eq!(iterations, 1),
            other => panic!("Expected NoConvergence, got {other:?}"),
        }
    }

    #[test]
    fn test_bisection_only() {
        let p = model_price(dec!(100), dec!(90), dec!(0.75), dec!(0.35), OptionType::Put);
        let input = ImpliedVolInput {
            strike_price: dec!(90),
            time_to_expiry: dec!(0.75),
            option_type: OptionType::Put,
            market_price: p,
            ..iv_input(dec!(0))
        };
        let out = implied_vol_bisection(&input).unwrap();
        assert_eq!(out.method, SolveMethod::Bisection);
        assert!(approx_eq(out.implied_vol, dec!(0.35), dec!(0.0001)));
    }

    #[test]
    fn test_bracketing_failure_when_bounds_not_enforced() {
        let mut input = iv_input(dec!(150));
        input.solver.enforce_bounds = false;
        let err = implied_vol_bisection(&input).unwrap_err();
        assert!(matches!(err, IvolError::BracketingFailure { .. }), "got {err:?}");
    }

    #[test]
    fn test_price_at_lower_bound_returns_floor() {
        // OTM put worth nothing: root sits on the volatility floor
        let input = ImpliedVolInput {
            strike_price: dec!(50),
            option_type: OptionType::Put,
            market_price: dec!(0),
            ..iv_input(dec!(0))
        };
        let out = implied_volatility(&input).unwrap();
        assert_eq!(out.result.implied_vol, input.solver.vol_floor);
        assert_eq!(out.result.method, SolveMethod::LowerBound);
        assert!(out.warnings.iter().any(|w| w.contains("floor")));
    }

    #[test]
    fn test_call_at_discounted_intrinsic_returns_floor() {
        // Lower bound for a deep ITM call: S - K*e^(-rT)
        let bs = BlackScholes::new(dec!(100), dec!(50), dec!(1), dec!(0.05), dec!(0), OptionType::Call);
        let (lower, _) = bs.bounds();
        let input = ImpliedVolInput {
            strike_price: dec!(50),
            market_price: lower,
            ..iv_input(dec!(0))
        };
        let out = implied_volatility(&input).unwrap();
        assert_eq!(out.result.implied_vol, dec!(0.000001));
        assert_eq!(out.warnings.len(), 1);

        // Newton-only entry point agrees
        let newton_only = implied_vol_newton(&input).unwrap();
        assert_eq!(newton_only.method, SolveMethod::LowerBound);
    }

    #[test]
    fn test_invalid_solver_settings() {
        let mut input = iv_input(dec!(10));
        input.solver.vol_ceiling = dec!(0.0000001);
        let err = solve_implied_vol(&input).unwrap_err();
        assert!(matches!(err, IvolError::InvalidInput { ref field, .. } if field == "solver.vol_ceiling"));
    }

    #[test]
    fn test_solver_settings_serde_defaults() {
        let settings: SolverSettings = serde_json::from_str(r#"{"tolerance": "0.0001"}"#).unwrap();
        assert_eq!(settings.tolerance, dec!(0.0001));
        assert_eq!(settings.max_iterations, 100);
        assert!(settings.bisection_fallback);
    }
}
