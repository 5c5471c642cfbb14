use ivol_core::pricing::black_scholes::{price, BsInputs, OptionType};
use ivol_core::pricing::implied_vol::{
    implied_vol_newton, implied_volatility, solve_implied_vol, ImpliedVolInput, SolveMethod,
    SolverSettings,
};
use ivol_core::IvolError;
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn approx_eq(a: Decimal, b: Decimal, tol: Decimal) -> bool {
    (a - b).abs() < tol
}

fn market(s: Decimal, k: Decimal, t: Decimal, q: Decimal, sigma: Decimal, ot: OptionType) -> ImpliedVolInput {
    let p = price(&BsInputs {
        spot_price: s,
        strike_price: k,
        time_to_expiry: t,
        risk_free_rate: dec!(0.05),
        dividend_yield: q,
        volatility: sigma,
        option_type: ot,
    })
    .unwrap();
    ImpliedVolInput {
        spot_price: s,
        strike_price: k,
        time_to_expiry: t,
        risk_free_rate: dec!(0.05),
        dividend_yield: q,
        option_type: ot,
        market_price: p,
        solver: SolverSettings::default(),
    }
}

// ===========================================================================
// Round trip
// ===========================================================================

#[test]
fn test_reference_scenario() {
    let out = implied_volatility(&ImpliedVolInput {
        spot_price: dec!(100),
        strike_price: dec!(100),
        time_to_expiry: dec!(1),
        risk_free_rate: dec!(0.05),
        dividend_yield: dec!(0),
        option_type: OptionType::Call,
        market_price: dec!(10.4506),
        solver: SolverSettings::default(),
    })
    .unwrap();
    assert!(approx_eq(out.result.implied_vol, dec!(0.2), dec!(0.0001)));
    assert_eq!(out.result.method, SolveMethod::Newton);
    assert!(out.warnings.is_empty());
}

#[test]
fn test_round_trip_across_strikes_and_types() {
    let cases = [
        (dec!(80), dec!(0.25), dec!(0), dec!(0.35), OptionType::Put),
        (dec!(100), dec!(0.5), dec!(0.02), dec!(0.15), OptionType::Call),
        (dec!(120), dec!(2), dec!(0.01), dec!(0.45), OptionType::Call),
        (dec!(105), dec!(0.1), dec!(0), dec!(0.80), OptionType::Put),
    ];
    for (k, t, q, sigma, ot) in cases {
        let input = market(dec!(100), k, t, q, sigma, ot);
        let out = solve_implied_vol(&input).unwrap();
        assert!(
            approx_eq(out.implied_vol, sigma, dec!(0.0001)),
            "K={k} T={t} {ot}: got {}, expected {sigma}",
            out.implied_vol
        );
        assert!(out.price_error.abs() < dec!(0.0001));
    }
}

#[test]
fn test_newton_is_fast_near_the_money() {
    let out = implied_vol_newton(&market(dec!(100), dec!(100), dec!(1), dec!(0), dec!(0.3), OptionType::Call)).unwrap();
    assert!(out.iterations <= 10, "took {} iterations", out.iterations);
}

// ===========================================================================
// Failure modes
// ===========================================================================

#[test]
fn test_price_above_spot_is_out_of_bounds() {
    let mut input = market(dec!(100), dec!(100), dec!(1), dec!(0), dec!(0.2), OptionType::Call);
    input.market_price = dec!(200);
    match solve_implied_vol(&input).unwrap_err() {
        IvolError::PriceOutOfBounds { market_price, upper, .. } => {
            assert_eq!(market_price, dec!(200));
            assert_eq!(upper, dec!(100));
        }
        other => panic!("Expected PriceOutOfBounds, got {other:?}"),
    }
}

#[test]
fn test_price_below_intrinsic_is_out_of_bounds() {
    let mut input = market(dec!(100), dec!(70), dec!(0.5), dec!(0), dec!(0.2), OptionType::Call);
    input.market_price = dec!(25);
    assert!(matches!(
        solve_implied_vol(&input),
        Err(IvolError::PriceOutOfBounds { .. })
    ));
}

#[test]
fn test_zero_vega_without_fallback() {
    let mut input = market(dec!(100), dec!(300), dec!(0.02), dec!(0), dec!(0.2), OptionType::Call);
    input.market_price = dec!(0.0000001);
    input.solver.bisection_fallback = false;
    input.solver.tolerance = dec!(0.000000001);
    assert!(matches!(
        solve_implied_vol(&input),
        Err(IvolError::DegenerateVega { .. })
    ));
}

#[test]
fn test_fallback_reported_as_warning() {
    let mut input = market(dec!(100), dec!(160), dec!(0.25), dec!(0), dec!(0.60), OptionType::Call);
    input.solver.initial_vol = Some(dec!(0.01));
    let out = implied_volatility(&input).unwrap();
    assert!(approx_eq(out.result.implied_vol, dec!(0.60), dec!(0.001)));
    assert_eq!(out.result.method, SolveMethod::Bisection);
    assert!(out.warnings.iter().any(|w| w.contains("bisection")));
}

#[test]
fn test_newton_budget_exhaustion_falls_back_to_bisection() {
    let mut input = market(dec!(100), dec!(100), dec!(1), dec!(0), dec!(0.2), OptionType::Call);
    input.solver.max_iterations = 1;
    input.solver.initial_vol = Some(dec!(1.5));
    let out = implied_volatility(&input).unwrap();
    assert_eq!(out.result.method, SolveMethod::Bisection);
    assert!(approx_eq(out.result.implied_vol, dec!(0.2), dec!(0.0001)));
    assert!(out.result.iterations > 1);
    assert!(out.warnings.iter().any(|w| w.contains("No convergence")));
}

#[test]
fn test_zero_priced_put_reports_floor_with_warning() {
    let mut input = market(dec!(100), dec!(50), dec!(1), dec!(0), dec!(0.2), OptionType::Put);
    input.market_price = dec!(0);
    let out = implied_volatility(&input).unwrap();
    assert_eq!(out.result.implied_vol, input.solver.vol_floor);
    assert_eq!(out.result.method, SolveMethod::LowerBound);
    assert_eq!(out.warnings.len(), 1);
}

#[test]
fn test_invalid_market_inputs() {
    let mut input = market(dec!(100), dec!(100), dec!(1), dec!(0), dec!(0.2), OptionType::Call);
    input.time_to_expiry = dec!(0);
    assert!(matches!(
        solve_implied_vol(&input),
        Err(IvolError::InvalidInput { .. })
    ));
}

#[test]
fn test_settings_deserialize_with_defaults() {
    let json = r#"{
        "spot_price": "100",
        "strike_price": "100",
        "time_to_expiry": "1",
        "risk_free_rate": "0.05",
        "option_type": "call",
        "market_price": "10.4506",
        "solver": { "tolerance": "0.00000001" }
    }"#;
    let input: ImpliedVolInput = serde_json::from_str(json).unwrap();
    assert_eq!(input.dividend_yield, Decimal::ZERO);
    assert_eq!(input.solver.tolerance, dec!(0.00000001));
    assert_eq!(input.solver.max_iterations, 100);
    assert!(input.solver.bisection_fallback);
}
