use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use ivol_core::pricing::black_scholes::{self, BsInputs, OptionType, ParityInput};
use ivol_core::pricing::implied_vol::{self, ImpliedVolInput, SolverSettings};

use crate::input;

/// Market parameters shared by every single-option command
#[derive(Args)]
pub struct MarketArgs {
    /// Underlying spot price
    #[arg(long)]
    pub spot: Option<Decimal>,

    /// Strike price
    #[arg(long)]
    pub strike: Option<Decimal>,

    /// Time to expiry in years (e.g. 0.25 for three months)
    #[arg(long)]
    pub expiry: Option<Decimal>,

    /// Continuously compounded risk-free rate (e.g. 0.05 for 5%)
    #[arg(long)]
    pub rate: Option<Decimal>,

    /// Continuous dividend yield
    #[arg(long, default_value = "0")]
    pub dividend_yield: Decimal,
}

/// Arguments for Black-Scholes pricing
#[derive(Args)]
#[command(allow_hyphen_values = true)]
pub struct PriceArgs {
    #[command(flatten)]
    pub market: MarketArgs,

    /// Volatility (e.g. 0.2 for 20%)
    #[arg(long)]
    pub vol: Option<Decimal>,

    /// call or put
    #[arg(long = "type", default_value = "call")]
    pub option_type: OptionType,

    /// Path to JSON/YAML input file (overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,
}

/// Arguments for implied volatility
#[derive(Args)]
#[command(allow_hyphen_values = true)]
pub struct ImpliedVolArgs {
    #[command(flatten)]
    pub market: MarketArgs,

    /// Observed option price
    #[arg(long)]
    pub price: Option<Decimal>,

    /// call or put
    #[arg(long = "type", default_value = "call")]
    pub option_type: OptionType,

    /// Absolute price tolerance
    #[arg(long)]
    pub tolerance: Option<Decimal>,

    /// Newton iteration budget
    #[arg(long)]
    pub max_iter: Option<u32>,

    /// Fail instead of falling back to bisection
    #[arg(long)]
    pub no_fallback: bool,

    /// Path to JSON/YAML input file (overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,
}

/// Arguments for the put-call parity check
#[derive(Args)]
#[command(allow_hyphen_values = true)]
pub struct ParityArgs {
    #[command(flatten)]
    pub market: MarketArgs,

    #[arg(long)]
    pub call_price: Option<Decimal>,

    #[arg(long)]
    pub put_price: Option<Decimal>,

    /// Maximum |C - P - (S*e^(-qT) - K*e^(-rT))| still treated as parity
    #[arg(long, default_value = "0.000001")]
    pub tolerance: Decimal,

    /// Path to JSON/YAML input file (overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,
}

type Market = (Decimal, Decimal, Decimal, Decimal);

fn required_market(m: &MarketArgs) -> Result<Market, Box<dyn std::error::Error>> {
    Ok((
        m.spot.ok_or("--spot is required (or provide --input)")?,
        m.strike.ok_or("--strike is required (or provide --input)")?,
        m.expiry.ok_or("--expiry is required (or provide --input)")?,
        m.rate.ok_or("--rate is required (or provide --input)")?,
    ))
}

pub fn run_price(args: PriceArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let bs_input: BsInputs = match input::load(args.input.as_deref())? {
        Some(parsed) => parsed,
        None => {
            let (spot, strike, expiry, rate) = required_market(&args.market)?;
            BsInputs {
                spot_price: spot,
                strike_price: strike,
                time_to_expiry: expiry,
                risk_free_rate: rate,
                dividend_yield: args.market.dividend_yield,
                volatility: args.vol.ok_or("--vol is required (or provide --input)")?,
                option_type: args.option_type,
            }
        }
    };
    let result = black_scholes::price_option(&bs_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_implied_vol(args: ImpliedVolArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let iv_input: ImpliedVolInput = match input::load(args.input.as_deref())? {
        Some(parsed) => parsed,
        None => {
            let (spot, strike, expiry, rate) = required_market(&args.market)?;
            let defaults = SolverSettings::default();
            ImpliedVolInput {
                spot_price: spot,
                strike_price: strike,
                time_to_expiry: expiry,
                risk_free_rate: rate,
                dividend_yield: args.market.dividend_yield,
                option_type: args.option_type,
                market_price: args.price.ok_or("--price is required (or provide --input)")?,
                solver: SolverSettings {
                    tolerance: args.tolerance.unwrap_or(defaults.tolerance),
                    max_iterations: args.max_iter.unwrap_or(defaults.max_iterations),
                    bisection_fallback: !args.no_fallback,
                    ..defaults
                },
            }
        }
    };
    let result = implied_vol::implied_volatility(&iv_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_parity(args: ParityArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let parity_input: ParityInput = match input::load(args.input.as_deref())? {
        Some(parsed) => parsed,
        None => {
            let (spot, strike, expiry, rate) = required_market(&args.market)?;
            ParityInput {
                spot_price: spot,
                strike_price: strike,
                time_to_expiry: expiry,
                risk_free_rate: rate,
                dividend_yield: args.market.dividend_yield,
                call_price: args
                    .call_price
                    .ok_or("--call-price is required (or provide --input)")?,
                put_price: args
                    .put_price
                    .ok_or("--put-price is required (or provide --input)")?,
                tolerance: args.tolerance,
            }
        }
    };
    let result = black_scholes::put_call_parity_check(&parity_input)?;
    Ok(serde_json::to_value(result)?)
}
