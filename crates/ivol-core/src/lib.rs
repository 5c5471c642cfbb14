pub mod error;
pub mod math;
pub mod pricing;
pub mod types;

pub use error::IvolError;
pub use pricing::black_scholes::{
    no_arbitrage_bounds, price, price_and_vega, price_option, put_call_parity_check, vega,
    BsInputs, OptionType,
};
pub use pricing::implied_vol::{
    implied_vol_bisection, implied_vol_newton, implied_volatility, solve_implied_vol,
    ImpliedVolInput, SolverSettings,
};
pub use types::*;

/// Standard result type for all ivol operations
pub type IvolResult<T> = Result<T, IvolError>;
