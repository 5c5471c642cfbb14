pub mod black_scholes;
pub mod implied_vol;

#[cfg(feature = "chain")]
pub mod chain;
