pub mod chain;
pub mod pricing;
