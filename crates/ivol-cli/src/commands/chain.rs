use clap::Args;
use serde_json::Value;

use ivol_core::pricing::chain::{self, ChainInput};

use crate::input;

/// Arguments for option-chain analysis
#[derive(Args)]
pub struct ChainArgs {
    /// Path to JSON/YAML chain snapshot
    #[arg(long)]
    pub input: Option<String>,

    /// Keep only out-of-the-money strikes
    #[arg(long)]
    pub otm_only: bool,
}

pub fn run_chain(args: ChainArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut chain_input: ChainInput = input::load(args.input.as_deref())?
        .ok_or("--input <file.json|file.yaml> or stdin required for chain analysis")?;
    if args.otm_only {
        chain_input.otm_only = true;
    }
    let result = chain::analyze_chain(&chain_input)?;
    Ok(serde_json::to_value(result)?)
}
