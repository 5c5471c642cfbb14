mod commands;
mod input;
mod logging;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;

use commands::chain::ChainArgs;
use commands::pricing::{ImpliedVolArgs, ParityArgs, PriceArgs};
use logging::LogFormat;

/// Black-Scholes pricing and implied volatility
#[derive(Parser)]
#[command(
    name = "ivol",
    version,
    about = "Black-Scholes pricing and implied volatility",
    long_about = "Prices European options under Black-Scholes with a continuous dividend \
                  yield and inverts observed prices to implied volatility with decimal \
                  precision. Batch mode analyses a whole option chain (skew and term structure)."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Diagnostic log format (written to stderr)
    #[arg(long, default_value = "pretty", global = true)]
    log_format: LogFormat,

    /// Debug-level diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Price a European option with Greeks
    Price(PriceArgs),
    /// Solve the volatility that reproduces an observed price
    ImpliedVol(ImpliedVolArgs),
    /// Check put-call parity for a call/put pair
    Parity(ParityArgs),
    /// Implied vols, skew and term structure for an option chain
    Chain(ChainArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(cli.log_format, cli.verbose) {
        eprintln!("{}: failed to initialise logging: {}", "warning".yellow().bold(), e);
    }

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Price(args) => commands::pricing::run_price(args),
        Commands::ImpliedVol(args) => commands::pricing::run_implied_vol(args),
        Commands::Parity(args) => commands::pricing::run_parity(args),
        Commands::Chain(args) => commands::chain::run_chain(args),
        Commands::Version => {
            println!("ivol {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            tracing::debug!(error = %e, "command failed");
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
