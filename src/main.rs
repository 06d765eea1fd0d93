#![allow(dead_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};

pub use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};
pub use bitcoin::Network;

pub mod channel;
pub mod config;
pub mod errors;
pub mod interfaces;
pub mod keys;
pub mod link;
pub mod logger;
pub mod scripts;
pub mod store;
pub mod switch;
pub mod transactions;
pub mod types;
pub mod wire;

// Internal utilities
pub mod internal;

// Interactive CLI modules
pub mod interactive;

#[cfg(test)]
mod tests;

pub use types::*;

/// BOLT 3 index of the first per-commitment secret; height `h` uses
/// `INITIAL_COMMITMENT_NUMBER - h`.
pub const INITIAL_COMMITMENT_NUMBER: u64 = (1 << 48) - 1;

// ============================================================================
// CLI DEFINITION
// ============================================================================

#[derive(Parser)]
#[command(name = "pl-htlc-switch")]
#[command(version = "0.1")]
#[command(about = "Channel state machine and HTLC switch", long_about = None)]
struct Cli {
    #[arg(short = 'c', long, global = true, help = "Path to a JSON node config")]
    config: Option<PathBuf>,

    #[arg(short = 'l', long, global = true, help = "Log level (overridden by RUST_LOG)")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route a payment across three in-memory nodes
    Simulate {
        #[arg(short = 'a', long, default_value_t = 10_000, help = "Amount in satoshi")]
        amount_sat: u64,
    },
    /// Decode a hex-encoded wire message
    Decode {
        #[arg(short = 'm', long, help = "Message bytes (hex)")]
        message: String,
    },
    /// Payment hash of a hex preimage
    PaymentHash {
        #[arg(short = 'p', long, help = "Preimage (hex)")]
        preimage: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match config::NodeConfig::from_file(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{}", err);
                std::process::exit(2);
            }
        },
        None => config::NodeConfig::default(),
    };
    logger::init(cli.log_level.as_deref().unwrap_or(&config.log_level));

    let result = match &cli.command {
        Commands::Simulate { amount_sat } => {
            println!("Using {}", interactive::simulate::describe_store(&config));
            interactive::simulate::run(config, *amount_sat).await
        }
        Commands::Decode { message } => interactive::decode::run(message),
        Commands::PaymentHash { preimage } => {
            match hex::decode(preimage) {
                Ok(data) => println!("Payment hash: {:x}", Sha256::digest(&data)),
                Err(err) => println!("Invalid hex: {}", err),
            }
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
