mod keys;

use std::path::PathBuf;

use anyhow::{Context, bail};
use chainlite_core::now_millis;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::keys::Wallet;

#[derive(Debug, Parser)]
#[command(name = "chainlite-wallet", version, about = "Keys and transfers for a ChainLite node")]
struct Cli {
    /// Wallet key file.
    #[arg(long, global = true, default_value = "wallet.json", env = "CHAINLITE_WALLET")]
    wallet: PathBuf,

    /// Node to talk to.
    #[arg(long, global = true, default_value = "http://127.0.0.1:5000", env = "CHAINLITE_NODE")]
    node: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a key pair and save it.
    New {
        /// Overwrite an existing wallet file.
        #[arg(long)]
        force: bool,
    },
    /// Print this wallet's address and public key.
    Address,
    /// Sign a transfer and submit it to the node.
    Send {
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
    },
    /// Confirmed balance of this wallet, or of `--address`.
    Balance {
        #[arg(long)]
        address: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/').to_string();
    match cli.command {
        Command::New { force } => {
            if cli.wallet.exists() && !force {
                bail!("{} already exists; pass --force to replace it", cli.wallet.display());
            }
            let wallet = Wallet::generate();
            wallet.save(&cli.wallet)?;
            println!("Wallet saved to {}", cli.wallet.display());
            println!("Address: {}", wallet.address());
        }
        Command::Address => {
            let wallet = Wallet::load(&cli.wallet)?;
            println!("Address: {}", wallet.address());
            println!("Public key: {}", wallet.public_key_hex());
        }
        Command::Send { to, amount } => {
            if amount == 0 {
                bail!("amount must be positive");
            }
            let wallet = Wallet::load(&cli.wallet)?;
            let req = wallet.sign_transfer(&to, amount, now_millis());
            debug!(?req, "submitting transfer");
            let resp = reqwest::Client::new()
                .post(format!("{node}/transactions"))
                .json(&req)
                .send()
                .await
                .with_context(|| format!("contacting {node}"))?;
            let status = resp.status();
            let body: Value = resp.json().await.context("reading node response")?;
            if !status.is_success() {
                bail!("node refused transfer ({status}): {}", body["message"]);
            }
            println!("Submitted {amount} to {to}");
            println!("Transaction: {}", body["hash"].as_str().unwrap_or("?"));
        }
        Command::Balance { address } => {
            let address = match address {
                Some(a) => a,
                None => Wallet::load(&cli.wallet)?.address(),
            };
            let body: Value = reqwest::get(format!("{node}/balance/{address}"))
                .await
                .with_context(|| format!("contacting {node}"))?
                .error_for_status()?
                .json()
                .await?;
            println!("{address}: {}", body["balance"]);
        }
    }
    Ok(())
}
