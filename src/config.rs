//! Environment-driven configuration. Values come from the process environment
//! (with `.env` loaded by the binary); startup fails fast when a required
//! variable is missing.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use solana_sdk::pubkey::Pubkey;

use crate::coordinator::PollPolicy;
use crate::store::default_store_path;

const REQUIRED: &[&str] = &[
    "RPC_URL",
    "PROGRAM_ID",
    "WALLET_KEYPAIR_PATH",
    "MXE_ENDPOINT",
    "MXE_PROGRAM_ID",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub rpc_url: String,
    pub program_id: Pubkey,
    pub wallet_keypair_path: PathBuf,
    pub mxe_endpoint: String,
    pub mxe_api_key: String,
    pub mxe_program_id: Pubkey,
    pub token_mint: Pubkey,
    pub fee_bps: u16,
    pub job_store_path: PathBuf,
    pub poll: PollPolicy,
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let missing: Vec<&str> = REQUIRED.iter().copied().filter(|k| var(k).is_none()).collect();
        if !missing.is_empty() {
            return Err(anyhow!(
                "missing required environment variables: {}",
                missing.join(", ")
            ));
        }

        let listen_addr = var_or("LISTEN_ADDR", "0.0.0.0:5000")
            .parse()
            .context("invalid LISTEN_ADDR")?;
        let program_id = var("PROGRAM_ID")
            .unwrap()
            .parse()
            .context("invalid PROGRAM_ID")?;
        let mxe_program_id = var("MXE_PROGRAM_ID")
            .unwrap()
            .parse()
            .context("invalid MXE_PROGRAM_ID")?;
        // wrapped SOL unless the deployment pins a stablecoin mint
        let token_mint = var_or("TOKEN_MINT", "So11111111111111111111111111111111111111112")
            .parse()
            .context("invalid TOKEN_MINT")?;

        let wallet_keypair_path = expand_home(&var("WALLET_KEYPAIR_PATH").unwrap());
        let job_store_path = var("JOB_STORE_PATH")
            .map(|p| expand_home(&p))
            .unwrap_or_else(default_store_path);

        let fee_bps: u16 = var_or("FEE_BPS", "50").parse().context("invalid FEE_BPS")?;
        let poll = PollPolicy {
            max_attempts: var_or("POLL_MAX_ATTEMPTS", "60")
                .parse()
                .context("invalid POLL_MAX_ATTEMPTS")?,
            interval: Duration::from_secs(
                var_or("POLL_INTERVAL_SECS", "5")
                    .parse()
                    .context("invalid POLL_INTERVAL_SECS")?,
            ),
        };

        Ok(Self {
            listen_addr,
            rpc_url: var_or("RPC_URL", "https://api.devnet.solana.com"),
            program_id,
            wallet_keypair_path,
            mxe_endpoint: var("MXE_ENDPOINT").unwrap(),
            mxe_api_key: var_or("MXE_API_KEY", ""),
            mxe_program_id,
            token_mint,
            fee_bps,
            job_store_path,
            poll,
        })
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}
