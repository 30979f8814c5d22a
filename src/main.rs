use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use log::{info, warn};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    signature::{Keypair, Signer},
};

use precog_coordinator::codec::FixedWidthCodec;
use precog_coordinator::config::Config;
use precog_coordinator::coordinator::ResolutionCoordinator;
use precog_coordinator::gateway::SolanaLedgerGateway;
use precog_coordinator::mpc::WsJobClient;
use precog_coordinator::server::{ApiServer, ApiServerConfig};
use precog_coordinator::store::JobStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let cfg = Config::from_env()?;
    let payer = Arc::new(read_keypair(&cfg.wallet_keypair_path)?);

    let rpc = Arc::new(RpcClient::new_with_commitment(
        cfg.rpc_url.clone(),
        CommitmentConfig::confirmed(),
    ));

    info!("wallet:  {}", payer.pubkey());
    info!("program: {}", cfg.program_id);
    info!("rpc:     {}", cfg.rpc_url);
    info!("mxe:     {}", cfg.mxe_endpoint);

    let gateway = Arc::new(SolanaLedgerGateway::new(
        rpc,
        payer,
        cfg.program_id,
        cfg.mxe_program_id,
        cfg.token_mint,
    ));
    let mpc = Arc::new(WsJobClient::new(
        cfg.mxe_endpoint.clone(),
        cfg.mxe_api_key.clone(),
    ));
    let store = Arc::new(JobStore::open(cfg.job_store_path.clone())?);
    let coordinator = Arc::new(ResolutionCoordinator::new(
        gateway.clone(),
        mpc,
        store,
        cfg.fee_bps,
        cfg.poll,
    ));

    let server = Arc::new(ApiServer::new(
        ApiServerConfig {
            listen_addr: cfg.listen_addr,
        },
        gateway,
        coordinator.clone(),
        Arc::new(FixedWidthCodec),
    ));

    // Re-drive markets a previous process left mid-resolution.
    let unsettled = coordinator.unsettled_markets();
    if !unsettled.is_empty() {
        warn!(
            "re-driving {} unsettled market(s) from the job store",
            unsettled.len()
        );
        for market in unsettled {
            server.spawn_settlement(market);
        }
    }

    server.run().await
}

/// Read a solana-keygen JSON keypair file.
fn read_keypair(path: &Path) -> Result<Keypair> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading keypair {}", path.display()))?;
    let bytes: Vec<u8> = serde_json::from_str(&data)?;
    let kp = Keypair::from_bytes(&bytes)?;
    Ok(kp)
}
