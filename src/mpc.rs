//! MPC Job Client: opaque boundary to the off-chain computation network. The
//! payload crossing this boundary carries ciphertexts and public metadata only;
//! plaintext choices exist nowhere on this side of it.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tungstenite::Message;

use crate::error::{CoordinatorError, Result};
use crate::state::{hex_blob, pubkey_string, CompletedJob, JobStatus, ResolutionJob};

/// One encrypted bet as shipped to the MPC network, in deposit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedBet {
    #[serde(with = "pubkey_string")]
    pub depositor: Pubkey,
    #[serde(with = "hex_blob")]
    pub blob: Vec<u8>,
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(with = "pubkey_string")]
    pub market_id: Pubkey,
    #[serde(with = "pubkey_string")]
    pub mxe_program_id: Pubkey,
    pub encrypted_bets: Vec<EncryptedBet>,
    pub fee_bps: u16,
}

#[async_trait]
pub trait MpcJobClient: Send + Sync {
    /// Dispatch a resolution job; returns the network's opaque job handle.
    async fn submit_job(&self, request: &JobRequest) -> Result<String>;

    /// One status round trip, no blocking.
    async fn poll_status(&self, job_id: &str) -> Result<ResolutionJob>;
}

/// Bounded retry loop over `poll_status`. Polls up to `max_attempts` times at
/// fixed `interval`, sleeping only between attempts. Returns the result on
/// `Completed`, `JobFailed` on `Failed`, `JobTimeout` once attempts run out.
///
/// Only the read-only status call is retried here; nothing mutating is. The
/// returned future is cancel-safe, so request-serving callers can bound it
/// further with `tokio::time::timeout` or drop it outright.
pub async fn await_completion(
    client: &dyn MpcJobClient,
    job_id: &str,
    max_attempts: u32,
    interval: Duration,
) -> Result<CompletedJob> {
    for attempt in 1..=max_attempts {
        let job = client.poll_status(job_id).await?;
        match job.status {
            JobStatus::Completed => {
                let result = job.result.ok_or_else(|| CoordinatorError::JobFailed {
                    job_id: job_id.to_string(),
                    reason: "completed without a result payload".to_string(),
                })?;
                let proof_hex = job.proof.ok_or_else(|| CoordinatorError::JobFailed {
                    job_id: job_id.to_string(),
                    reason: "completed without an attestation".to_string(),
                })?;
                let proof = hex::decode(&proof_hex).map_err(|_| CoordinatorError::JobFailed {
                    job_id: job_id.to_string(),
                    reason: "attestation is not valid hex".to_string(),
                })?;
                info!("mpc job {job_id} completed after {attempt} polls");
                return Ok(CompletedJob { result, proof });
            }
            JobStatus::Failed => {
                return Err(CoordinatorError::JobFailed {
                    job_id: job_id.to_string(),
                    reason: job.error.unwrap_or_else(|| "unknown".to_string()),
                });
            }
            JobStatus::Pending | JobStatus::Running => {
                debug!("mpc job {job_id} {:?} (poll {attempt}/{max_attempts})", job.status);
                if attempt < max_attempts {
                    sleep(interval).await;
                }
            }
        }
    }
    warn!("mpc job {job_id} timed out after {max_attempts} polls");
    Err(CoordinatorError::JobTimeout {
        job_id: job_id.to_string(),
        attempts: max_attempts,
    })
}

/// Production client speaking JSON over WebSocket to the MPC network's job
/// endpoint. Each call is one connect/request/response exchange.
pub struct WsJobClient {
    endpoint: String,
    api_key: String,
}

impl WsJobClient {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self { endpoint, api_key }
    }

    async fn exchange(&self, request: serde_json::Value) -> Result<serde_json::Value> {
        let (ws, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| CoordinatorError::MpcTransport(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        write
            .send(Message::Text(request.to_string()))
            .await
            .map_err(|e| CoordinatorError::MpcTransport(e.to_string()))?;

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| CoordinatorError::MpcTransport(e.to_string()))?;
            if !msg.is_text() {
                continue;
            }
            let text = msg
                .into_text()
                .map_err(|e| CoordinatorError::MpcTransport(e.to_string()))?;
            let value: serde_json::Value = serde_json::from_str(&text)?;
            if let Some(err) = value.get("error").and_then(|e| e.as_str()) {
                return Err(CoordinatorError::MpcTransport(err.to_string()));
            }
            return Ok(value);
        }
        Err(CoordinatorError::MpcTransport(
            "connection closed before reply".to_string(),
        ))
    }
}

#[async_trait]
impl MpcJobClient for WsJobClient {
    async fn submit_job(&self, request: &JobRequest) -> Result<String> {
        let reply = self
            .exchange(json!({
                "action": "submit_job",
                "api_key": self.api_key,
                "mxe_program_id": request.mxe_program_id.to_string(),
                "input": request,
            }))
            .await?;

        let job_id = reply
            .get("job_id")
            .and_then(|j| j.as_str())
            .ok_or_else(|| CoordinatorError::MpcTransport("reply missing job_id".to_string()))?
            .to_string();
        info!(
            "mpc job {job_id} submitted for market {} ({} bets)",
            request.market_id,
            request.encrypted_bets.len()
        );
        Ok(job_id)
    }

    async fn poll_status(&self, job_id: &str) -> Result<ResolutionJob> {
        let reply = self
            .exchange(json!({
                "action": "job_status",
                "api_key": self.api_key,
                "job_id": job_id,
            }))
            .await?;
        Ok(serde_json::from_value(reply)?)
    }
}
