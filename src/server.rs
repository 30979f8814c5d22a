//! WebSocket API surface. One reader loop and one writer task per connection;
//! replies go back over the connection's own channel, lifecycle events
//! (`market_created`, `market_settled`) are broadcast to everyone connected.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use tokio::{net::TcpListener, sync::mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use crate::codec::{BetCodec, BetPayload};
use crate::coordinator::ResolutionCoordinator;
use crate::error::{CoordinatorError, Result};
use crate::gateway::LedgerGateway;

#[derive(Clone)]
pub struct ApiServerConfig {
    pub listen_addr: SocketAddr,
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum InboundMsg {
    CreateMarket {
        question: String,
        deadline: i64,
        creator: String,
    },
    PlaceBet {
        market: String,
        choice: u8,
        stake: u64,
        depositor: String,
    },
    ResolveMarket {
        market: String,
    },
    JobStatus {
        market: String,
    },
    GetMarket {
        market: String,
    },
    ListBets {
        market: String,
    },
    #[serde(other)]
    Other,
}

pub struct ApiServer {
    cfg: ApiServerConfig,
    gateway: Arc<dyn LedgerGateway>,
    coordinator: Arc<ResolutionCoordinator>,
    codec: Arc<dyn BetCodec>,
    conns: Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<serde_json::Value>>>>,
    next_conn: AtomicU64,
}

type ConnMap = Mutex<HashMap<u64, mpsc::UnboundedSender<serde_json::Value>>>;

impl ApiServer {
    pub fn new(
        cfg: ApiServerConfig,
        gateway: Arc<dyn LedgerGateway>,
        coordinator: Arc<ResolutionCoordinator>,
        codec: Arc<dyn BetCodec>,
    ) -> Self {
        Self {
            cfg,
            gateway,
            coordinator,
            codec,
            conns: Arc::new(Mutex::new(HashMap::new())),
            next_conn: AtomicU64::new(0),
        }
    }

    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.cfg.listen_addr).await?;
        info!("api listening on ws://{}", self.cfg.listen_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            let me = self.clone();
            tokio::spawn(async move {
                if let Err(e) = me.handle_conn(stream, addr).await {
                    warn!("connection error from {addr}: {e:?}");
                }
            });
        }
    }

    async fn handle_conn(
        self: Arc<Self>,
        stream: tokio::net::TcpStream,
        addr: SocketAddr,
    ) -> anyhow::Result<()> {
        let ws = accept_async(stream).await?;
        info!("new connection from {addr}");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<serde_json::Value>();
        let conn_id = self.next_conn.fetch_add(1, Ordering::SeqCst);
        self.conns.lock().unwrap().insert(conn_id, out_tx.clone());

        let (mut ws_tx, mut ws_rx) = ws.split();
        let write_task = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if ws_tx.send(Message::Text(msg.to_string())).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(msg)) = ws_rx.next().await {
            if !msg.is_text() {
                continue;
            }
            let text = msg.into_text()?;
            let inbound = match serde_json::from_str::<InboundMsg>(&text) {
                Ok(inbound) => inbound,
                Err(e) => {
                    let _ = out_tx.send(json!({
                        "type": "error",
                        "kind": "bad_payload",
                        "message": e.to_string(),
                    }));
                    continue;
                }
            };

            match self.dispatch(inbound).await {
                Ok(reply) => {
                    let _ = out_tx.send(reply);
                }
                Err(err) => {
                    let _ = out_tx.send(error_json(&err));
                }
            }
        }

        write_task.abort();
        self.conns.lock().unwrap().remove(&conn_id);
        info!("connection {addr} closed");
        Ok(())
    }

    async fn dispatch(&self, msg: InboundMsg) -> Result<serde_json::Value> {
        match msg {
            InboundMsg::CreateMarket {
                question,
                deadline,
                creator,
            } => {
                if question.trim().is_empty() {
                    return Err(CoordinatorError::MissingField("question"));
                }
                let creator = parse_pubkey(&creator)?;
                let receipt = self
                    .gateway
                    .create_market(&question, deadline, &creator)
                    .await?;
                self.broadcast(json!({
                    "type": "market_created",
                    "market": receipt.market.to_string(),
                    "question": question,
                    "deadline": deadline,
                }));
                Ok(json!({
                    "type": "market_created",
                    "market": receipt.market.to_string(),
                    "tx": receipt.tx,
                }))
            }

            InboundMsg::PlaceBet {
                market,
                choice,
                stake,
                depositor,
            } => {
                let market = parse_pubkey(&market)?;
                let depositor = parse_pubkey(&depositor)?;
                if stake == 0 {
                    return Err(CoordinatorError::InvalidStake);
                }
                if choice > 1 {
                    return Err(CoordinatorError::InvalidChoice(choice));
                }
                let blob = self.codec.encode(&BetPayload { choice, stake });
                let receipt = self
                    .gateway
                    .place_bet(&market, blob, choice, stake, &depositor)
                    .await?;
                Ok(json!({
                    "type": "bet_placed",
                    "market": market.to_string(),
                    "bet_log": receipt.bet_log.to_string(),
                    "seq": receipt.seq,
                    "tx": receipt.tx,
                }))
            }

            InboundMsg::ResolveMarket { market } => {
                let market = parse_pubkey(&market)?;
                let ticket = self.coordinator.trigger_resolution(&market).await?;
                self.spawn_settlement(market);
                Ok(json!({
                    "type": "resolution_triggered",
                    "market": market.to_string(),
                    "job_id": ticket.job_id,
                    "enqueue_tx": ticket.enqueue_tx,
                }))
            }

            InboundMsg::JobStatus { market } => {
                let market = parse_pubkey(&market)?;
                let job = self.coordinator.job_status(&market).await?;
                Ok(json!({
                    "type": "job_status",
                    "market": market.to_string(),
                    "job": job,
                }))
            }

            InboundMsg::GetMarket { market } => {
                let market = parse_pubkey(&market)?;
                let view = self.coordinator.market_view(&market).await?;
                Ok(json!({
                    "type": "market",
                    "market": view,
                }))
            }

            InboundMsg::ListBets { market } => {
                let market = parse_pubkey(&market)?;
                let bets = self.coordinator.list_bets(&market).await?;
                Ok(json!({
                    "type": "bets",
                    "market": market.to_string(),
                    "bets": bets,
                }))
            }

            InboundMsg::Other => Err(CoordinatorError::MissingField("action")),
        }
    }

    /// Background settlement for a dispatched job; the triggering request has
    /// already returned its job id.
    pub fn spawn_settlement(&self, market: Pubkey) {
        let coordinator = self.coordinator.clone();
        let conns = self.conns.clone();
        tokio::spawn(async move {
            match coordinator.drive_settlement(&market).await {
                Ok(outcome) => {
                    broadcast_to(&conns, json!({
                        "type": "market_settled",
                        "market": market.to_string(),
                        "winning_choice": outcome.result.winning_choice,
                        "total_pool": outcome.result.total_pool,
                        "result_hash": outcome.result_hash,
                        "settle_tx": outcome.settle_tx,
                    }));
                }
                Err(err) => {
                    error!(
                        "settlement for {market} not completed: {err} (kind {})",
                        err.kind()
                    );
                }
            }
        });
    }

    fn broadcast(&self, payload: serde_json::Value) {
        broadcast_to(&self.conns, payload);
    }
}

fn broadcast_to(conns: &ConnMap, payload: serde_json::Value) {
    let conns = conns.lock().unwrap();
    for tx in conns.values() {
        let _ = tx.send(payload.clone());
    }
}

fn parse_pubkey(raw: &str) -> Result<Pubkey> {
    Pubkey::from_str(raw).map_err(|_| CoordinatorError::BadPubkey(raw.to_string()))
}

fn error_json(err: &CoordinatorError) -> serde_json::Value {
    json!({
        "type": "error",
        "kind": err.kind(),
        "message": err.to_string(),
        "retryable": err.is_retryable(),
    })
}
