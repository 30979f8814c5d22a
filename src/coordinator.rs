//! Resolution Coordinator: drives a market from Open (post-deadline) through
//! job dispatch and proof validation to on-chain settlement.
//!
//! Contract: `trigger_resolution` is non-blocking — it returns the MPC job id
//! as soon as the job is accepted and persisted, and settlement is driven by a
//! separate `drive_settlement` call (spawned as a background task by the
//! server). Callers observe progress through `job_status`; there is no
//! blocking variant.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;

use crate::error::{CoordinatorError, Result};
use crate::gateway::LedgerGateway;
use crate::mpc::{await_completion, EncryptedBet, JobRequest, MpcJobClient};
use crate::state::{Market, MarketState, MxeResult, ResolutionJob};
use crate::store::JobStore;

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionTicket {
    pub job_id: String,
    pub enqueue_tx: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementOutcome {
    pub settle_tx: String,
    pub result_hash: String,
    pub result: MxeResult,
}

pub struct ResolutionCoordinator {
    gateway: Arc<dyn LedgerGateway>,
    mpc: Arc<dyn MpcJobClient>,
    store: Arc<JobStore>,
    fee_bps: u16,
    poll: PollPolicy,
}

impl ResolutionCoordinator {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        mpc: Arc<dyn MpcJobClient>,
        store: Arc<JobStore>,
        fee_bps: u16,
        poll: PollPolicy,
    ) -> Self {
        Self {
            gateway,
            mpc,
            store,
            fee_bps,
            poll,
        }
    }

    /// Enqueue resolution on the ledger, ship the encrypted bets to the MPC
    /// network and return the job id. The job id is persisted before this
    /// returns, so a crash afterwards cannot orphan the job.
    ///
    /// Holds no locks: the ledger's atomic Open -> Enqueued guard is the only
    /// concurrency control, so of two racing callers exactly one enqueues and
    /// the other fails with `AlreadyEnqueued`. The one exception is re-drive:
    /// when the ledger is already Enqueued but our durable record shows no
    /// live job (a previous job failed, or we crashed before dispatch), the
    /// call proceeds straight to dispatch instead of failing.
    pub async fn trigger_resolution(&self, market: &Pubkey) -> Result<ResolutionTicket> {
        let enqueue_tx = match self.gateway.enqueue_resolution(market).await {
            Ok(sig) => {
                self.store.record_state(market, MarketState::Enqueued)?;
                Some(sig)
            }
            Err(CoordinatorError::AlreadyEnqueued(onchain)) => {
                // Re-drivable when no live job exists: record Enqueued (a prior
                // job failed), or no record at all (a crash after the enqueue
                // confirmed but before we wrote the record; the ledger being
                // Enqueued is proof the enqueue happened).
                let redrivable = match self.store.get(market) {
                    None => {
                        self.store.record_state(market, MarketState::Enqueued)?;
                        true
                    }
                    Some(record) => record.state == MarketState::Enqueued,
                };
                if !redrivable {
                    return Err(CoordinatorError::AlreadyEnqueued(onchain));
                }
                info!("market {market} already enqueued with no live job, re-dispatching");
                None
            }
            Err(other) => return Err(other),
        };

        let view = self.gateway.fetch_market(market).await?;
        let bets = self.gateway.fetch_bets(market).await?;
        // deposit order is preserved end to end; payouts downstream index on it
        let encrypted_bets: Vec<EncryptedBet> = bets
            .iter()
            .map(|bet| EncryptedBet {
                depositor: bet.depositor,
                blob: bet.encrypted_blob.clone(),
                amount: bet.amount,
            })
            .collect();

        let request = JobRequest {
            market_id: *market,
            mxe_program_id: view.mxe_program_id,
            encrypted_bets,
            fee_bps: self.fee_bps,
        };

        let job_id = self.mpc.submit_job(&request).await?;
        self.store.record_job(market, &job_id)?;
        info!(
            "resolution dispatched for {market}: job {job_id}, {} bets",
            bets.len()
        );

        Ok(ResolutionTicket { job_id, enqueue_tx })
    }

    /// Await the job, validate its attestation and settle on the ledger.
    ///
    /// Failure handling is explicit, never silent: a failed job moves the
    /// durable record back to Enqueued so `trigger_resolution` can re-dispatch;
    /// a timeout leaves it in Settling for a later re-drive; an invalid proof
    /// fails closed without touching any state.
    pub async fn drive_settlement(&self, market: &Pubkey) -> Result<SettlementOutcome> {
        let job_id = self
            .store
            .job_id(market)
            .ok_or(CoordinatorError::NoJobForMarket(*market))?;

        let completed = match await_completion(
            self.mpc.as_ref(),
            &job_id,
            self.poll.max_attempts,
            self.poll.interval,
        )
        .await
        {
            Ok(completed) => completed,
            Err(err @ CoordinatorError::JobFailed { .. }) => {
                warn!("job {job_id} for {market} failed, marking for re-dispatch: {err}");
                self.store.record_state(market, MarketState::Enqueued)?;
                return Err(err);
            }
            Err(other) => return Err(other),
        };

        let view = self.gateway.fetch_market(market).await?;
        let result_bytes = completed.result.to_bytes()?;
        if completed.proof != expected_proof(&view.mxe_program_id, &result_bytes) {
            return Err(CoordinatorError::InvalidProof(*market));
        }

        // Re-check our durable state right before the mutating call; another
        // driver may have settled in the meantime.
        match self.store.get(market) {
            Some(record) if record.state == MarketState::Settling => {}
            Some(record) => return Err(CoordinatorError::NotSettling(record.state)),
            None => return Err(CoordinatorError::NoJobForMarket(*market)),
        }

        let settle_tx = self
            .gateway
            .submit_settlement(market, &result_bytes, &completed.proof)
            .await?;
        self.store.record_state(market, MarketState::Settled)?;

        let result_hash = hex::encode(result_hash(&result_bytes));
        info!("market {market} settled, result hash {result_hash}");
        Ok(SettlementOutcome {
            settle_tx,
            result_hash,
            result: completed.result,
        })
    }

    /// One status round trip for the market's recorded job.
    pub async fn job_status(&self, market: &Pubkey) -> Result<ResolutionJob> {
        let job_id = self
            .store
            .job_id(market)
            .ok_or(CoordinatorError::NoJobForMarket(*market))?;
        self.mpc.poll_status(&job_id).await
    }

    /// Ledger view refined with the coordinator's durable Settling state. The
    /// ledger records Enqueued until settlement; Settling is our knowledge
    /// that the MPC network holds a live job.
    pub async fn market_view(&self, market: &Pubkey) -> Result<Market> {
        let mut view = self.gateway.fetch_market(market).await?;
        if view.state == MarketState::Enqueued {
            if let Some(record) = self.store.get(market) {
                if record.state == MarketState::Settling {
                    view.state = MarketState::Settling;
                }
            }
        }
        Ok(view)
    }

    pub async fn list_bets(&self, market: &Pubkey) -> Result<Vec<crate::state::BetLog>> {
        self.gateway.fetch_bets(market).await
    }

    /// Markets left mid-resolution by a previous process; the binary re-drives
    /// these at startup.
    pub fn unsettled_markets(&self) -> Vec<Pubkey> {
        self.store.settling_markets()
    }
}

/// Attestation check: the MXE signs sha256(verifier key || result bytes). A
/// stand-in for the network's real signature scheme, kept at this seam so the
/// real verifier slots in without touching the settlement path.
pub fn expected_proof(verifier: &Pubkey, result_bytes: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_ref());
    hasher.update(result_bytes);
    hasher.finalize().to_vec()
}

/// Commitment written on-chain at settlement.
pub fn result_hash(result_bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(result_bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BetCodec, BetPayload, FixedWidthCodec};
    use crate::gateway::{CreateMarketReceipt, PlaceBetReceipt, TxOutcome};
    use crate::state::{now_unix, BetLog, JobStatus, Payout};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    // ---------- in-memory ledger fake ----------

    struct FakeLedger {
        markets: Mutex<HashMap<Pubkey, Market>>,
        bets: Mutex<HashMap<Pubkey, Vec<BetLog>>>,
    }

    impl FakeLedger {
        fn new() -> Self {
            Self {
                markets: Mutex::new(HashMap::new()),
                bets: Mutex::new(HashMap::new()),
            }
        }

        fn seed_market(&self, deadline: i64) -> Pubkey {
            let address = Pubkey::new_unique();
            let market = Market {
                address,
                creator: Pubkey::new_unique(),
                question: "will the launch happen".to_string(),
                deadline,
                mxe_program_id: Pubkey::new_unique(),
                escrow_vault: Pubkey::new_unique(),
                total_pool: 0,
                state: MarketState::Open,
                bet_count: 0,
                result_hash: [0u8; 32],
            };
            self.markets.lock().unwrap().insert(address, market);
            address
        }

        fn state_of(&self, market: &Pubkey) -> MarketState {
            self.markets.lock().unwrap()[market].state
        }

        fn result_hash_of(&self, market: &Pubkey) -> [u8; 32] {
            self.markets.lock().unwrap()[market].result_hash
        }
    }

    #[async_trait]
    impl LedgerGateway for FakeLedger {
        async fn create_market(
            &self,
            question: &str,
            deadline: i64,
            creator: &Pubkey,
        ) -> crate::error::Result<CreateMarketReceipt> {
            let address = Pubkey::new_unique();
            let market = Market {
                address,
                creator: *creator,
                question: question.to_string(),
                deadline,
                mxe_program_id: Pubkey::new_unique(),
                escrow_vault: Pubkey::new_unique(),
                total_pool: 0,
                state: MarketState::Open,
                bet_count: 0,
                result_hash: [0u8; 32],
            };
            self.markets.lock().unwrap().insert(address, market);
            Ok(CreateMarketReceipt {
                market: address,
                tx: TxOutcome::Confirmed {
                    signature: "sig-create".to_string(),
                },
            })
        }

        async fn place_bet(
            &self,
            market: &Pubkey,
            encrypted_blob: Vec<u8>,
            _choice: u8,
            stake: u64,
            depositor: &Pubkey,
        ) -> crate::error::Result<PlaceBetReceipt> {
            let mut markets = self.markets.lock().unwrap();
            let m = markets.get_mut(market).unwrap();
            if m.state != MarketState::Open {
                return Err(CoordinatorError::MarketNotOpen(m.state));
            }
            if stake == 0 {
                return Err(CoordinatorError::InvalidStake);
            }
            let seq = m.bet_count;
            m.bet_count += 1;
            m.total_pool += stake;
            self.bets.lock().unwrap().entry(*market).or_default().push(BetLog {
                market: *market,
                depositor: *depositor,
                amount: stake,
                encrypted_blob,
                timestamp: now_unix(),
                seq,
            });
            Ok(PlaceBetReceipt {
                bet_log: Pubkey::new_unique(),
                seq,
                tx: TxOutcome::Confirmed {
                    signature: format!("sig-bet-{seq}"),
                },
            })
        }

        async fn enqueue_resolution(&self, market: &Pubkey) -> crate::error::Result<String> {
            // the atomic state-guarded transition the real ledger provides
            let mut markets = self.markets.lock().unwrap();
            let m = markets.get_mut(market).unwrap();
            if m.state != MarketState::Open {
                return Err(CoordinatorError::AlreadyEnqueued(m.state));
            }
            if now_unix() < m.deadline {
                return Err(CoordinatorError::DeadlineNotReached);
            }
            m.state = m.state.transition_to(MarketState::Enqueued)?;
            Ok("sig-enqueue".to_string())
        }

        async fn submit_settlement(
            &self,
            market: &Pubkey,
            result_bytes: &[u8],
            _proof: &[u8],
        ) -> crate::error::Result<String> {
            let mut markets = self.markets.lock().unwrap();
            let m = markets.get_mut(market).unwrap();
            if m.state != MarketState::Enqueued {
                return Err(CoordinatorError::NotSettling(m.state));
            }
            m.state = MarketState::Settled;
            m.result_hash = result_hash(result_bytes);
            Ok("sig-settle".to_string())
        }

        async fn fetch_market(&self, market: &Pubkey) -> crate::error::Result<Market> {
            Ok(self.markets.lock().unwrap()[market].clone())
        }

        async fn fetch_bets(&self, market: &Pubkey) -> crate::error::Result<Vec<BetLog>> {
            let mut bets = self
                .bets
                .lock()
                .unwrap()
                .get(market)
                .cloned()
                .unwrap_or_default();
            bets.sort_by_key(|b| b.seq);
            Ok(bets)
        }
    }

    // ---------- scripted mpc fake ----------

    #[derive(Default)]
    struct FakeMpc {
        submitted: Mutex<Vec<JobRequest>>,
        // job outcome keyed by job id
        outcomes: Mutex<HashMap<String, ResolutionJob>>,
    }

    impl FakeMpc {
        fn complete_with(&self, job_id: &str, result: MxeResult, proof: Vec<u8>) {
            self.outcomes.lock().unwrap().insert(
                job_id.to_string(),
                ResolutionJob {
                    market_id: result.market_id.clone(),
                    job_id: job_id.to_string(),
                    status: JobStatus::Completed,
                    result: Some(result),
                    proof: Some(hex::encode(proof)),
                    error: None,
                    created_at: now_unix(),
                    completed_at: Some(now_unix()),
                },
            );
        }

        fn fail(&self, job_id: &str, reason: &str) {
            self.outcomes.lock().unwrap().insert(
                job_id.to_string(),
                ResolutionJob {
                    market_id: String::new(),
                    job_id: job_id.to_string(),
                    status: JobStatus::Failed,
                    result: None,
                    proof: None,
                    error: Some(reason.to_string()),
                    created_at: now_unix(),
                    completed_at: Some(now_unix()),
                },
            );
        }
    }

    #[async_trait]
    impl MpcJobClient for FakeMpc {
        async fn submit_job(&self, request: &JobRequest) -> crate::error::Result<String> {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(request.clone());
            Ok(format!("job-{}", submitted.len()))
        }

        async fn poll_status(&self, job_id: &str) -> crate::error::Result<ResolutionJob> {
            Ok(self
                .outcomes
                .lock()
                .unwrap()
                .get(job_id)
                .cloned()
                .unwrap_or(ResolutionJob {
                    market_id: String::new(),
                    job_id: job_id.to_string(),
                    status: JobStatus::Running,
                    result: None,
                    proof: None,
                    error: None,
                    created_at: now_unix(),
                    completed_at: None,
                }))
        }
    }

    // ---------- harness ----------

    struct Harness {
        ledger: Arc<FakeLedger>,
        mpc: Arc<FakeMpc>,
        coordinator: ResolutionCoordinator,
        store_path: std::path::PathBuf,
    }

    impl Harness {
        fn new() -> Self {
            let ledger = Arc::new(FakeLedger::new());
            let mpc = Arc::new(FakeMpc::default());
            let store_path = std::env::temp_dir().join(format!(
                "precog-coord-{}-{}.json",
                std::process::id(),
                Pubkey::new_unique()
            ));
            let store = Arc::new(JobStore::open(store_path.clone()).unwrap());
            let coordinator = ResolutionCoordinator::new(
                ledger.clone(),
                mpc.clone(),
                store,
                50,
                PollPolicy {
                    max_attempts: 3,
                    interval: Duration::from_millis(1),
                },
            );
            Self {
                ledger,
                mpc,
                coordinator,
                store_path,
            }
        }

        fn expired_market(&self) -> Pubkey {
            self.ledger.seed_market(now_unix() - 10)
        }

        async fn result_for(&self, market: &Pubkey, winning_choice: u8) -> (MxeResult, Vec<u8>) {
            let view = self.ledger.fetch_market(market).await.unwrap();
            let bets = self.ledger.fetch_bets(market).await.unwrap();
            let total_pool: u64 = bets.iter().map(|b| b.amount).sum();
            let fee_amount = total_pool * 50 / 10_000;
            let result = MxeResult {
                market_id: market.to_string(),
                winning_choice,
                total_pool,
                fee_amount,
                payouts: bets
                    .iter()
                    .map(|b| Payout {
                        recipient: b.depositor.to_string(),
                        amount: b.amount,
                    })
                    .collect(),
                timestamp: now_unix(),
            };
            let bytes = result.to_bytes().unwrap();
            let proof = expected_proof(&view.mxe_program_id, &bytes);
            (result, proof)
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.store_path);
        }
    }

    fn encode_bet(choice: u8, stake: u64) -> Vec<u8> {
        FixedWidthCodec.encode(&BetPayload { choice, stake })
    }

    // ---------- tests ----------

    #[tokio::test]
    async fn double_trigger_yields_one_enqueue_and_one_already_enqueued() {
        let h = Harness::new();
        let market = h.expired_market();

        let ticket = h.coordinator.trigger_resolution(&market).await.unwrap();
        assert_eq!(ticket.job_id, "job-1");
        assert!(ticket.enqueue_tx.is_some());
        assert_eq!(h.ledger.state_of(&market), MarketState::Enqueued);

        let err = h.coordinator.trigger_resolution(&market).await.unwrap_err();
        assert_eq!(err.kind(), "already_enqueued");
        // no second job was dispatched
        assert_eq!(h.mpc.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn trigger_rejected_before_deadline() {
        let h = Harness::new();
        let market = h.ledger.seed_market(now_unix() + 3600);
        let err = h.coordinator.trigger_resolution(&market).await.unwrap_err();
        assert_eq!(err.kind(), "deadline_not_reached");
        assert_eq!(h.ledger.state_of(&market), MarketState::Open);
    }

    #[tokio::test]
    async fn payload_preserves_deposit_order_and_ciphertexts() {
        let h = Harness::new();
        let market = h.expired_market();
        let alice = Pubkey::new_unique();
        let bob = Pubkey::new_unique();

        // deadline guard lives in enqueue, not in the fake's place_bet
        let blob_a = encode_bet(1, 100);
        let blob_b = encode_bet(0, 200);
        h.ledger
            .place_bet(&market, blob_a.clone(), 1, 100, &alice)
            .await
            .unwrap();
        h.ledger
            .place_bet(&market, blob_b.clone(), 0, 200, &bob)
            .await
            .unwrap();

        h.coordinator.trigger_resolution(&market).await.unwrap();

        let submitted = h.mpc.submitted.lock().unwrap();
        let request = &submitted[0];
        assert_eq!(request.fee_bps, 50);
        assert_eq!(request.encrypted_bets.len(), 2);
        assert_eq!(request.encrypted_bets[0].depositor, alice);
        assert_eq!(request.encrypted_bets[0].blob, blob_a);
        assert_eq!(request.encrypted_bets[0].amount, 100);
        assert_eq!(request.encrypted_bets[1].depositor, bob);
        assert_eq!(request.encrypted_bets[1].blob, blob_b);
        assert_eq!(request.encrypted_bets[1].amount, 200);
    }

    #[tokio::test]
    async fn bet_sequence_is_strictly_increasing_and_gap_free() {
        let h = Harness::new();
        let market = h.expired_market();
        for stake in [10u64, 20, 30] {
            h.ledger
                .place_bet(&market, encode_bet(1, stake), 1, stake, &Pubkey::new_unique())
                .await
                .unwrap();
        }
        let bets = h.ledger.fetch_bets(&market).await.unwrap();
        let seqs: Vec<u64> = bets.iter().map(|b| b.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn end_to_end_settles_market() {
        let h = Harness::new();
        let market = h.expired_market();
        let alice = Pubkey::new_unique();
        let bob = Pubkey::new_unique();
        h.ledger
            .place_bet(&market, encode_bet(1, 100), 1, 100, &alice)
            .await
            .unwrap();
        h.ledger
            .place_bet(&market, encode_bet(1, 200), 1, 200, &bob)
            .await
            .unwrap();

        let ticket = h.coordinator.trigger_resolution(&market).await.unwrap();
        let (result, proof) = h.result_for(&market, 1).await;
        h.mpc.complete_with(&ticket.job_id, result.clone(), proof);

        let outcome = h.coordinator.drive_settlement(&market).await.unwrap();
        assert_eq!(outcome.result.winning_choice, 1);
        assert_eq!(outcome.result.total_pool, 300);
        assert_eq!(outcome.result.fee_amount, 1); // 50 bps of 300, floored

        assert_eq!(h.ledger.state_of(&market), MarketState::Settled);
        let expected_hash = result_hash(&result.to_bytes().unwrap());
        assert_eq!(h.ledger.result_hash_of(&market), expected_hash);
        assert_eq!(outcome.result_hash, hex::encode(expected_hash));

        let view = h.coordinator.market_view(&market).await.unwrap();
        assert_eq!(view.state, MarketState::Settled);
    }

    #[tokio::test]
    async fn corrupted_proof_fails_closed() {
        let h = Harness::new();
        let market = h.expired_market();
        h.ledger
            .place_bet(&market, encode_bet(1, 100), 1, 100, &Pubkey::new_unique())
            .await
            .unwrap();

        let ticket = h.coordinator.trigger_resolution(&market).await.unwrap();
        let (result, mut proof) = h.result_for(&market, 1).await;
        proof[0] ^= 0xff;
        h.mpc.complete_with(&ticket.job_id, result, proof);

        let err = h.coordinator.drive_settlement(&market).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_proof");

        // fails closed: ledger untouched, externally the market is still Settling
        assert_eq!(h.ledger.state_of(&market), MarketState::Enqueued);
        let view = h.coordinator.market_view(&market).await.unwrap();
        assert_eq!(view.state, MarketState::Settling);
    }

    #[tokio::test]
    async fn failed_job_is_re_dispatchable() {
        let h = Harness::new();
        let market = h.expired_market();
        h.ledger
            .place_bet(&market, encode_bet(0, 50), 0, 50, &Pubkey::new_unique())
            .await
            .unwrap();

        let ticket = h.coordinator.trigger_resolution(&market).await.unwrap();
        h.mpc.fail(&ticket.job_id, "cluster unavailable");

        let err = h.coordinator.drive_settlement(&market).await.unwrap_err();
        assert_eq!(err.kind(), "job_failed");

        // second trigger re-dispatches instead of failing AlreadyEnqueued
        let ticket2 = h.coordinator.trigger_resolution(&market).await.unwrap();
        assert_ne!(ticket2.job_id, ticket.job_id);
        assert!(ticket2.enqueue_tx.is_none());

        let (result, proof) = h.result_for(&market, 0).await;
        h.mpc.complete_with(&ticket2.job_id, result, proof);
        h.coordinator.drive_settlement(&market).await.unwrap();
        assert_eq!(h.ledger.state_of(&market), MarketState::Settled);
    }

    #[tokio::test]
    async fn enqueued_market_with_no_record_is_re_driven() {
        let h = Harness::new();
        let market = h.expired_market();
        h.ledger
            .place_bet(&market, encode_bet(1, 100), 1, 100, &Pubkey::new_unique())
            .await
            .unwrap();

        // enqueue confirmed on the ledger, but nothing was recorded locally
        // (crash window between the two writes)
        h.ledger.enqueue_resolution(&market).await.unwrap();
        assert_eq!(h.ledger.state_of(&market), MarketState::Enqueued);
        assert!(h.coordinator.job_status(&market).await.is_err());

        let ticket = h.coordinator.trigger_resolution(&market).await.unwrap();
        assert!(ticket.enqueue_tx.is_none());
        assert_eq!(h.mpc.submitted.lock().unwrap().len(), 1);

        let (result, proof) = h.result_for(&market, 1).await;
        h.mpc.complete_with(&ticket.job_id, result, proof);
        h.coordinator.drive_settlement(&market).await.unwrap();
        assert_eq!(h.ledger.state_of(&market), MarketState::Settled);
    }

    #[tokio::test]
    async fn timeout_leaves_market_settling() {
        let h = Harness::new();
        let market = h.expired_market();
        let _ticket = h.coordinator.trigger_resolution(&market).await.unwrap();
        // job never leaves Running; bounded loop gives up
        let err = h.coordinator.drive_settlement(&market).await.unwrap_err();
        assert_eq!(err.kind(), "job_timeout");
        let view = h.coordinator.market_view(&market).await.unwrap();
        assert_eq!(view.state, MarketState::Settling);
    }

    #[tokio::test]
    async fn job_status_requires_recorded_job() {
        let h = Harness::new();
        let market = h.expired_market();
        let err = h.coordinator.job_status(&market).await.unwrap_err();
        assert_eq!(err.kind(), "no_job_for_market");
    }
}
