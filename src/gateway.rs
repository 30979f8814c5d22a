//! Ledger Gateway: the coordinator's only window onto the on-chain market
//! program. Validation errors are rejected here locally and never hit the RPC;
//! state-guard races are settled by the ledger's atomic checks and mapped back
//! onto the same typed errors.

use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use solana_account_decoder::UiAccountEncoding;
use solana_client::{
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig},
    rpc_filter::{Memcmp, RpcFilterType},
};
use solana_sdk::{
    instruction::AccountMeta,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_program, sysvar,
    transaction::Transaction,
};
use spl_associated_token_account::get_associated_token_address;
use spl_token::id as spl_token_program_id;

use crate::error::{CoordinatorError, Result};
use crate::protocol;
use crate::state::{now_unix, BetLog, Market, MarketState};

/// Either a confirmed transaction signature, or the serialized message of an
/// unsigned transaction the end user's wallet must sign (the service only
/// custodies its own operator key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxOutcome {
    Confirmed { signature: String },
    Unsigned { message_hex: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMarketReceipt {
    pub market: Pubkey,
    pub tx: TxOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBetReceipt {
    pub bet_log: Pubkey,
    pub seq: u64,
    pub tx: TxOutcome,
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn create_market(
        &self,
        question: &str,
        deadline: i64,
        creator: &Pubkey,
    ) -> Result<CreateMarketReceipt>;

    async fn place_bet(
        &self,
        market: &Pubkey,
        encrypted_blob: Vec<u8>,
        choice: u8,
        stake: u64,
        depositor: &Pubkey,
    ) -> Result<PlaceBetReceipt>;

    /// Transitions Open -> Enqueued. The ledger's atomic state guard is the
    /// single source of truth under concurrency; of two racing callers exactly
    /// one succeeds and the other gets `AlreadyEnqueued`.
    async fn enqueue_resolution(&self, market: &Pubkey) -> Result<String>;

    async fn submit_settlement(
        &self,
        market: &Pubkey,
        result_bytes: &[u8],
        proof: &[u8],
    ) -> Result<String>;

    async fn fetch_market(&self, market: &Pubkey) -> Result<Market>;

    /// Bets in deposit (seq) order.
    async fn fetch_bets(&self, market: &Pubkey) -> Result<Vec<BetLog>>;
}

pub struct SolanaLedgerGateway {
    rpc: Arc<RpcClient>,
    payer: Arc<Keypair>,
    program_id: Pubkey,
    mxe_program_id: Pubkey,
    token_mint: Pubkey,
}

impl SolanaLedgerGateway {
    pub fn new(
        rpc: Arc<RpcClient>,
        payer: Arc<Keypair>,
        program_id: Pubkey,
        mxe_program_id: Pubkey,
        token_mint: Pubkey,
    ) -> Self {
        Self {
            rpc,
            payer,
            program_id,
            mxe_program_id,
            token_mint,
        }
    }

    async fn send_signed(&self, ix: solana_sdk::instruction::Instruction) -> Result<String> {
        let recent = self.rpc.get_latest_blockhash().await?;
        let tx = Transaction::new_signed_with_payer(
            &[ix],
            Some(&self.payer.pubkey()),
            &[self.payer.as_ref()],
            recent,
        );
        let sig = self.rpc.send_and_confirm_transaction(&tx).await?;
        Ok(sig.to_string())
    }

    /// Build a transaction the given fee payer must sign themselves.
    async fn unsigned_message(
        &self,
        ix: solana_sdk::instruction::Instruction,
        fee_payer: &Pubkey,
    ) -> Result<String> {
        let recent = self.rpc.get_latest_blockhash().await?;
        let mut tx = Transaction::new_with_payer(&[ix], Some(fee_payer));
        tx.message.recent_blockhash = recent;
        Ok(hex::encode(tx.message_data()))
    }
}

#[async_trait]
impl LedgerGateway for SolanaLedgerGateway {
    async fn create_market(
        &self,
        question: &str,
        deadline: i64,
        creator: &Pubkey,
    ) -> Result<CreateMarketReceipt> {
        if question.len() > protocol::MAX_QUESTION_LEN {
            return Err(CoordinatorError::QuestionTooLong {
                max: protocol::MAX_QUESTION_LEN,
            });
        }
        let now = now_unix();
        if deadline <= now {
            return Err(CoordinatorError::InvalidDeadline { deadline, now });
        }

        let (market, _) = protocol::market_pda(&self.program_id, creator);
        // None means no account; a transport failure must surface as Rpc, not
        // read as "does not exist".
        let existing = self
            .rpc
            .get_account_with_commitment(&market, self.rpc.commitment())
            .await?
            .value;
        if existing.is_some() {
            return Err(CoordinatorError::DuplicateMarket(market));
        }
        let (escrow, _) = protocol::escrow_pda(&self.program_id, &market);

        let data = protocol::create_market_data(question, deadline, &self.mxe_program_id)?;
        let ix = protocol::instruction(
            &self.program_id,
            vec![
                AccountMeta::new(market, false),
                AccountMeta::new(escrow, false),
                AccountMeta::new_readonly(self.token_mint, false),
                AccountMeta::new(*creator, true),
                AccountMeta::new_readonly(system_program::id(), false),
                AccountMeta::new_readonly(spl_token_program_id(), false),
                AccountMeta::new_readonly(sysvar::rent::id(), false),
            ],
            data,
        );

        let tx = if *creator == self.payer.pubkey() {
            let sig = self
                .send_signed(ix)
                .await
                .map_err(|e| remap(e, MarketState::Open))?;
            info!("market created: {market} (sig {sig})");
            TxOutcome::Confirmed { signature: sig }
        } else {
            TxOutcome::Unsigned {
                message_hex: self.unsigned_message(ix, creator).await?,
            }
        };

        Ok(CreateMarketReceipt { market, tx })
    }

    async fn place_bet(
        &self,
        market: &Pubkey,
        encrypted_blob: Vec<u8>,
        choice: u8,
        stake: u64,
        depositor: &Pubkey,
    ) -> Result<PlaceBetReceipt> {
        if stake == 0 {
            return Err(CoordinatorError::InvalidStake);
        }
        if choice > 1 {
            return Err(CoordinatorError::InvalidChoice(choice));
        }
        if encrypted_blob.len() > protocol::MAX_BLOB_LEN {
            return Err(CoordinatorError::BlobTooLarge {
                len: encrypted_blob.len(),
                max: protocol::MAX_BLOB_LEN,
            });
        }

        let state = self.fetch_market(market).await?;
        if state.state != MarketState::Open {
            return Err(CoordinatorError::MarketNotOpen(state.state));
        }
        if now_unix() >= state.deadline {
            return Err(CoordinatorError::DeadlinePassed);
        }

        let seq = state.bet_count;
        let (bet_log, _) = protocol::bet_log_pda(&self.program_id, market, depositor, seq);
        let (escrow, _) = protocol::escrow_pda(&self.program_id, market);
        let depositor_ata = get_associated_token_address(depositor, &self.token_mint);

        let data = protocol::deposit_bet_data(&encrypted_blob, stake)?;
        let ix = protocol::instruction(
            &self.program_id,
            vec![
                AccountMeta::new(*market, false),
                AccountMeta::new(bet_log, false),
                AccountMeta::new(escrow, false),
                AccountMeta::new(depositor_ata, false),
                AccountMeta::new(*depositor, true),
                AccountMeta::new_readonly(spl_token_program_id(), false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data,
        );

        let tx = if *depositor == self.payer.pubkey() {
            let sig = self
                .send_signed(ix)
                .await
                .map_err(|e| remap(e, state.state))?;
            info!("bet {seq} placed on {market} (sig {sig})");
            TxOutcome::Confirmed { signature: sig }
        } else {
            TxOutcome::Unsigned {
                message_hex: self.unsigned_message(ix, depositor).await?,
            }
        };

        Ok(PlaceBetReceipt { bet_log, seq, tx })
    }

    async fn enqueue_resolution(&self, market: &Pubkey) -> Result<String> {
        let current = self.fetch_market(market).await?;
        if current.state != MarketState::Open {
            return Err(CoordinatorError::AlreadyEnqueued(current.state));
        }
        if now_unix() < current.deadline {
            return Err(CoordinatorError::DeadlineNotReached);
        }

        let (rqueue, _) = protocol::resolution_queue_pda(&self.program_id, market);
        let data = protocol::enqueue_resolution_data()?;
        let ix = protocol::instruction(
            &self.program_id,
            vec![
                AccountMeta::new(*market, false),
                AccountMeta::new(rqueue, false),
                AccountMeta::new(self.payer.pubkey(), true),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data,
        );

        let sig = self
            .send_signed(ix)
            .await
            .map_err(|e| remap(e, current.state))?;
        info!("market {market} enqueued for resolution (sig {sig})");
        Ok(sig)
    }

    async fn submit_settlement(
        &self,
        market: &Pubkey,
        result_bytes: &[u8],
        proof: &[u8],
    ) -> Result<String> {
        let current = self.fetch_market(market).await?;
        let (escrow, _) = protocol::escrow_pda(&self.program_id, market);

        let data = protocol::callback_settle_data(result_bytes, proof)?;
        let ix = protocol::instruction(
            &self.program_id,
            vec![
                AccountMeta::new(*market, false),
                AccountMeta::new(escrow, false),
                AccountMeta::new(self.payer.pubkey(), true),
                AccountMeta::new_readonly(spl_token_program_id(), false),
            ],
            data,
        );

        let sig = self.send_signed(ix).await.map_err(|e| {
            // The program guards settlement on its Enqueued state; in this call
            // context a state-guard rejection means "not settling".
            match remap(e, current.state) {
                CoordinatorError::AlreadyEnqueued(s) => CoordinatorError::NotSettling(s),
                other => other,
            }
        })?;
        info!("market {market} settled (sig {sig})");
        Ok(sig)
    }

    async fn fetch_market(&self, market: &Pubkey) -> Result<Market> {
        let account = self.rpc.get_account(market).await?;
        protocol::parse_market(market, &account.data)
    }

    async fn fetch_bets(&self, market: &Pubkey) -> Result<Vec<BetLog>> {
        let filters = vec![
            RpcFilterType::Memcmp(Memcmp::new_raw_bytes(
                0,
                protocol::account_discriminator("BetLog").to_vec(),
            )),
            RpcFilterType::Memcmp(Memcmp::new_raw_bytes(8, market.to_bytes().to_vec())),
        ];
        let config = RpcProgramAccountsConfig {
            filters: Some(filters),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                ..RpcAccountInfoConfig::default()
            },
            ..RpcProgramAccountsConfig::default()
        };

        let accounts = self
            .rpc
            .get_program_accounts_with_config(&self.program_id, config)
            .await?;

        let mut bets = accounts
            .into_iter()
            .map(|(_, account)| protocol::parse_bet_log(&account.data))
            .collect::<Result<Vec<_>>>()?;
        // downstream payout computation is order-sensitive
        bets.sort_by_key(|b| b.seq);
        Ok(bets)
    }
}

fn remap(err: CoordinatorError, current: MarketState) -> CoordinatorError {
    match err {
        CoordinatorError::Rpc(client_err) => protocol::map_program_error(client_err, current),
        other => other,
    }
}
