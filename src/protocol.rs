//! Wire layer for the on-chain market program: PDA seeds, Anchor-convention
//! discriminators, instruction encoding and account parsing. Layouts here must
//! match the deployed program byte for byte.
//!
//! The program keeps four states on chain (Settling is coordinator-side
//! bookkeeping, see `store`) and records bets as ciphertext only; no
//! instruction or account in this layer carries a plaintext choice.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};

use crate::error::{CoordinatorError, Result};
use crate::state::{BetLog, Market, MarketState};

pub const MARKET_SEED: &[u8] = b"market";
pub const ESCROW_SEED: &[u8] = b"escrow";
pub const BET_SEED: &[u8] = b"bet";
pub const RQUEUE_SEED: &[u8] = b"rqueue";

pub const MAX_QUESTION_LEN: usize = 280;
pub const MAX_BLOB_LEN: usize = 512;

// Custom error codes of the market program, offset 6000 per Anchor convention.
pub const ERR_QUESTION_TOO_LONG: u32 = 6000;
pub const ERR_INVALID_DEADLINE: u32 = 6001;
pub const ERR_MARKET_NOT_OPEN: u32 = 6002;
pub const ERR_DEADLINE_PASSED: u32 = 6003;
pub const ERR_BLOB_TOO_LARGE: u32 = 6004;
pub const ERR_INVALID_AMOUNT: u32 = 6005;
pub const ERR_INVALID_MARKET_STATE: u32 = 6006;
pub const ERR_DEADLINE_NOT_REACHED: u32 = 6007;

// ---------- PDAs ----------

pub fn market_pda(program_id: &Pubkey, creator: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[MARKET_SEED, creator.as_ref()], program_id)
}

pub fn escrow_pda(program_id: &Pubkey, market: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[ESCROW_SEED, market.as_ref()], program_id)
}

/// Bet-log address is keyed by the market's bet count at deposit time, which
/// both orders bets and prevents double counting.
pub fn bet_log_pda(
    program_id: &Pubkey,
    market: &Pubkey,
    depositor: &Pubkey,
    seq: u64,
) -> (Pubkey, u8) {
    Pubkey::find_program_address(
        &[
            BET_SEED,
            market.as_ref(),
            depositor.as_ref(),
            &seq.to_le_bytes(),
        ],
        program_id,
    )
}

pub fn resolution_queue_pda(program_id: &Pubkey, market: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[RQUEUE_SEED, market.as_ref()], program_id)
}

// ---------- Discriminators ----------

fn sighash(namespace: &str, name: &str) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(format!("{namespace}:{name}").as_bytes());
    let hash = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    sighash("global", name)
}

pub fn account_discriminator(name: &str) -> [u8; 8] {
    sighash("account", name)
}

fn encode_ix_data<T: BorshSerialize>(name: &str, args: &T) -> Result<Vec<u8>> {
    let mut data = instruction_discriminator(name).to_vec();
    data.extend(args.try_to_vec().map_err(CoordinatorError::Store)?);
    Ok(data)
}

// ---------- Instruction args ----------

#[derive(BorshSerialize, Debug)]
struct CreateMarketArgs {
    question: String,
    deadline: i64,
    mxe_program_id: Pubkey,
}

#[derive(BorshSerialize, Debug)]
struct DepositBetArgs {
    encrypted_blob: Vec<u8>,
    amount: u64,
}

#[derive(BorshSerialize, Debug)]
struct EnqueueResolutionArgs {}

#[derive(BorshSerialize, Debug)]
struct CallbackSettleArgs {
    mxe_result: Vec<u8>,
    result_signature: Vec<u8>,
}

pub fn create_market_data(
    question: &str,
    deadline: i64,
    mxe_program_id: &Pubkey,
) -> Result<Vec<u8>> {
    encode_ix_data(
        "create_market",
        &CreateMarketArgs {
            question: question.to_string(),
            deadline,
            mxe_program_id: *mxe_program_id,
        },
    )
}

pub fn deposit_bet_data(encrypted_blob: &[u8], amount: u64) -> Result<Vec<u8>> {
    encode_ix_data(
        "deposit_bet",
        &DepositBetArgs {
            encrypted_blob: encrypted_blob.to_vec(),
            amount,
        },
    )
}

pub fn enqueue_resolution_data() -> Result<Vec<u8>> {
    encode_ix_data("enqueue_resolution", &EnqueueResolutionArgs {})
}

pub fn callback_settle_data(mxe_result: &[u8], result_signature: &[u8]) -> Result<Vec<u8>> {
    encode_ix_data(
        "callback_settle",
        &CallbackSettleArgs {
            mxe_result: mxe_result.to_vec(),
            result_signature: result_signature.to_vec(),
        },
    )
}

// ---------- Account layouts ----------

/// On-chain market account body (after the 8-byte discriminator).
#[derive(BorshDeserialize, Debug)]
pub struct MarketAccount {
    pub creator: Pubkey,
    pub question: String,
    pub deadline: i64,
    pub mxe_program_id: Pubkey,
    pub escrow_vault: Pubkey,
    pub total_pool: u64,
    pub state: u8,
    pub result_hash: [u8; 32],
    pub bump: u8,
    pub bet_count: u64,
}

/// On-chain bet-log account body. The plaintext choice never appears here; the
/// blob is the only representation of it before settlement.
#[derive(BorshDeserialize, Debug)]
pub struct BetLogAccount {
    pub market: Pubkey,
    pub depositor: Pubkey,
    pub amount: u64,
    pub encrypted_blob: Vec<u8>,
    pub timestamp: i64,
    pub seq: u64,
    pub bump: u8,
}

fn bad_account(data: &[u8]) -> CoordinatorError {
    CoordinatorError::MalformedBlob {
        len: data.len(),
        expected: 8,
    }
}

fn check_discriminator(data: &[u8], name: &str) -> Result<()> {
    if data.len() < 8 || data[..8] != account_discriminator(name) {
        return Err(bad_account(data));
    }
    Ok(())
}

pub fn parse_market(address: &Pubkey, data: &[u8]) -> Result<Market> {
    check_discriminator(data, "Market")?;
    // Accounts are allocated with fixed space; allow trailing padding.
    let acc = MarketAccount::deserialize(&mut &data[8..]).map_err(|_| bad_account(data))?;
    let state = MarketState::from_u8(acc.state).ok_or_else(|| bad_account(data))?;
    Ok(Market {
        address: *address,
        creator: acc.creator,
        question: acc.question,
        deadline: acc.deadline,
        mxe_program_id: acc.mxe_program_id,
        escrow_vault: acc.escrow_vault,
        total_pool: acc.total_pool,
        state,
        bet_count: acc.bet_count,
        result_hash: acc.result_hash,
    })
}

pub fn parse_bet_log(data: &[u8]) -> Result<BetLog> {
    check_discriminator(data, "BetLog")?;
    let acc = BetLogAccount::deserialize(&mut &data[8..]).map_err(|_| bad_account(data))?;
    Ok(BetLog {
        market: acc.market,
        depositor: acc.depositor,
        amount: acc.amount,
        encrypted_blob: acc.encrypted_blob,
        timestamp: acc.timestamp,
        seq: acc.seq,
    })
}

/// Map a failed transaction's custom program error back onto the typed guard
/// violations, so callers racing the ledger's atomic state check get the same
/// error kinds as the local pre-checks.
pub fn map_program_error(
    err: solana_client::client_error::ClientError,
    current: MarketState,
) -> CoordinatorError {
    use solana_sdk::instruction::InstructionError;
    use solana_sdk::transaction::TransactionError;

    if let Some(TransactionError::InstructionError(_, InstructionError::Custom(code))) =
        err.get_transaction_error()
    {
        return match code {
            ERR_QUESTION_TOO_LONG => CoordinatorError::QuestionTooLong {
                max: MAX_QUESTION_LEN,
            },
            ERR_INVALID_DEADLINE => CoordinatorError::InvalidDeadline {
                deadline: 0,
                now: 0,
            },
            ERR_MARKET_NOT_OPEN => CoordinatorError::MarketNotOpen(current),
            ERR_DEADLINE_PASSED => CoordinatorError::DeadlinePassed,
            ERR_BLOB_TOO_LARGE => CoordinatorError::BlobTooLarge {
                len: 0,
                max: MAX_BLOB_LEN,
            },
            ERR_INVALID_AMOUNT => CoordinatorError::InvalidStake,
            ERR_INVALID_MARKET_STATE => CoordinatorError::AlreadyEnqueued(current),
            ERR_DEADLINE_NOT_REACHED => CoordinatorError::DeadlineNotReached,
            _ => CoordinatorError::Rpc(err),
        };
    }
    CoordinatorError::Rpc(err)
}

/// Convenience for assembling an instruction once accounts and data are built.
pub fn instruction(
    program_id: &Pubkey,
    accounts: Vec<solana_sdk::instruction::AccountMeta>,
    data: Vec<u8>,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_and_account_namespaces_differ() {
        assert_ne!(
            instruction_discriminator("create_market"),
            account_discriminator("create_market")
        );
    }

    #[test]
    fn bet_log_pda_varies_with_seq() {
        let program = Pubkey::new_unique();
        let market = Pubkey::new_unique();
        let depositor = Pubkey::new_unique();
        let (a, _) = bet_log_pda(&program, &market, &depositor, 0);
        let (b, _) = bet_log_pda(&program, &market, &depositor, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn deposit_args_carry_only_blob_and_amount() {
        let blob = vec![9u8; 9];
        let data = deposit_bet_data(&blob, 100).unwrap();
        assert_eq!(&data[..8], &instruction_discriminator("deposit_bet"));
        // borsh: u32 length prefix + blob bytes + u64 amount, nothing else
        assert_eq!(data.len(), 8 + 4 + blob.len() + 8);
        assert_eq!(&data[8..12], &(blob.len() as u32).to_le_bytes());
        assert_eq!(&data[12..21], blob.as_slice());
        assert_eq!(&data[21..], &100u64.to_le_bytes());
    }

    #[test]
    fn market_account_round_trip() {
        #[derive(BorshSerialize)]
        struct Raw {
            creator: Pubkey,
            question: String,
            deadline: i64,
            mxe_program_id: Pubkey,
            escrow_vault: Pubkey,
            total_pool: u64,
            state: u8,
            result_hash: [u8; 32],
            bump: u8,
            bet_count: u64,
        }
        let raw = Raw {
            creator: Pubkey::new_unique(),
            question: "will it rain".to_string(),
            deadline: 1_800_000_000,
            mxe_program_id: Pubkey::new_unique(),
            escrow_vault: Pubkey::new_unique(),
            total_pool: 300,
            state: 1,
            result_hash: [7u8; 32],
            bump: 255,
            bet_count: 2,
        };
        let mut data = account_discriminator("Market").to_vec();
        data.extend(raw.try_to_vec().unwrap());
        // trailing padding, as allocated on chain
        data.extend([0u8; 64]);

        let address = Pubkey::new_unique();
        let market = parse_market(&address, &data).unwrap();
        assert_eq!(market.address, address);
        assert_eq!(market.question, "will it rain");
        assert_eq!(market.state, MarketState::Enqueued);
        assert_eq!(market.bet_count, 2);
        assert_eq!(market.result_hash, [7u8; 32]);
    }

    #[test]
    fn rejects_foreign_discriminator() {
        let data = account_discriminator("Other").to_vec();
        assert!(parse_market(&Pubkey::new_unique(), &data).is_err());
    }
}
