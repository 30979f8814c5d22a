use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::state::MarketState;

/// Every failure the coordinator can surface. Each variant carries a stable
/// machine-readable kind string (`kind()`) so API clients can branch without
/// parsing messages.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    // --- validation (rejected locally, never sent to the ledger or MPC) ---
    #[error("deadline {deadline} is not in the future (now {now})")]
    InvalidDeadline { deadline: i64, now: i64 },

    #[error("question exceeds {max} bytes")]
    QuestionTooLong { max: usize },

    #[error("stake must be greater than zero")]
    InvalidStake,

    #[error("choice must be 0 or 1, got {0}")]
    InvalidChoice(u8),

    #[error("encrypted blob is {len} bytes, limit is {max}")]
    BlobTooLarge { len: usize, max: usize },

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("`{0}` is not a valid public key")]
    BadPubkey(String),

    // --- codec ---
    #[error("malformed bet blob: {len} bytes, expected {expected}")]
    MalformedBlob { len: usize, expected: usize },

    // --- state-machine guard violations ---
    #[error("market {0} already exists")]
    DuplicateMarket(Pubkey),

    #[error("market is not open for bets (state {0:?})")]
    MarketNotOpen(MarketState),

    #[error("market deadline has passed")]
    DeadlinePassed,

    #[error("market deadline has not been reached yet")]
    DeadlineNotReached,

    #[error("market is already enqueued for resolution (state {0:?})")]
    AlreadyEnqueued(MarketState),

    #[error("market is not settling (state {0:?})")]
    NotSettling(MarketState),

    #[error("invalid market state transition {from:?} -> {to:?}")]
    InvalidTransition { from: MarketState, to: MarketState },

    // --- resolution job ---
    #[error("no resolution job recorded for market {0}")]
    NoJobForMarket(Pubkey),

    #[error("mpc job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    #[error("mpc job {job_id} still incomplete after {attempts} polls")]
    JobTimeout { job_id: String, attempts: u32 },

    // --- settlement ---
    #[error("mpc result proof did not verify for market {0}")]
    InvalidProof(Pubkey),

    // --- transient external failures (retryable) ---
    #[error("ledger rpc error: {0}")]
    Rpc(#[from] solana_client::client_error::ClientError),

    #[error("mpc transport error: {0}")]
    MpcTransport(String),

    #[error("job store io error: {0}")]
    Store(#[from] std::io::Error),

    #[error("malformed payload: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CoordinatorError {
    /// Stable kind string for the API surface. Never change these once shipped.
    pub fn kind(&self) -> &'static str {
        use CoordinatorError::*;
        match self {
            InvalidDeadline { .. } => "invalid_deadline",
            QuestionTooLong { .. } => "question_too_long",
            InvalidStake => "invalid_stake",
            InvalidChoice(_) => "invalid_choice",
            BlobTooLarge { .. } => "blob_too_large",
            MissingField(_) => "missing_field",
            BadPubkey(_) => "bad_pubkey",
            MalformedBlob { .. } => "malformed_blob",
            DuplicateMarket(_) => "duplicate_market",
            MarketNotOpen(_) => "market_not_open",
            DeadlinePassed => "deadline_passed",
            DeadlineNotReached => "deadline_not_reached",
            AlreadyEnqueued(_) => "already_enqueued",
            NotSettling(_) => "not_settling",
            InvalidTransition { .. } => "invalid_transition",
            NoJobForMarket(_) => "no_job_for_market",
            JobFailed { .. } => "job_failed",
            JobTimeout { .. } => "job_timeout",
            InvalidProof(_) => "invalid_proof",
            Rpc(_) => "rpc_error",
            MpcTransport(_) => "mpc_transport_error",
            Store(_) => "store_error",
            Serde(_) => "bad_payload",
        }
    }

    /// Transient failures the caller may retry. Guard violations and validation
    /// errors are not retryable; the job outcomes are re-drivable but need a new
    /// attempt at a higher level, not a blind retry of the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Rpc(_)
                | CoordinatorError::MpcTransport(_)
                | CoordinatorError::Store(_)
                | CoordinatorError::JobTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
