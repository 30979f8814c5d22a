use crate::error::{CoordinatorError, Result};

/// Plaintext bet payload. Exists only on the client side of the encryption
/// boundary; the coordinator ships blobs to the MPC network without ever
/// decoding them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BetPayload {
    /// 0 = NO, 1 = YES.
    pub choice: u8,
    pub stake: u64,
}

/// Pluggable payload codec. The production deployment swaps in an MPC-compatible
/// encryption primitive; callers only see `encode`/`decode` and a deterministic
/// blob size.
pub trait BetCodec: Send + Sync {
    fn encode(&self, payload: &BetPayload) -> Vec<u8>;
    fn decode(&self, blob: &[u8]) -> Result<BetPayload>;
}

/// Fixed-width versionless wire format: `[choice u8][stake u64 LE]`.
pub const BLOB_LEN: usize = 9;

#[derive(Debug, Default, Clone, Copy)]
pub struct FixedWidthCodec;

impl BetCodec for FixedWidthCodec {
    fn encode(&self, payload: &BetPayload) -> Vec<u8> {
        let mut blob = Vec::with_capacity(BLOB_LEN);
        blob.push(payload.choice);
        blob.extend_from_slice(&payload.stake.to_le_bytes());
        blob
    }

    fn decode(&self, blob: &[u8]) -> Result<BetPayload> {
        if blob.len() != BLOB_LEN {
            return Err(CoordinatorError::MalformedBlob {
                len: blob.len(),
                expected: BLOB_LEN,
            });
        }
        let stake = u64::from_le_bytes(blob[1..9].try_into().unwrap());
        Ok(BetPayload {
            choice: blob[0],
            stake,
        })
    }
}
