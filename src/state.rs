use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::error::{CoordinatorError, Result};

/// Pubkeys as base58 strings on JSON surfaces (solana-sdk's own serde impl
/// emits raw byte arrays).
pub mod pubkey_string {
    use serde::{Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &Pubkey, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&key.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Pubkey, D::Error> {
        let raw = String::deserialize(d)?;
        Pubkey::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// Opaque blobs as hex strings on JSON surfaces.
pub mod hex_blob {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(blob: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(blob))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}

/// Market lifecycle states. On-chain the ledger records Open, Enqueued, Settled
/// and Cancelled; Settling is the coordinator's durable refinement of Enqueued,
/// entered once the MPC network has accepted the resolution job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketState {
    Open,
    Enqueued,
    Settling,
    Settled,
    Cancelled,
}

impl MarketState {
    /// The single guarded transition function. Every state change in the system
    /// goes through here; invalid edges are rejected and leave state unchanged.
    pub fn transition_to(self, next: MarketState) -> Result<MarketState> {
        use MarketState::*;
        let legal = matches!(
            (self, next),
            (Open, Enqueued)
                | (Enqueued, Settling)
                | (Settling, Settled)
                | (Settling, Enqueued) // explicit retry edge after job failure
                | (Open, Cancelled)
                | (Enqueued, Cancelled)
        );
        if legal {
            Ok(next)
        } else {
            Err(CoordinatorError::InvalidTransition { from: self, to: next })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MarketState::Settled | MarketState::Cancelled)
    }

    /// Decode the on-chain enum byte.
    pub fn from_u8(raw: u8) -> Option<MarketState> {
        match raw {
            0 => Some(MarketState::Open),
            1 => Some(MarketState::Enqueued),
            2 => Some(MarketState::Settled),
            3 => Some(MarketState::Cancelled),
            _ => None,
        }
    }
}

/// A prediction market as seen by API consumers. `total_pool` is the running
/// escrow balance; only the aggregate is public, the per-choice split never
/// leaves the MPC boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    #[serde(with = "pubkey_string")]
    pub address: Pubkey,
    #[serde(with = "pubkey_string")]
    pub creator: Pubkey,
    pub question: String,
    pub deadline: i64,
    #[serde(with = "pubkey_string")]
    pub mxe_program_id: Pubkey,
    #[serde(with = "pubkey_string")]
    pub escrow_vault: Pubkey,
    pub total_pool: u64,
    pub state: MarketState,
    pub bet_count: u64,
    /// sha256 of the settlement result bytes; zeroed until Settled.
    pub result_hash: [u8; 32],
}

/// One immutable encrypted bet. `seq` is derived from the market's bet count at
/// deposit time and is part of the bet-log PDA seeds, so it is unique and
/// gap-free per market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetLog {
    #[serde(with = "pubkey_string")]
    pub market: Pubkey,
    #[serde(with = "pubkey_string")]
    pub depositor: Pubkey,
    pub amount: u64,
    #[serde(with = "hex_blob")]
    pub encrypted_blob: Vec<u8>,
    pub timestamp: i64,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One payout line in the MPC result, in bet order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub recipient: String,
    pub amount: u64,
}

/// Settlement result computed inside the MPC boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxeResult {
    pub market_id: String,
    pub winning_choice: u8,
    pub total_pool: u64,
    pub fee_amount: u64,
    pub payouts: Vec<Payout>,
    pub timestamp: i64,
}

impl MxeResult {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Status snapshot of an off-chain resolution job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionJob {
    /// The market under resolution; empty when the network omits it.
    #[serde(default)]
    pub market_id: String,
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<MxeResult>,
    /// Attestation over the result bytes, hex on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

/// A completed job's result together with the attestation to verify it with.
#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub result: MxeResult,
    pub proof: Vec<u8>,
}

pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [MarketState; 5] = [
        MarketState::Open,
        MarketState::Enqueued,
        MarketState::Settling,
        MarketState::Settled,
        MarketState::Cancelled,
    ];

    fn legal_edges() -> Vec<(MarketState, MarketState)> {
        use MarketState::*;
        vec![
            (Open, Enqueued),
            (Enqueued, Settling),
            (Settling, Settled),
            (Settling, Enqueued),
            (Open, Cancelled),
            (Enqueued, Cancelled),
        ]
    }

    #[test]
    fn only_table_edges_are_accepted() {
        let legal = legal_edges();
        for from in ALL {
            for to in ALL {
                let res = from.transition_to(to);
                if legal.contains(&(from, to)) {
                    assert_eq!(res.unwrap(), to);
                } else {
                    let err = res.unwrap_err();
                    assert_eq!(err.kind(), "invalid_transition");
                }
            }
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for terminal in [MarketState::Settled, MarketState::Cancelled] {
            assert!(terminal.is_terminal());
            for to in ALL {
                assert!(terminal.transition_to(to).is_err());
            }
        }
    }

    #[test]
    fn settling_is_not_reachable_from_open() {
        assert!(MarketState::Open
            .transition_to(MarketState::Settling)
            .is_err());
    }

    #[test]
    fn onchain_byte_round_trip() {
        for (raw, want) in [
            (0u8, MarketState::Open),
            (1, MarketState::Enqueued),
            (2, MarketState::Settled),
            (3, MarketState::Cancelled),
        ] {
            assert_eq!(MarketState::from_u8(raw), Some(want));
        }
        assert_eq!(MarketState::from_u8(9), None);
    }
}
