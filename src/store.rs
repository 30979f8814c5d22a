//! Durable coordinator state: the `market -> job id` and `market -> state`
//! mappings. This is the only mutable state the coordinator owns, and it must
//! survive restarts — the ledger alone cannot recover a lost job id.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use log::info;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::error::Result;
use crate::state::{now_unix, MarketState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub state: MarketState,
    pub updated_at: i64,
}

pub struct JobStore {
    path: PathBuf,
    records: Mutex<HashMap<String, JobRecord>>,
}

impl JobStore {
    /// Load the store from disk, or start empty if the file does not exist yet.
    pub fn open(path: PathBuf) -> Result<Self> {
        let records = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Record a state transition. When the market is already tracked, the edge
    /// is checked against the lifecycle table; an illegal edge leaves the
    /// record untouched.
    pub fn record_state(&self, market: &Pubkey, state: MarketState) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let key = market.to_string();
        let record = match records.get(&key) {
            Some(existing) => JobRecord {
                job_id: existing.job_id.clone(),
                state: existing.state.transition_to(state)?,
                updated_at: now_unix(),
            },
            None => JobRecord {
                job_id: None,
                state,
                updated_at: now_unix(),
            },
        };
        records.insert(key, record);
        self.persist(&records)
    }

    /// Associate a job id with a market and move it to Settling. Persisted
    /// before the caller returns the id, so a crash cannot orphan the job.
    pub fn record_job(&self, market: &Pubkey, job_id: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let key = market.to_string();
        let state = match records.get(&key) {
            Some(existing) => existing.state.transition_to(MarketState::Settling)?,
            None => MarketState::Settling,
        };
        records.insert(
            key,
            JobRecord {
                job_id: Some(job_id.to_string()),
                state,
                updated_at: now_unix(),
            },
        );
        self.persist(&records)
    }

    pub fn get(&self, market: &Pubkey) -> Option<JobRecord> {
        self.records.lock().unwrap().get(&market.to_string()).cloned()
    }

    pub fn job_id(&self, market: &Pubkey) -> Option<String> {
        self.get(market).and_then(|r| r.job_id)
    }

    /// Markets with a dispatched job but no settlement yet; candidates for
    /// re-drive after a restart.
    pub fn settling_markets(&self) -> Vec<Pubkey> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.state == MarketState::Settling && r.job_id.is_some())
            .filter_map(|(k, _)| Pubkey::from_str(k).ok())
            .collect()
    }

    fn persist(&self, records: &HashMap<String, JobRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(records)?)?;
        Ok(())
    }
}

/// Default store location under the user's config dir, mirroring where the
/// operator keeps service state.
pub fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/precog/jobs.json")
}

impl Drop for JobStore {
    fn drop(&mut self) {
        info!("job store closed ({})", self.path.display());
    }
}
