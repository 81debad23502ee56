//! Snapshot store with height-scheduled updates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::params::GovernanceParams;

#[derive(Error, Debug)]
pub enum GovernanceError {
    #[error("unknown governance parameter: {0}")]
    UnknownParameter(String),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: Value },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared governance parameter store.
///
/// Reads clone an `Arc` snapshot under a short read lock. Mutations are
/// scheduled against a block height and applied by the ledger worker when the
/// chain reaches that height; the config file is rewritten on every apply.
#[derive(Clone)]
pub struct GovernanceStore {
    current: Arc<RwLock<Arc<GovernanceParams>>>,
    pending: Arc<RwLock<BTreeMap<u64, Vec<(String, Value)>>>>,
    config_path: Option<PathBuf>,
}

impl GovernanceStore {
    /// Store with compiled-in defaults and no backing file.
    pub fn new_default() -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(GovernanceParams::default()))),
            pending: Arc::new(RwLock::new(BTreeMap::new())),
            config_path: None,
        }
    }

    /// Load from `config.json`, falling back to defaults when absent or
    /// unreadable. The file is (re)written so a fresh data dir gets a
    /// complete snapshot.
    pub fn load(config_path: &Path) -> Result<Self, GovernanceError> {
        let params = match std::fs::read_to_string(config_path) {
            Ok(raw) => match serde_json::from_str::<GovernanceParams>(&raw) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "governance config unreadable, using defaults");
                    GovernanceParams::default()
                }
            },
            Err(_) => GovernanceParams::default(),
        };
        let store = Self {
            current: Arc::new(RwLock::new(Arc::new(params))),
            pending: Arc::new(RwLock::new(BTreeMap::new())),
            config_path: Some(config_path.to_path_buf()),
        };
        store.persist()?;
        Ok(store)
    }

    /// Lock-free-ish snapshot read: clones the current `Arc`.
    pub fn snapshot(&self) -> Arc<GovernanceParams> {
        self.current.read().clone()
    }

    /// Schedule a parameter change to take effect at `effective_height`.
    ///
    /// Validation happens immediately so a malformed governance tx is
    /// rejected before it is sealed.
    pub fn schedule_update(
        &self,
        name: &str,
        value: Value,
        effective_height: u64,
    ) -> Result<(), GovernanceError> {
        // Dry-run against a copy to validate name and type
        let mut probe = (*self.snapshot()).clone();
        apply_param(&mut probe, name, &value)?;

        self.pending
            .write()
            .entry(effective_height)
            .or_default()
            .push((name.to_string(), value));
        Ok(())
    }

    /// Apply every update scheduled at or below `height`. Called by the
    /// ledger worker after each block is accepted on the active chain.
    pub fn apply_due(&self, height: u64) {
        let due: Vec<(String, Value)> = {
            let mut pending = self.pending.write();
            let mut due = Vec::new();
            let keys: Vec<u64> = pending.range(..=height).map(|(k, _)| *k).collect();
            for key in keys {
                if let Some(updates) = pending.remove(&key) {
                    due.extend(updates);
                }
            }
            due
        };
        if due.is_empty() {
            return;
        }

        let mut next = (*self.snapshot()).clone();
        for (name, value) in due {
            match apply_param(&mut next, &name, &value) {
                Ok(()) => info!(param = %name, %value, height, "governance parameter updated"),
                Err(e) => warn!(param = %name, error = %e, "scheduled governance update rejected"),
            }
        }
        *self.current.write() = Arc::new(next);
        if let Err(e) = self.persist() {
            warn!(error = %e, "failed to persist governance snapshot");
        }
    }

    /// Drop any updates scheduled above `height` (reorg unwound their blocks).
    pub fn discard_above(&self, height: u64) {
        self.pending.write().retain(|&h, _| h <= height);
    }

    fn persist(&self) -> Result<(), GovernanceError> {
        if let Some(path) = &self.config_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let snapshot = self.snapshot();
            std::fs::write(path, serde_json::to_string_pretty(&*snapshot).unwrap_or_default())?;
        }
        Ok(())
    }
}

fn apply_param(params: &mut GovernanceParams, name: &str, value: &Value) -> Result<(), GovernanceError> {
    let invalid = || GovernanceError::InvalidValue {
        name: name.to_string(),
        value: value.clone(),
    };
    let as_f64 = |v: &Value| v.as_f64().ok_or_else(invalid);
    let as_u64 = |v: &Value| v.as_u64().ok_or_else(invalid);
    let as_unit = |v: &Value| {
        let f = v.as_f64().ok_or_else(invalid)?;
        if !(0.0..=1.0).contains(&f) {
            return Err(invalid());
        }
        Ok(f)
    };

    match name {
        "threshold_routine" => params.threshold_routine = as_unit(value)?,
        "threshold_high_impact" => params.threshold_high_impact = as_unit(value)?,
        "threshold_constitutional" => params.threshold_constitutional = as_unit(value)?,
        "threshold_emergency" => params.threshold_emergency = as_unit(value)?,
        "refinement_margin" => params.refinement_margin = as_unit(value)?,
        "max_rounds" => params.max_rounds = as_u64(value)?.max(1) as u32,
        "round_deadline_secs" => params.round_deadline_secs = as_u64(value)?.max(1),
        "quorum_fraction" => params.quorum_fraction = as_unit(value)?,
        "safety_floor" => params.safety_floor = as_unit(value)?,
        "approval_reward" => params.approval_reward = as_u64(value)?,
        "reputation_lambda" => params.reputation_lambda = as_f64(value)?,
        "reputation_step_aligned" => params.reputation_step_aligned = as_f64(value)?,
        "reputation_step_misaligned" => params.reputation_step_misaligned = as_f64(value)?,
        "authority_latency" => params.authority_latency = as_u64(value)?,
        "max_hops" => params.max_hops = as_u64(value)?.min(u8::MAX as u64) as u8,
        "sync_batch" => params.sync_batch = as_u64(value)?.max(1),
        "max_tx_per_block" => params.max_tx_per_block = as_u64(value)?.max(1) as usize,
        "max_mempool" => params.max_mempool = as_u64(value)?.max(1) as usize,
        "max_concurrent_deliberations" => {
            params.max_concurrent_deliberations = as_u64(value)?.max(1) as usize
        }
        "ulfr_weights" => {
            params.ulfr_weights =
                serde_json::from_value(value.clone()).map_err(|_| invalid())?;
        }
        "ulfr_preset" => {
            let preset: crate::params::WeightPreset =
                serde_json::from_value(value.clone()).map_err(|_| invalid())?;
            params.ulfr_weights = preset.weights();
        }
        other => return Err(GovernanceError::UnknownParameter(other.to_string())),
    }
    Ok(())
}
