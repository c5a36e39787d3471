//! Payload seals and the Alpha Ceiling policy hook.
//!
//! A seal is a SHA-256 witness over arbitrary bytes at a moment in time,
//! persisted as `seals/<name>.<ts>.sha` containing a single hex digest. The
//! Alpha Ceiling is a process-wide integer cap applied to resource requests;
//! enforcement is logged to the ledger but is a policy hook, not a security
//! boundary.

use crate::core::canon::sha256_hex;
use crate::core::error::MeshResult;
use crate::core::ledger::Ledger;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadSeal {
    pub name: String,
    pub ts: String,
    pub sha256: String,
    pub file_ref: String,
}

#[derive(Debug, Clone)]
pub struct SealService {
    seals_dir: PathBuf,
}

impl SealService {
    pub fn open<P: AsRef<Path>>(seals_dir: P) -> MeshResult<Self> {
        fs::create_dir_all(seals_dir.as_ref())?;
        Ok(Self {
            seals_dir: seals_dir.as_ref().to_path_buf(),
        })
    }

    /// Seal a payload: hash it and persist the digest.
    pub fn seal(&self, name: &str, payload: &[u8]) -> MeshResult<PayloadSeal> {
        let ts = time::now_epoch_z();
        let sha256 = sha256_hex(payload);
        let file_name = format!("{}.{}.sha", name, ts);
        let path = self.seals_dir.join(&file_name);
        fs::write(&path, format!("{}\n", sha256))?;
        Ok(PayloadSeal {
            name: name.to_string(),
            ts,
            sha256,
            file_ref: file_name,
        })
    }

    /// Recompute the payload hash and compare against the seal.
    pub fn verify(&self, seal: &PayloadSeal, payload: &[u8]) -> bool {
        sha256_hex(payload) == seal.sha256
    }
}

/// Process-wide integer cap on resource requests.
#[derive(Debug, Clone)]
pub struct AlphaCeiling {
    pub cap: i64,
}

impl AlphaCeiling {
    pub fn new(cap: i64) -> Self {
        Self { cap }
    }

    /// Cap `value` at the ceiling (or a per-call override). When capping
    /// occurs an `alpha_ceiling_enforced` event is appended; an in-range
    /// value logs nothing.
    pub fn enforce(&self, ledger: &Ledger, value: i64, ceiling: Option<i64>) -> MeshResult<i64> {
        let cap = ceiling.unwrap_or(self.cap);
        if value <= cap {
            return Ok(value);
        }
        ledger.append_json(
            "alpha_ceiling_enforced",
            "resource request capped",
            serde_json::json!({
                "original_value": value,
                "capped_value": cap,
            }),
        )?;
        Ok(cap)
    }
}
