//! Store abstraction for the mesh's on-disk state.
//!
//! A store is a single root directory (default `./ledger/`) holding the
//! primary event log, content-addressable blobs, seals, activation records,
//! the trigger catalog, the segment chain state, and capsule files.

use crate::core::error::MeshResult;
use std::fs;
use std::path::{Path, PathBuf};

/// Store handle representing a mesh state workspace.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute or relative path to the store root directory.
    pub root: PathBuf,
}

impl Store {
    pub fn open<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("ledger_main.jsonl")
    }

    pub fn cas_dir(&self) -> PathBuf {
        self.root.join("cas")
    }

    pub fn seals_dir(&self) -> PathBuf {
        self.root.join("seals")
    }

    pub fn activations_dir(&self) -> PathBuf {
        self.root.join("activations")
    }

    pub fn triggers_path(&self) -> PathBuf {
        self.root.join("mesh_triggers.json")
    }

    pub fn chain_state_path(&self) -> PathBuf {
        self.root.join("mesh_chain_state.json")
    }

    pub fn engine_actions_path(&self) -> PathBuf {
        self.root.join("engine_actions.jsonl")
    }

    /// Create the directory layout. Idempotent.
    pub fn ensure_layout(&self) -> MeshResult<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.cas_dir())?;
        fs::create_dir_all(self.seals_dir())?;
        fs::create_dir_all(self.activations_dir())?;
        Ok(())
    }

    /// Atomic file replace: write to a temp sibling, then rename over the
    /// target. Readers never observe a partial file.
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> MeshResult<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
