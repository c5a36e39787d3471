//! Subsystem registration — centralizes per-subsystem store initialization
//! and schema discovery.
//!
//! Adding a new subsystem: append one entry to `SUBSYSTEMS`.

use crate::core::error::MeshResult;
use crate::core::store::Store;
use crate::mesh::{bus, engine, registry, segment, sync_point, trigger};
use std::fs;

pub(crate) struct SubsystemInit {
    pub name: &'static str,
    pub initialize: fn(&Store) -> MeshResult<()>,
    pub schema: fn() -> serde_json::Value,
}

fn init_noop(_store: &Store) -> MeshResult<()> {
    Ok(())
}

fn init_trigger(store: &Store) -> MeshResult<()> {
    fs::create_dir_all(store.seals_dir())?;
    fs::create_dir_all(store.activations_dir())?;
    Ok(())
}

fn init_segment(store: &Store) -> MeshResult<()> {
    fs::create_dir_all(store.cas_dir())?;
    Ok(())
}

/// All subsystems, in initialization order. Sequential execution keeps
/// first-start layout creation free of races.
pub(crate) const SUBSYSTEMS: &[SubsystemInit] = &[
    SubsystemInit { name: "agent", initialize: init_noop, schema: registry::schema },
    SubsystemInit { name: "msg", initialize: init_noop, schema: bus::schema },
    SubsystemInit { name: "sync", initialize: init_noop, schema: sync_point::schema },
    SubsystemInit { name: "trigger", initialize: init_trigger, schema: trigger::schema },
    SubsystemInit { name: "segment", initialize: init_segment, schema: segment::schema },
    SubsystemInit { name: "engine", initialize: init_noop, schema: engine::schema },
];

/// Initialize every subsystem's store layout sequentially.
pub(crate) fn initialize_all(store: &Store) -> MeshResult<()> {
    store.ensure_layout()?;
    for sub in SUBSYSTEMS {
        (sub.initialize)(store)?;
    }
    Ok(())
}
