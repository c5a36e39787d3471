//! Mesh subsystems: agent registry, message bus, sync points, triggers,
//! segment pipeline, and the engine scheduler, sharing one store and one
//! ledger.

pub mod bus;
pub mod engine;
pub mod registry;
pub mod segment;
pub mod sync_point;
pub mod trigger;

use crate::core::config::MeshConfig;
use crate::core::error::MeshResult;
use crate::core::ledger::Ledger;
use crate::core::seal::{AlphaCeiling, SealService};
use crate::core::store::Store;
use crate::mesh::bus::{Message, MessageBus};
use crate::mesh::registry::{AgentRegistry, AgentState};
use crate::mesh::segment::{SegmentParams, SegmentRunner};
use crate::mesh::sync_point::SyncCoordinator;
use crate::mesh::trigger::TriggerCore;
use serde_json::Value;
use std::sync::Arc;

/// One fully wired mesh over a store root.
pub struct Mesh {
    pub config: MeshConfig,
    pub store: Store,
    pub ledger: Arc<Ledger>,
    pub seals: SealService,
    pub registry: Arc<AgentRegistry>,
    pub bus: Arc<MessageBus>,
    pub sync: Arc<SyncCoordinator>,
    pub triggers: Arc<TriggerCore>,
    pub segments: Arc<SegmentRunner>,
}

impl Mesh {
    /// Open (initializing if needed) every subsystem over `config.root`.
    pub fn open(config: MeshConfig) -> MeshResult<Self> {
        let store = Store::open(&config.root);
        store.ensure_layout()?;
        let ledger = Arc::new(Ledger::open(store.ledger_path())?);
        ledger.ensure_genesis("mesh initialized")?;

        let seals = SealService::open(store.seals_dir())?;
        let registry = Arc::new(AgentRegistry::new(Arc::clone(&ledger)));
        let bus = Arc::new(MessageBus::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
        ));
        let sync = Arc::new(SyncCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
            Arc::clone(&ledger),
        ));
        let triggers = Arc::new(TriggerCore::open(
            store.clone(),
            Arc::clone(&ledger),
            AlphaCeiling::new(config.alpha_ceiling),
        )?);
        let params = SegmentParams {
            cycles_per_segment: config.cycles_per_segment,
            usd_budget: config.usd_budget,
            slo_ms: config.slo_ms,
            seed: config.seed,
            ..Default::default()
        };
        let segments = Arc::new(SegmentRunner::new(
            store.clone(),
            Arc::clone(&ledger),
            params,
            &config.secret,
        )?);

        Ok(Self {
            config,
            store,
            ledger,
            seals,
            registry,
            bus,
            sync,
            triggers,
            segments,
        })
    }

    /// Append a named metric observation to the ledger.
    pub fn track_event(&self, name: &str, value: Value) -> MeshResult<()> {
        self.ledger
            .append_json("track_event", name, serde_json::json!({"value": value}))
            .map(|_| ())
    }

    pub fn get_agent_state(&self, agent_id: &str) -> Option<AgentState> {
        self.registry.get_state(agent_id)
    }

    pub fn send_message(&self, msg: Message) -> MeshResult<()> {
        self.bus.send(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_wires_all_subsystems() {
        let tmp = tempfile::tempdir().unwrap();
        let config = MeshConfig {
            root: tmp.path().to_path_buf(),
            seed: Some(1),
            ..Default::default()
        };
        let mesh = Mesh::open(config).unwrap();
        assert!(mesh.store.ledger_path().exists());
        assert!(mesh.store.cas_dir().is_dir());

        mesh.registry.register("alpha", vec![]).unwrap();
        mesh.track_event("boot_marker", serde_json::json!(1)).unwrap();
        let msg = Message::new("alpha", "alpha", "note", serde_json::json!({}));
        mesh.send_message(msg).unwrap();
        assert!(mesh.get_agent_state("alpha").is_some());
        assert!(mesh.ledger.verify().unwrap().ok);
    }

    #[test]
    fn test_reopen_preserves_ledger() {
        let tmp = tempfile::tempdir().unwrap();
        let config = MeshConfig {
            root: tmp.path().to_path_buf(),
            ..Default::default()
        };
        let first = Mesh::open(config.clone()).unwrap();
        first.track_event("x", serde_json::json!(1)).unwrap();
        drop(first);

        let second = Mesh::open(config).unwrap();
        let events = second.ledger.iter_events().unwrap();
        // Genesis is not rewritten on reopen.
        assert_eq!(
            events.iter().filter(|e| e.event == "genesis").count(),
            1
        );
        assert!(events.iter().any(|e| e.event == "track_event"));
    }
}
