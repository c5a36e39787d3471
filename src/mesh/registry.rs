//! Agent registry: registration, state snapshots, partial updates.
//!
//! All operations are linearizable with respect to the registry mutex; the
//! ledger append for register/unregister happens after the in-memory update
//! and outside the lock.

use crate::core::error::{MeshError, MeshResult};
use crate::core::ledger::Ledger;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Registered,
    Active,
    Working,
    Idle,
    Unregistered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    pub status: AgentStatus,
    pub last_updated: String,
    pub capabilities: BTreeSet<String>,
    pub current_tasks: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
    pub resources: BTreeMap<String, f64>,
}

impl AgentState {
    fn new(agent_id: &str, capabilities: BTreeSet<String>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            status: AgentStatus::Registered,
            last_updated: time::now_rfc3339(),
            capabilities,
            current_tasks: Vec::new(),
            metrics: BTreeMap::new(),
            resources: BTreeMap::new(),
        }
    }
}

/// Partial update payload for [`AgentRegistry::update_state`]. `None` fields
/// are left untouched.
#[derive(Debug, Default, Clone)]
pub struct StateUpdate {
    pub status: Option<AgentStatus>,
    pub current_tasks: Option<Vec<String>>,
    pub metrics: Option<BTreeMap<String, f64>>,
    pub resources: Option<BTreeMap<String, f64>>,
}

pub struct AgentRegistry {
    ledger: Arc<Ledger>,
    agents: Mutex<HashMap<String, AgentState>>,
}

impl AgentRegistry {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent registration. Creates state if missing and reactivates a
    /// previously unregistered agent.
    pub fn register(&self, agent_id: &str, capabilities: Vec<String>) -> MeshResult<bool> {
        if agent_id.is_empty() {
            return Err(MeshError::InvalidState("empty agent_id".to_string()));
        }
        let caps: BTreeSet<String> = capabilities.into_iter().collect();
        let newly = {
            let mut agents = self.agents.lock().expect("registry lock poisoned");
            match agents.get_mut(agent_id) {
                Some(state) if state.status == AgentStatus::Unregistered => {
                    state.status = AgentStatus::Registered;
                    state.capabilities = caps;
                    state.last_updated = time::now_rfc3339();
                    true
                }
                Some(_) => false,
                None => {
                    agents.insert(agent_id.to_string(), AgentState::new(agent_id, caps));
                    true
                }
            }
        };
        if newly {
            self.ledger.append_json(
                "agent_registered",
                agent_id,
                serde_json::json!({"agent_id": agent_id}),
            )?;
        }
        Ok(true)
    }

    /// Terminal unregistration. The state record is retained for inspection.
    pub fn unregister(&self, agent_id: &str) -> MeshResult<bool> {
        let found = {
            let mut agents = self.agents.lock().expect("registry lock poisoned");
            match agents.get_mut(agent_id) {
                Some(state) => {
                    state.status = AgentStatus::Unregistered;
                    state.last_updated = time::now_rfc3339();
                    true
                }
                None => false,
            }
        };
        if found {
            self.ledger.append_json(
                "agent_unregistered",
                agent_id,
                serde_json::json!({"agent_id": agent_id}),
            )?;
        }
        Ok(found)
    }

    /// Partial state update; rejected for unknown agents.
    pub fn update_state(&self, agent_id: &str, update: StateUpdate) -> MeshResult<bool> {
        let mut agents = self.agents.lock().expect("registry lock poisoned");
        let Some(state) = agents.get_mut(agent_id) else {
            return Ok(false);
        };
        if let Some(status) = update.status {
            state.status = status;
        }
        if let Some(tasks) = update.current_tasks {
            state.current_tasks = tasks;
        }
        if let Some(metrics) = update.metrics {
            state.metrics.extend(metrics);
        }
        if let Some(resources) = update.resources {
            state.resources.extend(resources);
        }
        state.last_updated = time::now_rfc3339();
        Ok(true)
    }

    /// Snapshot copy of an agent's state.
    pub fn get_state(&self, agent_id: &str) -> Option<AgentState> {
        self.agents
            .lock()
            .expect("registry lock poisoned")
            .get(agent_id)
            .cloned()
    }

    /// True for agents in any non-terminal status.
    pub fn is_active(&self, agent_id: &str) -> bool {
        self.agents
            .lock()
            .expect("registry lock poisoned")
            .get(agent_id)
            .map(|s| s.status != AgentStatus::Unregistered)
            .unwrap_or(false)
    }

    pub fn list(&self) -> Vec<AgentState> {
        let mut all: Vec<AgentState> = self
            .agents
            .lock()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    /// Ids of all agents eligible for delivery.
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .agents
            .lock()
            .expect("registry lock poisoned")
            .values()
            .filter(|s| s.status != AgentStatus::Unregistered)
            .map(|s| s.agent_id.clone())
            .collect();
        ids.sort();
        ids
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "agent",
        "version": "0.1.0",
        "description": "Agent registration and state tracking",
        "commands": [
            { "name": "register", "parameters": ["agent_id", "capabilities"] },
            { "name": "unregister", "parameters": ["agent_id"] },
            { "name": "state", "parameters": ["agent_id"] },
            { "name": "list", "parameters": [] }
        ],
        "events": ["agent_registered", "agent_unregistered"],
        "storage": ["ledger_main.jsonl"]
    })
}
