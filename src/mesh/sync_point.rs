//! Sync points: a named barrier over a fixed set of registered agents.
//!
//! Completion is irreversible. After the timeout elapses without completion
//! the sync point becomes terminal `timed_out` and late readiness has no
//! effect. `wait` is the only blocking call in the mesh; correctness relies
//! on re-checking state after every wakeup.

use crate::core::error::{MeshError, MeshResult};
use crate::core::ledger::Ledger;
use crate::core::time;
use crate::mesh::bus::{Message, MessageBus};
use crate::mesh::registry::AgentRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

pub const SYNC_MESSAGE_PRIORITY: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Complete,
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPoint {
    pub sync_id: String,
    pub name: String,
    pub participants: BTreeSet<String>,
    pub ready: BTreeSet<String>,
    pub status: SyncStatus,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub timeout_seconds: u64,
}

impl SyncPoint {
    pub fn is_complete(&self) -> bool {
        self.status == SyncStatus::Complete
    }

    fn deadline_passed(&self, now: i64) -> bool {
        now >= self.created_at + self.timeout_seconds as i64
    }
}

pub struct SyncCoordinator {
    registry: Arc<AgentRegistry>,
    bus: Arc<MessageBus>,
    ledger: Arc<Ledger>,
    points: Mutex<HashMap<String, SyncPoint>>,
    completion: Condvar,
}

impl SyncCoordinator {
    pub fn new(registry: Arc<AgentRegistry>, bus: Arc<MessageBus>, ledger: Arc<Ledger>) -> Self {
        Self {
            registry,
            bus,
            ledger,
            points: Mutex::new(HashMap::new()),
            completion: Condvar::new(),
        }
    }

    /// Create a barrier over `participants`; all must be registered. Each
    /// participant receives a `sync_request` message at priority 10.
    pub fn create(
        &self,
        name: &str,
        participants: &[String],
        timeout_seconds: u64,
    ) -> MeshResult<String> {
        if participants.is_empty() {
            return Err(MeshError::InvalidState(
                "sync point needs at least one participant".to_string(),
            ));
        }
        for p in participants {
            if !self.registry.is_active(p) {
                return Err(MeshError::NotFound(format!(
                    "participant {} is not a registered agent",
                    p
                )));
            }
        }
        let sync_id = time::new_uuid();
        let point = SyncPoint {
            sync_id: sync_id.clone(),
            name: name.to_string(),
            participants: participants.iter().cloned().collect(),
            ready: BTreeSet::new(),
            status: SyncStatus::Pending,
            created_at: time::now_epoch(),
            completed_at: None,
            timeout_seconds,
        };
        self.points
            .lock()
            .expect("sync lock poisoned")
            .insert(sync_id.clone(), point);

        // Fan out outside the points lock; the bus takes its own.
        for p in participants {
            let msg = Message::new(
                "sync-coordinator",
                p,
                "sync_request",
                serde_json::json!({"sync_id": sync_id, "name": name}),
            )
            .with_priority(SYNC_MESSAGE_PRIORITY);
            self.bus.send(msg)?;
        }
        self.ledger.append_json(
            "sync_created",
            name,
            serde_json::json!({"sync_id": sync_id, "participants": participants}),
        )?;
        Ok(sync_id)
    }

    /// Record a participant's readiness. Completes the barrier atomically
    /// when the last participant arrives. Late calls after timeout return
    /// `Ok(false)` and change nothing.
    pub fn mark_ready(&self, sync_id: &str, agent_id: &str) -> MeshResult<bool> {
        let (completed, participants, name) = {
            let mut points = self.points.lock().expect("sync lock poisoned");
            let Some(point) = points.get_mut(sync_id) else {
                return Err(MeshError::NotFound(format!("sync point {}", sync_id)));
            };
            match point.status {
                SyncStatus::Complete => return Ok(true),
                SyncStatus::TimedOut => return Ok(false),
                SyncStatus::Pending => {}
            }
            if point.deadline_passed(time::now_epoch()) {
                point.status = SyncStatus::TimedOut;
                self.completion.notify_all();
                return Ok(false);
            }
            if !point.participants.contains(agent_id) {
                return Err(MeshError::InvalidState(format!(
                    "{} is not a participant of {}",
                    agent_id, sync_id
                )));
            }
            point.ready.insert(agent_id.to_string());
            if point.ready != point.participants {
                return Ok(true);
            }
            point.status = SyncStatus::Complete;
            point.completed_at = Some(time::now_epoch());
            self.completion.notify_all();
            (
                true,
                point.participants.iter().cloned().collect::<Vec<_>>(),
                point.name.clone(),
            )
        };
        if completed {
            for p in &participants {
                let msg = Message::new(
                    "sync-coordinator",
                    p,
                    "sync_complete",
                    serde_json::json!({"sync_id": sync_id, "name": name}),
                )
                .with_priority(SYNC_MESSAGE_PRIORITY);
                // Delivery failure to one participant does not undo the
                // barrier completion.
                let _ = self.bus.send(msg);
            }
            self.ledger.append_json(
                "sync_complete",
                &name,
                serde_json::json!({"sync_id": sync_id}),
            )?;
        }
        Ok(true)
    }

    /// Block until the barrier completes, the caller's timeout elapses, or
    /// the sync point itself times out, whichever is earliest.
    pub fn wait(&self, sync_id: &str, timeout: Option<Duration>) -> MeshResult<bool> {
        let started = Instant::now();
        let mut points = self.points.lock().expect("sync lock poisoned");
        loop {
            let Some(point) = points.get_mut(sync_id) else {
                return Err(MeshError::NotFound(format!("sync point {}", sync_id)));
            };
            match point.status {
                SyncStatus::Complete => return Ok(true),
                SyncStatus::TimedOut => return Ok(false),
                SyncStatus::Pending => {}
            }
            if point.deadline_passed(time::now_epoch()) {
                point.status = SyncStatus::TimedOut;
                self.completion.notify_all();
                return Ok(false);
            }
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Ok(false);
                }
            }
            // Short slices so both deadlines are re-checked; spurious
            // wakeups are harmless under the re-check loop.
            let (guard, _timeout_result) = self
                .completion
                .wait_timeout(points, Duration::from_millis(50))
                .expect("sync lock poisoned");
            points = guard;
        }
    }

    pub fn get(&self, sync_id: &str) -> Option<SyncPoint> {
        self.points
            .lock()
            .expect("sync lock poisoned")
            .get(sync_id)
            .cloned()
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "sync",
        "version": "0.1.0",
        "description": "Barrier primitive over named agent sets",
        "commands": [
            { "name": "create", "parameters": ["name", "participants", "timeout"] },
            { "name": "ready", "parameters": ["sync_id", "agent_id"] },
            { "name": "wait", "parameters": ["sync_id", "timeout"] }
        ],
        "events": ["sync_created", "sync_complete"],
        "storage": ["in-memory; ledger_main.jsonl for lifecycle events"]
    })
}
