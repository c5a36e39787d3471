//! Per-agent priority message queues with handler dispatch.
//!
//! Ordering within a queue is by decreasing priority, ties broken by
//! insertion order. Queues are bounded; overflow rejects the newest message.
//! Handlers are invoked outside the queue lock and must not assume they hold
//! it.

use crate::core::error::{MeshError, MeshResult};
use crate::core::ledger::Ledger;
use crate::core::time;
use crate::mesh::registry::AgentRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_TTL_SECONDS: i64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub msg_type: String,
    pub content: Value,
    pub ts: String,
    pub priority: i32,
    pub ttl_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub is_acknowledged: bool,
}

impl Message {
    pub fn new(sender_id: &str, receiver_id: &str, msg_type: &str, content: Value) -> Self {
        Self {
            message_id: time::new_uuid(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            msg_type: msg_type.to_string(),
            content,
            ts: time::now_rfc3339(),
            priority: 5,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            thread_id: None,
            parent_id: None,
            is_acknowledged: false,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl(mut self, ttl_seconds: i64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }
}

struct QueuedMessage {
    msg: Message,
    seq: u64,
    enqueued_at: i64,
}

impl QueuedMessage {
    // A zero or negative TTL means the message is already expired.
    fn expired(&self, now: i64) -> bool {
        now >= self.enqueued_at + self.msg.ttl_seconds
    }
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.msg.priority == other.msg.priority && self.seq == other.seq
    }
}
impl Eq for QueuedMessage {}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence (FIFO).
        self.msg
            .priority
            .cmp(&other.msg.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type Handler = Arc<dyn Fn(&Message) -> Result<(), String> + Send + Sync>;

struct BusState {
    queues: HashMap<String, BinaryHeap<QueuedMessage>>,
    seq: u64,
}

pub struct MessageBus {
    registry: Arc<AgentRegistry>,
    ledger: Arc<Ledger>,
    state: Mutex<BusState>,
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
    capacity: usize,
}

impl MessageBus {
    pub fn new(registry: Arc<AgentRegistry>, ledger: Arc<Ledger>) -> Self {
        Self::with_capacity(registry, ledger, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(
        registry: Arc<AgentRegistry>,
        ledger: Arc<Ledger>,
        capacity: usize,
    ) -> Self {
        Self {
            registry,
            ledger,
            state: Mutex::new(BusState {
                queues: HashMap::new(),
                seq: 0,
            }),
            handlers: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Enqueue for a known, active receiver. Fails fast on unknown receivers
    /// and on queue overflow.
    pub fn send(&self, msg: Message) -> MeshResult<()> {
        if !self.registry.is_active(&msg.receiver_id) {
            return Err(MeshError::NotFound(format!(
                "receiver {} is not a registered agent",
                msg.receiver_id
            )));
        }
        let mut state = self.state.lock().expect("bus lock poisoned");
        let queue = state
            .queues
            .entry(msg.receiver_id.clone())
            .or_insert_with(BinaryHeap::new);
        if queue.len() >= self.capacity {
            return Err(MeshError::Capacity(format!(
                "queue for {} is full ({} messages)",
                msg.receiver_id, self.capacity
            )));
        }
        let seq = state.seq;
        state.seq += 1;
        state
            .queues
            .get_mut(&msg.receiver_id)
            .expect("queue just inserted")
            .push(QueuedMessage {
                msg,
                seq,
                enqueued_at: time::now_epoch(),
            });
        Ok(())
    }

    /// Remove up to `max_count` messages in priority order, dropping any
    /// whose TTL has expired. Non-blocking.
    pub fn poll(&self, agent_id: &str, max_count: usize) -> MeshResult<Vec<Message>> {
        let mut state = self.state.lock().expect("bus lock poisoned");
        let Some(queue) = state.queues.get_mut(agent_id) else {
            return Ok(Vec::new());
        };
        let now = time::now_epoch();
        let mut out = Vec::new();
        while out.len() < max_count {
            match queue.pop() {
                Some(qm) if qm.expired(now) => continue,
                Some(qm) => out.push(qm.msg),
                None => break,
            }
        }
        Ok(out)
    }

    /// Fan out to every active agent except the sender and `exclude`.
    /// Returns `Ok(false)` on partial failure; prior deliveries stand.
    pub fn broadcast(
        &self,
        sender_id: &str,
        msg_type: &str,
        content: Value,
        exclude: &[String],
    ) -> MeshResult<bool> {
        let mut all_ok = true;
        for agent_id in self.registry.active_ids() {
            if agent_id == sender_id || exclude.contains(&agent_id) {
                continue;
            }
            let msg = Message::new(sender_id, &agent_id, msg_type, content.clone());
            if self.send(msg).is_err() {
                all_ok = false;
            }
        }
        Ok(all_ok)
    }

    /// Register a handler for a message type. Handlers run in registration
    /// order from `process` on the caller's thread.
    pub fn register_handler<F>(&self, msg_type: &str, handler: F)
    where
        F: Fn(&Message) -> Result<(), String> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .expect("handler lock poisoned")
            .entry(msg_type.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Dispatch a message to its type's handlers. A failing handler is
    /// recorded as a `handler_error` ledger event and does not abort the
    /// remaining handlers.
    pub fn process(&self, msg: &Message) -> MeshResult<usize> {
        let handlers: Vec<Handler> = {
            let map = self.handlers.lock().expect("handler lock poisoned");
            map.get(&msg.msg_type).cloned().unwrap_or_default()
        };
        let mut invoked = 0;
        for handler in handlers {
            match handler(msg) {
                Ok(()) => invoked += 1,
                Err(detail) => {
                    self.ledger.append_json(
                        "handler_error",
                        &msg.msg_type,
                        serde_json::json!({
                            "message_id": msg.message_id,
                            "error": detail,
                        }),
                    )?;
                }
            }
        }
        Ok(invoked)
    }

    /// Queue depth for an agent, expired messages included.
    pub fn queue_len(&self, agent_id: &str) -> usize {
        self.state
            .lock()
            .expect("bus lock poisoned")
            .queues
            .get(agent_id)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "msg",
        "version": "0.1.0",
        "description": "Per-agent priority message queues",
        "commands": [
            { "name": "send", "parameters": ["sender", "receiver", "type", "content", "priority"] },
            { "name": "broadcast", "parameters": ["sender", "type", "content"] },
            { "name": "poll", "parameters": ["agent_id", "max"] }
        ],
        "events": ["handler_error"],
        "storage": ["in-memory queues; ledger_main.jsonl for handler errors"]
    })
}
