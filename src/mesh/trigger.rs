//! Trigger core: named, resource-budgeted operations with registered
//! handlers, expiring seals, and multi-verification activation.
//!
//! Lifecycle: registered -> sealed? -> activating -> completed | failed.
//! Seals are optional for standard triggers and mandatory for criticals;
//! critical activation additionally requires `verify_count` independent
//! verifications.

use crate::core::canon::{canonical_sha256, canonical_sha256_without};
use crate::core::error::{MeshError, MeshResult};
use crate::core::ledger::Ledger;
use crate::core::seal::AlphaCeiling;
use crate::core::store::Store;
use crate::core::time;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

pub const DEFAULT_SEAL_TTL_SECONDS: i64 = 300;
pub const DEFAULT_MIN_VERIFY_COUNT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Standard,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDescriptor {
    pub trigger_id: String,
    pub description: String,
    pub resource_requirement: i64,
    pub kind: TriggerKind,
    pub fingerprint: String,
    pub activations: u64,
    pub last_activation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSeal {
    pub trigger_id: String,
    pub fingerprint: String,
    pub context: Value,
    pub ts: String,
    pub epoch: i64,
    pub expires_epoch: i64,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerOutcome {
    pub index: usize,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
    pub activation_id: String,
    pub trigger_id: String,
    pub epoch: i64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub handler_results: Vec<HandlerOutcome>,
    pub context: Value,
}

type TriggerHandler = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

pub struct TriggerCore {
    store: Store,
    ledger: Arc<Ledger>,
    ceiling: AlphaCeiling,
    triggers: Mutex<BTreeMap<String, TriggerDescriptor>>,
    handlers: Mutex<HashMap<String, Vec<TriggerHandler>>>,
    min_verify_count: u32,
}

impl TriggerCore {
    /// Open the trigger core, loading any persisted catalog.
    pub fn open(store: Store, ledger: Arc<Ledger>, ceiling: AlphaCeiling) -> MeshResult<Self> {
        let catalog_path = store.triggers_path();
        let triggers = if catalog_path.exists() {
            let bytes = fs::read(&catalog_path)?;
            serde_json::from_slice(&bytes)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            store,
            ledger,
            ceiling,
            triggers: Mutex::new(triggers),
            handlers: Mutex::new(HashMap::new()),
            min_verify_count: DEFAULT_MIN_VERIFY_COUNT,
        })
    }

    fn persist_catalog(&self, triggers: &BTreeMap<String, TriggerDescriptor>) -> MeshResult<()> {
        let bytes = serde_json::to_vec_pretty(triggers)?;
        self.store
            .write_atomic(&self.store.triggers_path(), &bytes)
    }

    /// Register a trigger. Duplicate ids return the existing descriptor
    /// unchanged. The resource requirement passes through Alpha Ceiling
    /// enforcement before being stored.
    pub fn register(
        &self,
        trigger_id: &str,
        description: &str,
        resource_requirement: i64,
        kind: TriggerKind,
    ) -> MeshResult<TriggerDescriptor> {
        {
            let triggers = self.triggers.lock().expect("trigger lock poisoned");
            if let Some(existing) = triggers.get(trigger_id) {
                return Ok(existing.clone());
            }
        }
        let resource = self
            .ceiling
            .enforce(&self.ledger, resource_requirement, None)?;
        let epoch = time::now_epoch();
        let fingerprint = canonical_sha256(&serde_json::json!({
            "trigger_id": trigger_id,
            "description": description,
            "resource_requirement": resource,
            "kind": kind,
            "epoch": epoch,
        }));
        let descriptor = TriggerDescriptor {
            trigger_id: trigger_id.to_string(),
            description: description.to_string(),
            resource_requirement: resource,
            kind,
            fingerprint,
            activations: 0,
            last_activation: None,
        };
        let snapshot = {
            let mut triggers = self.triggers.lock().expect("trigger lock poisoned");
            triggers.insert(trigger_id.to_string(), descriptor.clone());
            triggers.clone()
        };
        self.persist_catalog(&snapshot)?;
        self.ledger.append_json(
            "trigger_registered",
            trigger_id,
            serde_json::json!({
                "trigger_id": trigger_id,
                "resource_requirement": resource,
                "fingerprint": descriptor.fingerprint,
            }),
        )?;
        Ok(descriptor)
    }

    /// Attach a handler; invocation order is registration order.
    pub fn register_handler<F>(&self, trigger_id: &str, handler: F) -> MeshResult<()>
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        let known = self
            .triggers
            .lock()
            .expect("trigger lock poisoned")
            .contains_key(trigger_id);
        if !known {
            return Err(MeshError::NotFound(format!("trigger {}", trigger_id)));
        }
        self.handlers
            .lock()
            .expect("handler lock poisoned")
            .entry(trigger_id.to_string())
            .or_default()
            .push(Arc::new(handler));
        Ok(())
    }

    /// Build, hash, and persist a seal for a trigger. Default expiry is 300
    /// seconds from now.
    pub fn create_seal(&self, trigger_id: &str, context: Value) -> MeshResult<TriggerSeal> {
        let fingerprint = {
            let triggers = self.triggers.lock().expect("trigger lock poisoned");
            triggers
                .get(trigger_id)
                .map(|d| d.fingerprint.clone())
                .ok_or_else(|| MeshError::NotFound(format!("trigger {}", trigger_id)))?
        };
        let epoch = time::now_epoch();
        let mut seal = TriggerSeal {
            trigger_id: trigger_id.to_string(),
            fingerprint,
            context,
            ts: time::now_rfc3339(),
            epoch,
            expires_epoch: epoch + DEFAULT_SEAL_TTL_SECONDS,
            hash: String::new(),
        };
        let value = serde_json::to_value(&seal)?;
        seal.hash = canonical_sha256_without(&value, "hash");

        let path = self
            .store
            .seals_dir()
            .join(format!("trigger_{}_{}.json", trigger_id, epoch));
        fs::write(&path, serde_json::to_vec_pretty(&seal)?)?;
        Ok(seal)
    }

    /// A seal is valid iff the trigger exists, the fingerprint matches the
    /// current descriptor, it has not expired, and its hash recomputes.
    pub fn verify_seal(&self, seal: &TriggerSeal) -> MeshResult<bool> {
        let fingerprint = {
            let triggers = self.triggers.lock().expect("trigger lock poisoned");
            match triggers.get(&seal.trigger_id) {
                Some(d) => d.fingerprint.clone(),
                None => return Ok(false),
            }
        };
        if seal.fingerprint != fingerprint {
            return Ok(false);
        }
        if time::now_epoch() >= seal.expires_epoch {
            return Ok(false);
        }
        let value = serde_json::to_value(seal)?;
        Ok(canonical_sha256_without(&value, "hash") == seal.hash)
    }

    /// Activate a trigger. Critical triggers must present a valid seal and
    /// a `verify_count` meeting the minimum; rejected activations fail
    /// without invoking any handler and leave a single rejection event in
    /// the ledger.
    pub fn activate(
        &self,
        trigger_id: &str,
        context: Value,
        verify_count: u32,
        seal: Option<&TriggerSeal>,
    ) -> MeshResult<Activation> {
        let descriptor = {
            let triggers = self.triggers.lock().expect("trigger lock poisoned");
            triggers
                .get(trigger_id)
                .cloned()
                .ok_or_else(|| MeshError::NotFound(format!("trigger {}", trigger_id)))?
        };
        let epoch = time::now_epoch();
        let activation_id = time::new_event_id();

        if descriptor.kind == TriggerKind::Critical {
            let seal_ok = match seal {
                Some(s) => s.trigger_id == trigger_id && self.verify_seal(s)?,
                None => false,
            };
            if !seal_ok {
                return self.reject(
                    trigger_id,
                    activation_id,
                    epoch,
                    context,
                    "seal_invalid",
                    serde_json::json!({"sealed": seal.is_some()}),
                );
            }
            if verify_count < self.min_verify_count {
                return self.reject(
                    trigger_id,
                    activation_id,
                    epoch,
                    context,
                    "insufficient_verification",
                    serde_json::json!({
                        "verify_count": verify_count,
                        "required": self.min_verify_count,
                    }),
                );
            }
        }

        self.ledger.append_json(
            "trigger_accepted",
            trigger_id,
            serde_json::json!({
                "trigger_id": trigger_id,
                "activation_id": activation_id,
                "verify_count": verify_count,
            }),
        )?;

        let handlers: Vec<TriggerHandler> = {
            let map = self.handlers.lock().expect("handler lock poisoned");
            map.get(trigger_id).cloned().unwrap_or_default()
        };
        let mut results = Vec::with_capacity(handlers.len());
        for (index, handler) in handlers.iter().enumerate() {
            let outcome = match catch_unwind(AssertUnwindSafe(|| handler(&context))) {
                Ok(Ok(value)) => HandlerOutcome {
                    index,
                    ok: true,
                    detail: value.to_string(),
                },
                Ok(Err(detail)) => HandlerOutcome {
                    index,
                    ok: false,
                    detail,
                },
                Err(_) => HandlerOutcome {
                    index,
                    ok: false,
                    detail: "handler panicked".to_string(),
                },
            };
            self.ledger.append_json(
                if outcome.ok {
                    "trigger_handler_ok"
                } else {
                    "handler_error"
                },
                trigger_id,
                serde_json::json!({
                    "trigger_id": trigger_id,
                    "activation_id": activation_id,
                    "handler_index": index,
                    "detail": outcome.detail,
                }),
            )?;
            results.push(outcome);
        }

        let activation = Activation {
            activation_id: activation_id.clone(),
            trigger_id: trigger_id.to_string(),
            epoch,
            status: "completed".to_string(),
            error: None,
            handler_results: results,
            context,
        };

        let record_path = self
            .store
            .activations_dir()
            .join(format!("{}_{}.json", trigger_id, epoch));
        fs::write(&record_path, serde_json::to_vec_pretty(&activation)?)?;

        let snapshot = {
            let mut triggers = self.triggers.lock().expect("trigger lock poisoned");
            if let Some(d) = triggers.get_mut(trigger_id) {
                d.activations += 1;
                d.last_activation = Some(time::now_rfc3339());
            }
            triggers.clone()
        };
        self.persist_catalog(&snapshot)?;
        Ok(activation)
    }

    fn reject(
        &self,
        trigger_id: &str,
        activation_id: String,
        epoch: i64,
        context: Value,
        error: &str,
        detail: Value,
    ) -> MeshResult<Activation> {
        let mut record = serde_json::json!({
            "trigger_id": trigger_id,
            "activation_id": activation_id,
            "error": error,
        });
        if let (Some(obj), Some(extra)) = (record.as_object_mut(), detail.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        self.ledger
            .append_json("trigger_rejected", trigger_id, record)?;
        Ok(Activation {
            activation_id,
            trigger_id: trigger_id.to_string(),
            epoch,
            status: "failed".to_string(),
            error: Some(error.to_string()),
            handler_results: Vec::new(),
            context,
        })
    }

    pub fn get(&self, trigger_id: &str) -> Option<TriggerDescriptor> {
        self.triggers
            .lock()
            .expect("trigger lock poisoned")
            .get(trigger_id)
            .cloned()
    }

    pub fn list(&self) -> Vec<TriggerDescriptor> {
        self.triggers
            .lock()
            .expect("trigger lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "trigger",
        "version": "0.1.0",
        "description": "Named triggers with seals and multi-verification activation",
        "commands": [
            { "name": "register", "parameters": ["trigger_id", "description", "resource", "kind"] },
            { "name": "seal", "parameters": ["trigger_id", "context"] },
            { "name": "activate", "parameters": ["trigger_id", "context", "verify_count"] },
            { "name": "list", "parameters": [] }
        ],
        "events": [
            "trigger_registered", "trigger_accepted", "trigger_rejected",
            "trigger_handler_ok", "handler_error"
        ],
        "storage": [
            "mesh_triggers.json",
            "seals/trigger_<id>_<epoch>.json",
            "activations/<trigger>_<epoch>.json"
        ]
    })
}
