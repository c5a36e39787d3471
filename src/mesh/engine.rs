//! Cooperative engine scheduler.
//!
//! Engines declare a main interval (in weeks) and a pre-interval fraction;
//! the scheduler runs every due pre-action before the engine's main action,
//! walking engines in registration order on a single thread. Every action
//! invocation is appended to `engine_actions.jsonl` as a flat JSONL record.
//! Engine panics are contained; an engine that fails three consecutive
//! actions is parked until the health monitor restarts it.

use crate::core::error::{MeshError, MeshResult};
use crate::core::store::Store;
use crate::core::time;
use serde::Serialize;
use serde_json::{json, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const SECONDS_PER_WEEK: f64 = 604_800.0;
const MAX_SLEEP_SECONDS: u64 = 60;
const CONSECUTIVE_ERROR_LIMIT: u32 = 3;

/// A scheduled unit of recurring work.
pub trait Engine: Send {
    fn name(&self) -> &str;

    /// Main-action period in weeks.
    fn main_interval_weeks(&self) -> f64 {
        1.0
    }

    /// Pre-action period as a fraction of the main interval.
    fn pre_interval_fraction(&self) -> f64 {
        0.25
    }

    fn pre_action(&mut self) -> Result<Value, String>;

    fn main_action(&mut self) -> Result<Value, String>;

    fn status(&self) -> Value {
        json!({})
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub engine: String,
    pub action_type: String,
    pub started_at: String,
    pub ended_at: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct EngineSlot {
    engine: Box<dyn Engine>,
    running: bool,
    /// Operator hold via `stop`; the health monitor never overrides it.
    held: bool,
    next_pre: i64,
    next_main: i64,
    executions: u64,
    errors: u64,
    // Tracked per action type so a healthy pre-action cannot mask a main
    // action that fails on every wake.
    consecutive_pre_errors: u32,
    consecutive_main_errors: u32,
    restarts: u64,
}

impl EngineSlot {
    fn pre_interval_secs(&self) -> i64 {
        let secs =
            self.engine.main_interval_weeks() * SECONDS_PER_WEEK * self.engine.pre_interval_fraction();
        (secs.max(1.0)) as i64
    }

    fn main_interval_secs(&self) -> i64 {
        let secs = self.engine.main_interval_weeks() * SECONDS_PER_WEEK;
        (secs.max(1.0)) as i64
    }
}

/// Snapshot of one engine's scheduling state.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub name: String,
    pub running: bool,
    pub held: bool,
    pub next_pre: i64,
    pub next_main: i64,
    pub executions: u64,
    pub errors: u64,
    pub restarts: u64,
    pub detail: Value,
}

pub struct EngineScheduler {
    store: Store,
    slots: Mutex<Vec<EngineSlot>>,
    stop_flag: AtomicBool,
    // Clock seam so interval arithmetic is testable without sleeping.
    clock: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl EngineScheduler {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            slots: Mutex::new(Vec::new()),
            stop_flag: AtomicBool::new(false),
            clock: Box::new(time::now_epoch),
        }
    }

    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Register an engine. First pre and main actions are due immediately.
    pub fn register(&self, engine: Box<dyn Engine>) -> MeshResult<()> {
        let name = engine.name().to_string();
        let mut slots = self.slots.lock().expect("scheduler lock poisoned");
        if slots.iter().any(|s| s.engine.name() == name) {
            return Err(MeshError::InvalidState(format!(
                "engine {} already registered",
                name
            )));
        }
        let now = self.now();
        slots.push(EngineSlot {
            engine,
            running: true,
            held: false,
            next_pre: now,
            next_main: now,
            executions: 0,
            errors: 0,
            consecutive_pre_errors: 0,
            consecutive_main_errors: 0,
            restarts: 0,
        });
        Ok(())
    }

    /// Run every due action once. Per engine, a due pre-action always runs
    /// before a due main action. Returns the number of actions invoked.
    pub fn run_pending(&self) -> MeshResult<usize> {
        let now = self.now();
        let mut invoked = 0;
        let mut slots = self.slots.lock().expect("scheduler lock poisoned");
        for slot in slots.iter_mut() {
            if !slot.running {
                continue;
            }
            if now >= slot.next_pre {
                self.invoke(slot, "pre")?;
                slot.next_pre = now + slot.pre_interval_secs();
                invoked += 1;
            }
            if slot.running && now >= slot.next_main {
                self.invoke(slot, "main")?;
                slot.next_main = now + slot.main_interval_secs();
                invoked += 1;
            }
        }
        Ok(invoked)
    }

    /// Force one main action on every running engine, regardless of
    /// schedule. The next main due time is pushed out; pre schedules are
    /// untouched.
    pub fn run_all(&self) -> MeshResult<usize> {
        let now = self.now();
        let mut invoked = 0;
        let mut slots = self.slots.lock().expect("scheduler lock poisoned");
        for slot in slots.iter_mut() {
            if !slot.running {
                continue;
            }
            self.invoke(slot, "main")?;
            slot.next_main = now + slot.main_interval_secs();
            invoked += 1;
        }
        Ok(invoked)
    }

    fn invoke(&self, slot: &mut EngineSlot, action_type: &str) -> MeshResult<()> {
        let started_at = time::now_rfc3339();
        let outcome = catch_unwind(AssertUnwindSafe(|| match action_type {
            "pre" => slot.engine.pre_action(),
            _ => slot.engine.main_action(),
        }));
        let ended_at = time::now_rfc3339();
        let outcome = match outcome {
            Ok(result) => result,
            Err(_) => Err("panic in engine action".to_string()),
        };

        slot.executions += 1;
        let record = match outcome {
            Ok(result) => {
                if action_type == "pre" {
                    slot.consecutive_pre_errors = 0;
                } else {
                    slot.consecutive_main_errors = 0;
                }
                ActionRecord {
                    engine: slot.engine.name().to_string(),
                    action_type: action_type.to_string(),
                    started_at,
                    ended_at,
                    status: "ok".to_string(),
                    result: Some(result),
                    error: None,
                }
            }
            Err(error) => {
                slot.errors += 1;
                let streak = if action_type == "pre" {
                    &mut slot.consecutive_pre_errors
                } else {
                    &mut slot.consecutive_main_errors
                };
                *streak += 1;
                if *streak >= CONSECUTIVE_ERROR_LIMIT {
                    slot.running = false;
                }
                ActionRecord {
                    engine: slot.engine.name().to_string(),
                    action_type: action_type.to_string(),
                    started_at,
                    ended_at,
                    status: "error".to_string(),
                    result: None,
                    error: Some(error),
                }
            }
        };
        self.append_action(&record)
    }

    fn append_action(&self, record: &ActionRecord) -> MeshResult<()> {
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.store.engine_actions_path())?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Restart engines that parked themselves after repeated errors. Held
    /// engines stay down. Appends a `health_monitor` action record with the
    /// per-engine scores.
    pub fn health_check(&self) -> MeshResult<Value> {
        let started_at = time::now_rfc3339();
        let mut scores = Vec::new();
        let mut restarted = Vec::new();
        {
            let mut slots = self.slots.lock().expect("scheduler lock poisoned");
            for slot in slots.iter_mut() {
                let score = if slot.executions == 0 {
                    1.0
                } else {
                    (slot.executions - slot.errors) as f64 / slot.executions as f64
                };
                if !slot.running && !slot.held {
                    slot.running = true;
                    slot.consecutive_pre_errors = 0;
                    slot.consecutive_main_errors = 0;
                    slot.restarts += 1;
                    restarted.push(slot.engine.name().to_string());
                }
                scores.push(json!({
                    "engine": slot.engine.name(),
                    "score": score,
                    "error_rate": 1.0 - score,
                    "execution_count": slot.executions,
                    "running": slot.running,
                }));
            }
        }
        let report = json!({"scores": scores, "restarted": restarted});
        self.append_action(&ActionRecord {
            engine: "scheduler".to_string(),
            action_type: "health_monitor".to_string(),
            started_at,
            ended_at: time::now_rfc3339(),
            status: "ok".to_string(),
            result: Some(report.clone()),
            error: None,
        })?;
        Ok(report)
    }

    /// Operator hold. The health monitor will not restart a stopped engine.
    pub fn stop(&self, name: &str) -> MeshResult<()> {
        self.set_running(name, false)
    }

    pub fn start(&self, name: &str) -> MeshResult<()> {
        self.set_running(name, true)
    }

    fn set_running(&self, name: &str, running: bool) -> MeshResult<()> {
        let mut slots = self.slots.lock().expect("scheduler lock poisoned");
        let Some(slot) = slots.iter_mut().find(|s| s.engine.name() == name) else {
            return Err(MeshError::NotFound(format!("engine {}", name)));
        };
        slot.running = running;
        slot.held = !running;
        if running {
            slot.consecutive_pre_errors = 0;
            slot.consecutive_main_errors = 0;
        }
        Ok(())
    }

    pub fn statuses(&self) -> Vec<EngineStatus> {
        let slots = self.slots.lock().expect("scheduler lock poisoned");
        slots
            .iter()
            .map(|slot| EngineStatus {
                name: slot.engine.name().to_string(),
                running: slot.running,
                held: slot.held,
                next_pre: slot.next_pre,
                next_main: slot.next_main,
                executions: slot.executions,
                errors: slot.errors,
                restarts: slot.restarts,
                detail: slot.engine.status(),
            })
            .collect()
    }

    pub fn request_shutdown(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Blocking scheduler loop: run due actions, run the health monitor,
    /// sleep until the next due time (capped at 60s), repeat until shutdown.
    pub fn run_loop(&self) -> MeshResult<()> {
        while !self.stop_flag.load(Ordering::SeqCst) {
            self.run_pending()?;
            self.health_check()?;
            let now = self.now();
            let next_due = {
                let slots = self.slots.lock().expect("scheduler lock poisoned");
                slots
                    .iter()
                    .filter(|s| s.running)
                    .map(|s| s.next_pre.min(s.next_main))
                    .min()
            };
            let sleep_secs = match next_due {
                Some(due) if due > now => ((due - now) as u64).min(MAX_SLEEP_SECONDS),
                Some(_) => 0,
                None => MAX_SLEEP_SECONDS,
            };
            // Sleep in 1s slices so shutdown is responsive.
            for _ in 0..sleep_secs.max(1) {
                if self.stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                std::thread::sleep(Duration::from_secs(1));
            }
        }
        Ok(())
    }
}

/// Built-in engine that appends mesh track_event entries on each action.
/// Useful as a liveness beacon and as the default engine installed by
/// `init`.
pub struct RecordingEngine {
    name: String,
    ledger: std::sync::Arc<crate::core::ledger::Ledger>,
    pre_runs: u64,
    main_runs: u64,
}

impl RecordingEngine {
    pub fn new(name: &str, ledger: std::sync::Arc<crate::core::ledger::Ledger>) -> Self {
        Self {
            name: name.to_string(),
            ledger,
            pre_runs: 0,
            main_runs: 0,
        }
    }
}

impl Engine for RecordingEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn pre_action(&mut self) -> Result<Value, String> {
        self.pre_runs += 1;
        Ok(json!({"pre_runs": self.pre_runs}))
    }

    fn main_action(&mut self) -> Result<Value, String> {
        self.main_runs += 1;
        self.ledger
            .append_json(
                "track_event",
                &format!("{} heartbeat", self.name),
                json!({"engine": self.name, "main_runs": self.main_runs}),
            )
            .map_err(|e| e.to_string())?;
        Ok(json!({"main_runs": self.main_runs}))
    }

    fn status(&self) -> Value {
        json!({"pre_runs": self.pre_runs, "main_runs": self.main_runs})
    }
}

pub fn schema() -> serde_json::Value {
    json!({
        "name": "engine",
        "version": "0.1.0",
        "description": "Cooperative interval scheduler for recurring engines",
        "commands": [
            { "name": "run-pending", "parameters": [] },
            { "name": "run-all", "parameters": [] },
            { "name": "stop", "parameters": ["name"] },
            { "name": "start", "parameters": ["name"] },
            { "name": "status", "parameters": [] }
        ],
        "events": ["track_event"],
        "storage": ["engine_actions.jsonl"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;
    use std::sync::Arc;

    struct TestEngine {
        name: String,
        weeks: f64,
        log: Arc<Mutex<Vec<String>>>,
        fail_main: bool,
    }

    impl Engine for TestEngine {
        fn name(&self) -> &str {
            &self.name
        }
        fn main_interval_weeks(&self) -> f64 {
            self.weeks
        }
        fn pre_action(&mut self) -> Result<Value, String> {
            self.log.lock().unwrap().push(format!("{}:pre", self.name));
            Ok(json!({}))
        }
        fn main_action(&mut self) -> Result<Value, String> {
            self.log.lock().unwrap().push(format!("{}:main", self.name));
            if self.fail_main {
                Err("injected failure".to_string())
            } else {
                Ok(json!({}))
            }
        }
    }

    fn scheduler(clock: Arc<AtomicI64>) -> (tempfile::TempDir, EngineScheduler) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path());
        store.ensure_layout().unwrap();
        let sched = EngineScheduler::new(store)
            .with_clock(move || clock.load(Ordering::SeqCst));
        (tmp, sched)
    }

    fn engine(name: &str, log: &Arc<Mutex<Vec<String>>>, fail_main: bool) -> Box<TestEngine> {
        Box::new(TestEngine {
            name: name.to_string(),
            weeks: 1.0,
            log: Arc::clone(log),
            fail_main,
        })
    }

    #[test]
    fn test_pre_runs_before_main_in_registration_order() {
        let clock = Arc::new(AtomicI64::new(1_000));
        let (_tmp, sched) = scheduler(Arc::clone(&clock));
        let log = Arc::new(Mutex::new(Vec::new()));
        sched.register(engine("a", &log, false)).unwrap();
        sched.register(engine("b", &log, false)).unwrap();

        assert_eq!(sched.run_pending().unwrap(), 4);
        assert_eq!(
            log.lock().unwrap().as_slice(),
            ["a:pre", "a:main", "b:pre", "b:main"]
        );
    }

    #[test]
    fn test_intervals_respected() {
        let clock = Arc::new(AtomicI64::new(0));
        let (_tmp, sched) = scheduler(Arc::clone(&clock));
        let log = Arc::new(Mutex::new(Vec::new()));
        sched.register(engine("a", &log, false)).unwrap();

        sched.run_pending().unwrap();
        // Nothing due yet.
        assert_eq!(sched.run_pending().unwrap(), 0);

        // Quarter of a week later the pre-action is due, main is not.
        clock.store(604_800 / 4, Ordering::SeqCst);
        assert_eq!(sched.run_pending().unwrap(), 1);
        assert_eq!(log.lock().unwrap().last().unwrap(), "a:pre");

        clock.store(604_800, Ordering::SeqCst);
        assert_eq!(sched.run_pending().unwrap(), 2);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let clock = Arc::new(AtomicI64::new(0));
        let (_tmp, sched) = scheduler(clock);
        let log = Arc::new(Mutex::new(Vec::new()));
        sched.register(engine("a", &log, false)).unwrap();
        assert!(matches!(
            sched.register(engine("a", &log, false)),
            Err(MeshError::InvalidState(_))
        ));
    }

    #[test]
    fn test_failing_engine_parks_and_health_monitor_restarts() {
        let clock = Arc::new(AtomicI64::new(0));
        let (_tmp, sched) = scheduler(Arc::clone(&clock));
        let log = Arc::new(Mutex::new(Vec::new()));
        sched.register(engine("flaky", &log, true)).unwrap();

        for step in 0..4 {
            clock.store(step * 700_000, Ordering::SeqCst);
            sched.run_pending().unwrap();
        }
        let status = &sched.statuses()[0];
        assert!(!status.running);
        assert!(status.errors >= 3);

        let report = sched.health_check().unwrap();
        assert_eq!(report["restarted"][0], "flaky");
        assert!(sched.statuses()[0].running);
    }

    #[test]
    fn test_operator_stop_survives_health_check() {
        let clock = Arc::new(AtomicI64::new(0));
        let (_tmp, sched) = scheduler(clock);
        let log = Arc::new(Mutex::new(Vec::new()));
        sched.register(engine("a", &log, false)).unwrap();
        sched.stop("a").unwrap();
        sched.health_check().unwrap();
        let status = &sched.statuses()[0];
        assert!(!status.running);
        assert!(status.held);
        assert_eq!(sched.run_pending().unwrap(), 0);

        sched.start("a").unwrap();
        assert_eq!(sched.run_pending().unwrap(), 2);
    }

    #[test]
    fn test_panicking_engine_is_contained() {
        struct PanicEngine;
        impl Engine for PanicEngine {
            fn name(&self) -> &str {
                "boom"
            }
            fn pre_action(&mut self) -> Result<Value, String> {
                panic!("pre blew up");
            }
            fn main_action(&mut self) -> Result<Value, String> {
                Ok(json!({}))
            }
        }
        let clock = Arc::new(AtomicI64::new(0));
        let (tmp, sched) = scheduler(clock);
        sched.register(Box::new(PanicEngine)).unwrap();
        sched.run_pending().unwrap();

        let actions = std::fs::read_to_string(tmp.path().join("engine_actions.jsonl")).unwrap();
        let first: Value = serde_json::from_str(actions.lines().next().unwrap()).unwrap();
        assert_eq!(first["status"], "error");
        assert_eq!(first["error"], "panic in engine action");
    }

    #[test]
    fn test_run_all_fires_mains_only_and_logs_them() {
        let clock = Arc::new(AtomicI64::new(0));
        let (tmp, sched) = scheduler(clock);
        let log = Arc::new(Mutex::new(Vec::new()));
        sched.register(engine("a", &log, false)).unwrap();
        assert_eq!(sched.run_all().unwrap(), 1);

        let actions = std::fs::read_to_string(tmp.path().join("engine_actions.jsonl")).unwrap();
        let lines: Vec<Value> = actions
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["action_type"], "main");
        assert_eq!(lines[0]["status"], "ok");
        assert_eq!(log.lock().unwrap().as_slice(), ["a:main"]);
    }

    #[test]
    fn test_main_failures_park_even_when_pre_succeeds() {
        let clock = Arc::new(AtomicI64::new(0));
        let (_tmp, sched) = scheduler(Arc::clone(&clock));
        let log = Arc::new(Mutex::new(Vec::new()));
        sched.register(engine("flaky", &log, true)).unwrap();

        // Each wake runs a succeeding pre and a failing main; the pre must
        // not clear the main failure streak.
        for step in 0..3 {
            clock.store(step * 700_000, Ordering::SeqCst);
            sched.run_pending().unwrap();
        }
        let status = &sched.statuses()[0];
        assert!(!status.running);
        assert_eq!(status.errors, 3);
    }

    #[test]
    fn test_recording_engine_appends_heartbeat() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path());
        store.ensure_layout().unwrap();
        let ledger =
            Arc::new(crate::core::ledger::Ledger::open(store.ledger_path()).unwrap());
        ledger.ensure_genesis("boot").unwrap();
        let mut eng = RecordingEngine::new("beacon", Arc::clone(&ledger));
        eng.pre_action().unwrap();
        eng.main_action().unwrap();
        let events = ledger.iter_events().unwrap();
        assert!(events.iter().any(|e| e.event == "track_event"));
        assert_eq!(eng.status()["main_runs"], 1);
    }
}
