//! Scheduler scenarios with a synthetic clock: interval arithmetic, action
//! auditing, error parking, and health-monitor restarts.

use epochmesh::core::config::MeshConfig;
use epochmesh::core::ledger::Ledger;
use epochmesh::core::store::Store;
use epochmesh::mesh::engine::{Engine, EngineScheduler, RecordingEngine};
use epochmesh::mesh::Mesh;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

struct ScriptedEngine {
    name: String,
    outcomes: Mutex<Vec<Result<Value, String>>>,
}

impl ScriptedEngine {
    fn new(name: &str, outcomes: Vec<Result<Value, String>>) -> Box<Self> {
        Box::new(Self {
            name: name.to_string(),
            outcomes: Mutex::new(outcomes),
        })
    }

    fn next(&self) -> Result<Value, String> {
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            Ok(json!({}))
        } else {
            outcomes.remove(0)
        }
    }
}

impl Engine for ScriptedEngine {
    fn name(&self) -> &str {
        &self.name
    }
    fn pre_action(&mut self) -> Result<Value, String> {
        self.next()
    }
    fn main_action(&mut self) -> Result<Value, String> {
        self.next()
    }
}

fn scheduler() -> (tempfile::TempDir, Arc<AtomicI64>, EngineScheduler) {
    let tmp = tempfile::tempdir().unwrap();
    let store = Store::open(tmp.path());
    store.ensure_layout().unwrap();
    let clock = Arc::new(AtomicI64::new(0));
    let tick = Arc::clone(&clock);
    let sched = EngineScheduler::new(store).with_clock(move || tick.load(Ordering::SeqCst));
    (tmp, clock, sched)
}

fn action_log(root: &std::path::Path) -> Vec<Value> {
    std::fs::read_to_string(root.join("engine_actions.jsonl"))
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn test_week_long_schedule_advances_with_clock() {
    let (tmp, clock, sched) = scheduler();
    sched.register(ScriptedEngine::new("weekly", vec![])).unwrap();

    // Registration makes both actions due immediately.
    assert_eq!(sched.run_pending().unwrap(), 2);
    assert_eq!(sched.run_pending().unwrap(), 0);

    // A quarter week later only the pre-action fires.
    clock.store(151_200, Ordering::SeqCst);
    assert_eq!(sched.run_pending().unwrap(), 1);

    // A full week after start, both fire again.
    clock.store(604_800, Ordering::SeqCst);
    assert_eq!(sched.run_pending().unwrap(), 2);

    let log = action_log(tmp.path());
    let types: Vec<&str> = log.iter().map(|r| r["action_type"].as_str().unwrap()).collect();
    assert_eq!(types, ["pre", "main", "pre", "pre", "main"]);
}

#[test]
fn test_run_all_fires_each_main_regardless_of_schedule() {
    let (tmp, _clock, sched) = scheduler();
    sched.register(ScriptedEngine::new("a", vec![])).unwrap();
    sched.register(ScriptedEngine::new("b", vec![])).unwrap();
    assert_eq!(sched.run_all().unwrap(), 2);
    assert_eq!(sched.run_all().unwrap(), 2);

    // Main actions only, registration order preserved within each pass.
    let log = action_log(tmp.path());
    assert!(log.iter().all(|r| r["action_type"] == "main"));
    let engines: Vec<String> = log
        .iter()
        .map(|r| r["engine"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(engines, ["a", "b", "a", "b"]);
}

#[test]
fn test_three_consecutive_errors_park_the_engine() {
    let (tmp, clock, sched) = scheduler();
    sched
        .register(ScriptedEngine::new(
            "flaky",
            vec![
                Err("one".into()),
                Err("two".into()),
                Err("three".into()),
                Ok(json!({})),
            ],
        ))
        .unwrap();

    clock.store(0, Ordering::SeqCst);
    sched.run_pending().unwrap();
    clock.store(700_000, Ordering::SeqCst);
    sched.run_pending().unwrap();

    let status = &sched.statuses()[0];
    assert!(!status.running);
    assert_eq!(status.errors, 3);

    // Health monitor restarts error-parked engines and audits the restart.
    let report = sched.health_check().unwrap();
    assert_eq!(report["restarted"][0], "flaky");
    assert!(sched.statuses()[0].running);
    let log = action_log(tmp.path());
    assert!(log.iter().any(|r| r["action_type"] == "health_monitor"));
}

#[test]
fn test_held_engine_stays_down_through_health_checks() {
    let (_tmp, _clock, sched) = scheduler();
    sched.register(ScriptedEngine::new("a", vec![])).unwrap();
    sched.stop("a").unwrap();
    sched.health_check().unwrap();
    sched.health_check().unwrap();
    let status = &sched.statuses()[0];
    assert!(!status.running);
    assert!(status.held);
    assert_eq!(status.restarts, 0);
}

#[test]
fn test_recording_engine_heartbeats_into_the_ledger() {
    let tmp = tempfile::tempdir().unwrap();
    let mesh = Mesh::open(MeshConfig {
        root: tmp.path().to_path_buf(),
        ..Default::default()
    })
    .unwrap();
    let clock = Arc::new(AtomicI64::new(0));
    let tick = Arc::clone(&clock);
    let sched = EngineScheduler::new(mesh.store.clone())
        .with_clock(move || tick.load(Ordering::SeqCst));
    sched
        .register(Box::new(RecordingEngine::new(
            "beacon",
            Arc::clone(&mesh.ledger),
        )))
        .unwrap();
    sched.run_pending().unwrap();
    clock.store(604_800, Ordering::SeqCst);
    sched.run_pending().unwrap();

    let ledger = Ledger::open(mesh.store.ledger_path()).unwrap();
    let heartbeats = ledger
        .iter_events()
        .unwrap()
        .into_iter()
        .filter(|e| e.event == "track_event")
        .count();
    assert_eq!(heartbeats, 2);
    assert!(ledger.verify().unwrap().ok);
}
