//! Epochmesh: an audit-grade coordination substrate.
//!
//! Every state transition lands in a hash-chained JSONL ledger; segment
//! results are sealed into Merkle-rooted capsules linked by a hash chain,
//! reproducible from content-addressable storage alone.
//!
//! # Architecture
//!
//! - [`core`]: canonical JSON, ledger, CAS, seals, store layout, config
//! - [`mesh`]: agent registry, priority bus, sync points, triggers,
//!   the segment pipeline, and the engine scheduler
//!
//! All subsystems share one [`core::store::Store`] root (default
//! `./ledger/`) and one [`core::ledger::Ledger`]. The CLI is the outer
//! surface; the [`mesh::Mesh`] facade is the embedded one.
//!
//! # Examples
//!
//! ```bash
//! # Initialize a store
//! epochmesh init
//!
//! # Register agents and run a segment
//! epochmesh agent register drip-01 --capabilities ingest,plan
//! epochmesh segment run settle
//!
//! # Verify everything
//! epochmesh verify
//! ```

pub mod core;
pub mod mesh;

mod cli;
mod subsystems;

use crate::cli::{
    AgentCommand, Cli, Command, EngineCommand, MsgCommand, SegmentCommand, SyncCommand,
    TriggerCommand,
};
use crate::core::config::MeshConfig;
use crate::core::error::{MeshError, MeshResult};
use crate::core::store::Store;
use crate::core::time;
use crate::mesh::bus::Message;
use crate::mesh::engine::{EngineScheduler, RecordingEngine};
use crate::mesh::segment;
use crate::mesh::trigger::{TriggerKind, TriggerSeal};
use crate::mesh::Mesh;
use clap::Parser;
use colored::Colorize;
use serde_json::json;
use std::time::Duration;

fn print_envelope(cmd: &str, status: &str, extra: serde_json::Value) {
    println!("{}", time::command_envelope(cmd, status, extra));
}

/// Most recent persisted seal for a trigger, by epoch.
fn latest_seal(store: &Store, trigger_id: &str) -> MeshResult<Option<TriggerSeal>> {
    let prefix = format!("trigger_{}_", trigger_id);
    let mut best: Option<(i64, std::path::PathBuf)> = None;
    for entry in std::fs::read_dir(store.seals_dir())? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(epoch) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".json"))
            .and_then(|e| e.parse::<i64>().ok())
        else {
            continue;
        };
        if best.as_ref().map(|(e, _)| epoch > *e).unwrap_or(true) {
            best = Some((epoch, entry.path()));
        }
    }
    match best {
        Some((_, path)) => Ok(Some(serde_json::from_slice(&std::fs::read(path)?)?)),
        None => Ok(None),
    }
}

pub fn run() -> MeshResult<()> {
    let cli = Cli::parse();
    let mut config = MeshConfig::from_env();
    if let Some(root) = cli.root {
        config.root = root;
    }

    match cli.command {
        Command::Init => {
            let store = Store::open(&config.root);
            subsystems::initialize_all(&store)?;
            let mesh = Mesh::open(config)?;
            print_envelope(
                "init",
                "ok",
                json!({
                    "root": mesh.store.root.display().to_string(),
                    "tail_sha": mesh.ledger.tail_sha(),
                }),
            );
        }
        Command::Agent(agent_cli) => {
            let mesh = Mesh::open(config)?;
            match agent_cli.command {
                AgentCommand::Register {
                    agent_id,
                    capabilities,
                } => {
                    mesh.registry.register(&agent_id, capabilities)?;
                    print_envelope("agent.register", "ok", json!({"agent_id": agent_id}));
                }
                AgentCommand::Unregister { agent_id } => {
                    let found = mesh.registry.unregister(&agent_id)?;
                    print_envelope(
                        "agent.unregister",
                        if found { "ok" } else { "not_found" },
                        json!({"agent_id": agent_id}),
                    );
                }
                AgentCommand::State { agent_id } => match mesh.registry.get_state(&agent_id) {
                    Some(state) => {
                        print_envelope("agent.state", "ok", serde_json::to_value(state)?)
                    }
                    None => {
                        return Err(MeshError::NotFound(format!("agent {}", agent_id)));
                    }
                },
                AgentCommand::List => {
                    let agents = mesh.registry.list();
                    print_envelope(
                        "agent.list",
                        "ok",
                        json!({"count": agents.len(), "agents": agents}),
                    );
                }
            }
        }
        Command::Msg(msg_cli) => {
            let mesh = Mesh::open(config)?;
            match msg_cli.command {
                MsgCommand::Send {
                    sender,
                    receiver,
                    msg_type,
                    content,
                    priority,
                    ttl,
                } => {
                    let content: serde_json::Value = serde_json::from_str(&content)?;
                    let msg = Message::new(&sender, &receiver, &msg_type, content)
                        .with_priority(priority)
                        .with_ttl(ttl);
                    let message_id = msg.message_id.clone();
                    mesh.bus.send(msg)?;
                    print_envelope("msg.send", "ok", json!({"message_id": message_id}));
                }
                MsgCommand::Broadcast {
                    sender,
                    msg_type,
                    content,
                } => {
                    let content: serde_json::Value = serde_json::from_str(&content)?;
                    let all_ok = mesh.bus.broadcast(&sender, &msg_type, content, &[])?;
                    print_envelope(
                        "msg.broadcast",
                        if all_ok { "ok" } else { "partial" },
                        json!({}),
                    );
                }
                MsgCommand::Poll { agent_id, limit } => {
                    let messages = mesh.bus.poll(&agent_id, limit)?;
                    print_envelope(
                        "msg.poll",
                        "ok",
                        json!({"count": messages.len(), "messages": messages}),
                    );
                }
            }
        }
        Command::Sync(sync_cli) => {
            let mesh = Mesh::open(config)?;
            match sync_cli.command {
                SyncCommand::Create {
                    name,
                    participants,
                    timeout,
                } => {
                    let sync_id = mesh.sync.create(&name, &participants, timeout)?;
                    print_envelope("sync.create", "ok", json!({"sync_id": sync_id}));
                }
                SyncCommand::Ready { sync_id, agent_id } => {
                    let accepted = mesh.sync.mark_ready(&sync_id, &agent_id)?;
                    print_envelope(
                        "sync.ready",
                        if accepted { "ok" } else { "timed_out" },
                        json!({"sync_id": sync_id, "agent_id": agent_id}),
                    );
                }
                SyncCommand::Wait { sync_id, timeout } => {
                    let completed = mesh
                        .sync
                        .wait(&sync_id, timeout.map(Duration::from_secs))?;
                    print_envelope(
                        "sync.wait",
                        if completed { "complete" } else { "timed_out" },
                        json!({"sync_id": sync_id}),
                    );
                }
                SyncCommand::Status { sync_id } => match mesh.sync.get(&sync_id) {
                    Some(point) => {
                        print_envelope("sync.status", "ok", serde_json::to_value(point)?)
                    }
                    None => return Err(MeshError::NotFound(format!("sync point {}", sync_id))),
                },
            }
        }
        Command::Trigger(trigger_cli) => {
            let mesh = Mesh::open(config)?;
            match trigger_cli.command {
                TriggerCommand::Register {
                    trigger_id,
                    description,
                    resource,
                    critical,
                } => {
                    let kind = if critical {
                        TriggerKind::Critical
                    } else {
                        TriggerKind::Standard
                    };
                    let descriptor =
                        mesh.triggers
                            .register(&trigger_id, &description, resource, kind)?;
                    print_envelope("trigger.register", "ok", serde_json::to_value(descriptor)?);
                }
                TriggerCommand::Seal {
                    trigger_id,
                    context,
                } => {
                    let context: serde_json::Value = serde_json::from_str(&context)?;
                    let seal = mesh.triggers.create_seal(&trigger_id, context)?;
                    print_envelope("trigger.seal", "ok", serde_json::to_value(seal)?);
                }
                TriggerCommand::VerifySeal { trigger_id, epoch } => {
                    let path = mesh
                        .store
                        .seals_dir()
                        .join(format!("trigger_{}_{}.json", trigger_id, epoch));
                    if !path.exists() {
                        return Err(MeshError::NotFound(format!(
                            "seal for trigger {} at epoch {}",
                            trigger_id, epoch
                        )));
                    }
                    let seal = serde_json::from_slice(&std::fs::read(&path)?)?;
                    let valid = mesh.triggers.verify_seal(&seal)?;
                    print_envelope(
                        "trigger.verify-seal",
                        if valid { "valid" } else { "invalid" },
                        json!({"trigger_id": trigger_id, "epoch": epoch}),
                    );
                }
                TriggerCommand::Activate {
                    trigger_id,
                    context,
                    verify_count,
                } => {
                    let context: serde_json::Value = serde_json::from_str(&context)?;
                    let seal = latest_seal(&mesh.store, &trigger_id)?;
                    let activation =
                        mesh.triggers
                            .activate(&trigger_id, context, verify_count, seal.as_ref())?;
                    let status = activation.status.clone();
                    print_envelope(
                        "trigger.activate",
                        &status,
                        serde_json::to_value(activation)?,
                    );
                }
                TriggerCommand::List => {
                    let triggers = mesh.triggers.list();
                    print_envelope(
                        "trigger.list",
                        "ok",
                        json!({"count": triggers.len(), "triggers": triggers}),
                    );
                }
            }
        }
        Command::Segment(segment_cli) => {
            let mesh = Mesh::open(config.clone())?;
            match segment_cli.command {
                SegmentCommand::Run { target } => {
                    let outcome = mesh.segments.run_segment(&target)?;
                    print_envelope("segment.run", "ok", serde_json::to_value(outcome)?);
                }
                SegmentCommand::Batch { target, count } => {
                    let count = count.unwrap_or(config.segments);
                    let mut outcomes = Vec::new();
                    for _ in 0..count {
                        outcomes.push(mesh.segments.run_segment(&target)?);
                    }
                    print_envelope(
                        "segment.batch",
                        "ok",
                        json!({"count": count, "segments": outcomes}),
                    );
                }
                SegmentCommand::Super => {
                    let outcome = mesh.segments.build_super_meta()?;
                    print_envelope("segment.super", "ok", serde_json::to_value(outcome)?);
                }
                SegmentCommand::Hyper => {
                    let outcome = mesh.segments.build_hyper_meta(&segment::SUB_MESHES)?;
                    print_envelope("segment.hyper", "ok", serde_json::to_value(outcome)?);
                }
                SegmentCommand::Status => {
                    let state = mesh.segments.load_chain_state()?;
                    print_envelope("segment.status", "ok", serde_json::to_value(state)?);
                }
            }
        }
        Command::Engine(engine_cli) => {
            let mesh = Mesh::open(config)?;
            let sched = EngineScheduler::new(mesh.store.clone());
            sched.register(Box::new(RecordingEngine::new(
                "beacon",
                std::sync::Arc::clone(&mesh.ledger),
            )))?;
            match engine_cli.command {
                EngineCommand::Status => {
                    let actions = std::fs::read_to_string(mesh.store.engine_actions_path())
                        .map(|s| s.lines().count())
                        .unwrap_or(0);
                    print_envelope(
                        "engine.status",
                        "ok",
                        json!({
                            "engines": serde_json::to_value(sched.statuses())?,
                            "actions_logged": actions,
                        }),
                    );
                }
                EngineCommand::Run => {
                    sched.run_loop()?;
                }
                EngineCommand::RunAll => {
                    let invoked = sched.run_all()?;
                    print_envelope("engine.run-all", "ok", json!({"invoked": invoked}));
                }
                EngineCommand::RunPending => {
                    let invoked = sched.run_pending()?;
                    print_envelope("engine.run-pending", "ok", json!({"invoked": invoked}));
                }
                EngineCommand::Stop { name } => {
                    sched.stop(&name)?;
                    print_envelope("engine.stop", "ok", json!({"engine": name}));
                }
                EngineCommand::Start { name } => {
                    sched.start(&name)?;
                    print_envelope("engine.start", "ok", json!({"engine": name}));
                }
            }
        }
        Command::Verify(verify_cli) => {
            let mesh = Mesh::open(config)?;
            let report = segment::verify_mesh(&mesh.store, &mesh.ledger)?;
            if verify_cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for check in &report.checks {
                    let marker = if check.ok {
                        "PASS".green().bold()
                    } else {
                        "FAIL".red().bold()
                    };
                    println!("  {}  {:<10}  {}", marker, check.name, check.detail);
                }
                if report.ok {
                    println!("{}", "verification passed".green());
                } else {
                    println!("{}", "verification failed".red().bold());
                }
            }
            if !report.ok {
                return Err(MeshError::Integrity("verification failed".to_string()));
            }
        }
        Command::Viz => {
            let mesh = Mesh::open(config)?;
            print!("{}", mesh.segments.render_dot()?);
        }
        Command::Schema { name } => {
            let schemas: Vec<serde_json::Value> = subsystems::SUBSYSTEMS
                .iter()
                .filter(|s| name.as_deref().map(|n| n == s.name).unwrap_or(true))
                .map(|s| (s.schema)())
                .collect();
            if let Some(name) = &name {
                if schemas.is_empty() {
                    return Err(MeshError::NotFound(format!("subsystem {}", name)));
                }
            }
            println!("{}", serde_json::to_string_pretty(&schemas)?);
        }
    }
    Ok(())
}
