//! CLI struct definitions for the epochmesh command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "epochmesh",
    version = env!("CARGO_PKG_VERSION"),
    about = "Audit-grade mesh substrate: hash-chained ledger, agent coordination, trigger gating, and Merkle-rooted segment capsules."
)]
pub(crate) struct Cli {
    /// Store root directory (overrides EPOCHMESH_ROOT).
    #[clap(long, global = true)]
    pub root: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Initialize the store layout and ledger genesis record
    Init,
    /// Agent registration and state tracking
    Agent(AgentCli),
    /// Priority message bus operations
    Msg(MsgCli),
    /// Sync-point barriers over agent sets
    Sync(SyncCli),
    /// Trigger registration, sealing, and activation
    Trigger(TriggerCli),
    /// Segment pipeline: run segments, super-metas, hyper-metas
    Segment(SegmentCli),
    /// Engine scheduler: status, forced runs, operator holds
    Engine(EngineCli),
    /// Full integrity verification of ledger, chain, and capsules
    Verify(VerifyCli),
    /// Emit the segment chain as Graphviz DOT
    Viz,
    /// Print machine-readable subsystem schemas
    Schema {
        /// Limit to one subsystem by name
        #[clap(long)]
        name: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct AgentCli {
    #[clap(subcommand)]
    pub command: AgentCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum AgentCommand {
    /// Register an agent (idempotent)
    Register {
        agent_id: String,
        /// Capability names
        #[clap(long, value_delimiter = ',')]
        capabilities: Vec<String>,
    },
    /// Unregister an agent (terminal, record retained)
    Unregister { agent_id: String },
    /// Show one agent's state snapshot
    State { agent_id: String },
    /// List all agents
    List,
}

#[derive(clap::Args, Debug)]
pub(crate) struct MsgCli {
    #[clap(subcommand)]
    pub command: MsgCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum MsgCommand {
    /// Send a message to one agent
    Send {
        sender: String,
        receiver: String,
        msg_type: String,
        /// JSON content payload
        #[clap(long, default_value = "{}")]
        content: String,
        #[clap(long, default_value_t = 5)]
        priority: i32,
        #[clap(long, default_value_t = 3600)]
        ttl: i64,
    },
    /// Broadcast to every active agent except the sender
    Broadcast {
        sender: String,
        msg_type: String,
        #[clap(long, default_value = "{}")]
        content: String,
    },
    /// Poll up to `limit` messages for an agent, highest priority first
    Poll {
        agent_id: String,
        #[clap(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct SyncCli {
    #[clap(subcommand)]
    pub command: SyncCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum SyncCommand {
    /// Create a barrier over a participant set
    Create {
        name: String,
        /// Participant agent ids
        #[clap(long, value_delimiter = ',')]
        participants: Vec<String>,
        #[clap(long, default_value_t = 60)]
        timeout: u64,
    },
    /// Mark one participant ready
    Ready { sync_id: String, agent_id: String },
    /// Block until the barrier completes or times out
    Wait {
        sync_id: String,
        /// Caller-side timeout in seconds
        #[clap(long)]
        timeout: Option<u64>,
    },
    /// Show a sync point's state
    Status { sync_id: String },
}

#[derive(clap::Args, Debug)]
pub(crate) struct TriggerCli {
    #[clap(subcommand)]
    pub command: TriggerCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum TriggerCommand {
    /// Register a trigger (resource requirement passes the Alpha Ceiling)
    Register {
        trigger_id: String,
        description: String,
        #[clap(long, default_value_t = 10)]
        resource: i64,
        /// Mark as critical (requires seal verification before activation)
        #[clap(long)]
        critical: bool,
    },
    /// Seal a trigger's context for a given epoch
    Seal {
        trigger_id: String,
        /// JSON context payload
        #[clap(long, default_value = "{}")]
        context: String,
    },
    /// Verify a trigger's seal for an epoch
    VerifySeal { trigger_id: String, epoch: i64 },
    /// Activate a trigger, fanning out to registered handlers
    Activate {
        trigger_id: String,
        /// JSON activation context
        #[clap(long, default_value = "{}")]
        context: String,
        /// Independent verification count presented for critical triggers
        #[clap(long, default_value_t = 1)]
        verify_count: u32,
    },
    /// List registered triggers
    List,
}

#[derive(clap::Args, Debug)]
pub(crate) struct SegmentCli {
    #[clap(subcommand)]
    pub command: SegmentCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum SegmentCommand {
    /// Run one segment toward a capability target
    Run {
        #[clap(default_value = "settle")]
        target: String,
    },
    /// Run a batch of segments
    Batch {
        #[clap(default_value = "settle")]
        target: String,
        #[clap(long)]
        count: Option<u32>,
    },
    /// Build a super-meta capsule over all segments
    Super,
    /// Build a hyper-meta capsule over the sub-meshes
    Hyper,
    /// Show chain state
    Status,
}

#[derive(clap::Args, Debug)]
pub(crate) struct EngineCli {
    #[clap(subcommand)]
    pub command: EngineCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum EngineCommand {
    /// Show per-engine scheduling state and the action log depth
    Status,
    /// Run the blocking scheduler loop until interrupted
    Run,
    /// Force one main action on every running engine
    RunAll,
    /// Run any due actions once and exit
    RunPending,
    /// Hold an engine; the health monitor will not restart it
    Stop { name: String },
    /// Release a held engine
    Start { name: String },
}

#[derive(clap::Args, Debug)]
pub(crate) struct VerifyCli {
    /// Output format: 'text' or 'json'
    #[clap(long, default_value = "text")]
    pub format: String,
}
