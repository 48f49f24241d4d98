// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! convoy-agent: attach this machine to a Convoy orchestrator as a node.

use clap::Parser;
use convoy_agent::executor::{PackRunner, RunOutcome};
use convoy_agent::{Agent, AgentConfig};
use convoy_core::{Resources, RuntimeType};
use convoy_wire::PodAssignment;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "convoy-agent", about = "Convoy node agent")]
struct Args {
    /// Orchestrator channel endpoint.
    #[arg(long, default_value = "ws://127.0.0.1:7420")]
    orchestrator: String,

    /// Orchestrator REST base for credential bootstrap.
    #[arg(long)]
    api: Option<String>,

    /// Pre-provisioned bearer token (skips credential bootstrap).
    #[arg(long)]
    token: Option<String>,

    /// Unique node name.
    #[arg(long)]
    name: String,

    /// Worker slots for pack execution.
    #[arg(long, default_value_t = 4)]
    slots: u32,

    /// Node labels as key=value pairs.
    #[arg(long = "label", value_name = "KEY=VALUE")]
    labels: Vec<String>,

    /// Allocatable CPU in millicores.
    #[arg(long, default_value_t = 4000)]
    cpu: u64,

    /// Allocatable memory in bytes.
    #[arg(long, default_value_t = 8 * 1024 * 1024 * 1024)]
    memory: u64,
}

/// Stub runtime: acknowledges assignments and idles until stopped. The
/// process-spawning runtime replaces this behind the same trait.
struct IdleRunner;

#[async_trait::async_trait]
impl PackRunner for IdleRunner {
    async fn run(
        &self,
        assignment: &PodAssignment,
        cancel: CancellationToken,
    ) -> RunOutcome {
        info!(pod = %assignment.pod_id, pack = %assignment.pack.name, "pack started");
        cancel.cancelled().await;
        RunOutcome::Completed
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = AgentConfig::new(args.orchestrator, args.name);
    config.api_url = args.api;
    config.token = args.token;
    config.runtime_type = RuntimeType::Native;
    config.worker_slots = args.slots;
    config.allocatable = Resources::new(args.cpu, args.memory, args.slots as u64, 0);
    for pair in &args.labels {
        match pair.split_once('=') {
            Some((key, value)) => {
                config.labels.insert(key.to_string(), value.to_string());
            }
            None => {
                error!(label = pair, "labels must be key=value");
                std::process::exit(2);
            }
        }
    }
    let mut capabilities = serde_json::Map::new();
    capabilities.insert(
        "version".to_string(),
        serde_json::json!(env!("CARGO_PKG_VERSION")),
    );
    config.capabilities = capabilities;

    let agent = match Agent::new(config, Arc::new(IdleRunner)) {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "agent init failed");
            std::process::exit(1);
        }
    };

    let cancel = agent.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, stopping agent");
            cancel.cancel();
        }
    });

    if let Err(e) = agent.run().await {
        error!(error = %e, "agent exited with error");
        std::process::exit(1);
    }
    info!("agent stopped");
}
