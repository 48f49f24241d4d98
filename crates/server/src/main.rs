// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! convoyd: the Convoy orchestrator daemon.
//!
//! Composition root: builds the store, auth provider, and server context
//! once, then runs the channel listener, stale sweep, and reconciler until
//! ctrl-c.

use clap::Parser;
use convoy_core::SystemClock;
use convoy_server::{env, ServerConfig, ServerCtx, StaticAuthProvider};
use convoy_store::MemoryStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "convoyd", about = "Convoy cluster orchestrator daemon")]
struct Args {
    /// Bind address for the node channel listener.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Static auth token for node agents. Disables auth when omitted.
    #[arg(long)]
    auth_token: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing();

    let bind = args.bind.unwrap_or_else(env::bind_addr);
    let token = args.auth_token.or_else(env::auth_token);

    let mut config = env::apply_overrides(ServerConfig::default());
    config.require_auth = token.is_some();

    let auth = match &token {
        Some(token) => StaticAuthProvider::single(token.clone(), "machine"),
        None => StaticAuthProvider::new(),
    };

    // Single-node deployments run on the in-process store; clustered
    // installs swap in a durable Store implementation here.
    let ctx = ServerCtx::new(
        config,
        SystemClock,
        Arc::new(MemoryStore::new()),
        Arc::new(auth),
    );

    let listener = match TcpListener::bind(bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%bind, error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };
    info!(%bind, auth = token.is_some(), "convoyd starting");

    let serve = tokio::spawn(convoy_server::channel::serve(Arc::clone(&ctx), listener));
    let sweep = tokio::spawn(Arc::clone(&ctx).run_stale_sweep());
    let reconcile = tokio::spawn(convoy_server::run_reconciler(Arc::clone(&ctx)));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "signal listener failed");
    }
    ctx.shutdown("Server shutting down");

    let _ = serve.await;
    let _ = sweep.await;
    let _ = reconcile.await;
    info!("convoyd stopped");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match env::log_dir() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "convoyd.log");
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(appender)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
