// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker pool: bounded slots executing pack assignments.
//!
//! Every local status change emits a [`StatusEvent`] that the runtime
//! forwards as `pod:status:update`. Stop requests cancel the worker's
//! token first (cooperative shutdown) and force-abort after the grace
//! deadline. A worker finishing while its pod is `stopping` reports
//! `stopped` regardless of its natural exit.

use async_trait::async_trait;
use convoy_core::{PodId, PodStatus, Resources, TerminationReason};
use convoy_wire::{PodAssignment, PodMetrics, PoolStats};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one pack execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The pack ran to completion.
    Completed,
    /// The pack exited with an application error.
    Failed(String),
    /// The pack crashed (panic, runtime trap, killed process).
    Crashed(String),
}

/// Executes pack bundles. The real runtime (process spawn, wasm engine,
/// browser sandbox) lives behind this seam; tests script it.
#[async_trait]
pub trait PackRunner: Send + Sync + 'static {
    /// Run an assignment to completion. Implementations should return
    /// promptly once `cancel` fires; the pool force-aborts after the
    /// grace deadline otherwise.
    async fn run(&self, assignment: &PodAssignment, cancel: CancellationToken) -> RunOutcome;
}

/// A local pod status change to report upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub pod_id: PodId,
    pub incarnation: u64,
    pub status: PodStatus,
    pub reason: Option<TerminationReason>,
    pub message: Option<String>,
}

struct Worker {
    incarnation: u64,
    cancel: CancellationToken,
    stopping: bool,
    stop_reason: Option<(TerminationReason, Option<String>)>,
    requests: Resources,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct PoolInner {
    workers: HashMap<PodId, Worker>,
    stats: HashMap<PodId, PodMetrics>,
}

/// Bounded pool of pack workers.
pub struct WorkerPool {
    slots: u32,
    runner: Arc<dyn PackRunner>,
    status_tx: mpsc::Sender<StatusEvent>,
    inner: Arc<Mutex<PoolInner>>,
}

impl WorkerPool {
    pub fn new(
        slots: u32,
        runner: Arc<dyn PackRunner>,
        status_tx: mpsc::Sender<StatusEvent>,
    ) -> Self {
        Self { slots, runner, status_tx, inner: Arc::new(Mutex::new(PoolInner::default())) }
    }

    pub fn slots(&self) -> u32 {
        self.slots
    }

    pub fn busy(&self) -> u32 {
        self.inner.lock().workers.len() as u32
    }

    /// Resource requests of every live worker, reported in heartbeats.
    pub fn allocated(&self) -> Resources {
        self.inner
            .lock()
            .workers
            .values()
            .fold(Resources::ZERO, |acc, w| acc.saturating_add(&w.requests))
    }

    pub fn active_pods(&self) -> Vec<PodId> {
        self.inner.lock().workers.keys().copied().collect()
    }

    /// Pool occupancy plus per-pod counters for `metrics:node`.
    pub fn metrics(&self) -> (PoolStats, Vec<PodMetrics>) {
        let inner = self.inner.lock();
        let pool = PoolStats { slots: self.slots, busy: inner.workers.len() as u32 };
        (pool, inner.stats.values().cloned().collect())
    }

    /// Start executing an assignment in a free slot.
    pub async fn deploy(&self, assignment: PodAssignment) -> Result<(), String> {
        let pod_id = assignment.pod_id;
        let incarnation = assignment.incarnation;
        let cancel = CancellationToken::new();
        {
            let mut inner = self.inner.lock();
            if inner.workers.contains_key(&pod_id) {
                return Err(format!("pod {pod_id} already has a worker"));
            }
            if inner.workers.len() as u32 >= self.slots {
                return Err("no free worker slots".to_string());
            }
            let entry = inner
                .stats
                .entry(pod_id)
                .or_insert_with(|| PodMetrics::new(pod_id));
            entry.execution_count += 1;
            if entry.execution_count > 1 {
                entry.restart_count += 1;
            }
            inner.workers.insert(
                pod_id,
                Worker {
                    incarnation,
                    cancel: cancel.clone(),
                    stopping: false,
                    stop_reason: None,
                    requests: assignment.resource_requests,
                    handle: None,
                },
            );
        }

        info!(pod = %pod_id, pack = %assignment.pack.name, incarnation, "worker slot allocated");
        emit(&self.status_tx, pod_id, incarnation, PodStatus::Starting, None, None).await;

        let runner = Arc::clone(&self.runner);
        let inner = Arc::clone(&self.inner);
        let status_tx = self.status_tx.clone();
        let handle = tokio::spawn(async move {
            emit(&status_tx, pod_id, incarnation, PodStatus::Running, None, None).await;
            let started = tokio::time::Instant::now();
            let outcome = runner.run(&assignment, cancel).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            finish(&inner, &status_tx, pod_id, incarnation, outcome, elapsed_ms).await;
        });

        let mut inner = self.inner.lock();
        if let Some(worker) = inner.workers.get_mut(&pod_id) {
            worker.handle = Some(handle);
        }
        Ok(())
    }

    /// Request a pod stop: cooperative cancel now, force-abort after
    /// `grace`. Returns false for pods without a worker.
    pub async fn stop(
        &self,
        pod_id: PodId,
        reason: TerminationReason,
        message: Option<String>,
        grace: Duration,
    ) -> bool {
        let (cancel, incarnation) = {
            let mut inner = self.inner.lock();
            match inner.workers.get_mut(&pod_id) {
                Some(worker) => {
                    worker.stopping = true;
                    worker.stop_reason = Some((reason, message.clone()));
                    (worker.cancel.clone(), worker.incarnation)
                }
                None => return false,
            }
        };

        info!(pod = %pod_id, reason = ?reason, "stopping worker");
        emit(&self.status_tx, pod_id, incarnation, PodStatus::Stopping, None, message).await;
        cancel.cancel();

        let inner = Arc::clone(&self.inner);
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            force_finish(&inner, &status_tx, pod_id).await;
        });
        true
    }

    /// Cancel every worker, for agent shutdown.
    pub fn abort_all(&self) {
        let mut inner = self.inner.lock();
        for (pod_id, worker) in inner.workers.drain() {
            debug!(pod = %pod_id, "aborting worker on shutdown");
            worker.cancel.cancel();
            if let Some(handle) = worker.handle {
                handle.abort();
            }
        }
    }
}

/// Natural completion path, run by the worker task itself.
async fn finish(
    inner: &Mutex<PoolInner>,
    status_tx: &mpsc::Sender<StatusEvent>,
    pod_id: PodId,
    incarnation: u64,
    outcome: RunOutcome,
    elapsed_ms: u64,
) {
    let report = {
        let mut inner = inner.lock();
        let Some(worker) = inner.workers.remove(&pod_id) else {
            // Force-finish already reported this pod.
            return;
        };
        let stopping = worker.stopping;
        if let Some(entry) = inner.stats.get_mut(&pod_id) {
            entry.total_execution_time_ms += elapsed_ms;
            if !stopping {
                match outcome {
                    RunOutcome::Completed => entry.successful_executions += 1,
                    RunOutcome::Failed(_) | RunOutcome::Crashed(_) => {
                        entry.failed_executions += 1
                    }
                }
            }
        }
        if stopping {
            let (reason, message) = worker
                .stop_reason
                .unwrap_or((TerminationReason::Cancelled, None));
            (PodStatus::Stopped, Some(reason), message)
        } else {
            match outcome {
                RunOutcome::Completed => {
                    (PodStatus::Stopped, Some(TerminationReason::AppExitOk), None)
                }
                RunOutcome::Failed(msg) => (
                    PodStatus::Failed,
                    Some(TerminationReason::AppExitError),
                    Some(msg),
                ),
                RunOutcome::Crashed(msg) => {
                    (PodStatus::Failed, Some(TerminationReason::AppCrashed), Some(msg))
                }
            }
        }
    };
    emit(status_tx, pod_id, incarnation, report.0, report.1, report.2).await;
}

/// Grace expired: abort the worker and report the stop outcome.
async fn force_finish(
    inner: &Mutex<PoolInner>,
    status_tx: &mpsc::Sender<StatusEvent>,
    pod_id: PodId,
) {
    let report = {
        let mut inner = inner.lock();
        let Some(worker) = inner.workers.remove(&pod_id) else {
            return;
        };
        warn!(pod = %pod_id, "grace deadline passed, force-terminating worker");
        if let Some(handle) = worker.handle {
            handle.abort();
        }
        let (reason, message) = worker
            .stop_reason
            .unwrap_or((TerminationReason::Cancelled, None));
        (worker.incarnation, reason, message)
    };
    emit(status_tx, pod_id, report.0, PodStatus::Stopped, Some(report.1), report.2).await;
}

async fn emit(
    status_tx: &mpsc::Sender<StatusEvent>,
    pod_id: PodId,
    incarnation: u64,
    status: PodStatus,
    reason: Option<TerminationReason>,
    message: Option<String>,
) {
    let event = StatusEvent { pod_id, incarnation, status, reason, message };
    if status_tx.send(event).await.is_err() {
        debug!(pod = %pod_id, "status channel closed, event dropped");
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
