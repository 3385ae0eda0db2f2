//! Reconciliation scheduler
//!
//! Mutations hand wallet IDs to a bounded mailbox and return immediately.
//! A single actor task drains the mailbox and spawns one reconciler run
//! per request onto a `JoinSet`; runs for different wallets proceed in
//! parallel and runs for the same wallet race for the wallet lock.
//!
//! ```text
//!  WalletService ──schedule()──▶ mpsc (bounded) ──▶ SchedulerActor
//!                                                     │ spawn per request
//!                                                     ▼
//!                                         JoinSet<jitter → Reconciler::reconcile>
//! ```
//!
//! `flush` waits for everything queued before it. `shutdown` stops
//! intake, cancels runs still sleeping out their jitter, and waits for
//! runs that are already reconciling.

use crate::metrics;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::types::WalletId;
use crate::{Result, WalletError};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Anything that can be asked to reconcile a wallet, fire-and-forget
pub trait ReconcileTrigger: Send + Sync {
    /// Request a run. Never blocks and never fails the caller.
    fn schedule(&self, wallet_id: &WalletId);
}

/// Outcome counts of finished runs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunTally {
    pub published: usize,
    pub contended: usize,
    pub failed: usize,
    /// Runs cancelled by shutdown before they started reconciling
    pub cancelled: usize,
}

impl RunTally {
    pub fn total(&self) -> usize {
        self.published + self.contended + self.failed + self.cancelled
    }

    fn record(&mut self, outcome: Option<&ReconcileOutcome>) {
        match outcome {
            Some(ReconcileOutcome::Published { .. }) => self.published += 1,
            Some(ReconcileOutcome::Contended) => self.contended += 1,
            Some(ReconcileOutcome::Failed { .. }) => self.failed += 1,
            None => self.cancelled += 1,
        }
    }
}

/// Message sent to the scheduler actor
enum SchedulerMessage {
    /// Run the reconciler for a wallet
    Reconcile { wallet_id: WalletId },

    /// Wait for every run queued so far, then report
    Flush { response: oneshot::Sender<RunTally> },

    /// Stop intake, cancel jittering runs, wait for the rest
    Shutdown { response: oneshot::Sender<RunTally> },
}

struct SchedulerActor {
    reconciler: Arc<Reconciler>,
    mailbox: mpsc::Receiver<SchedulerMessage>,
    runs: JoinSet<Option<ReconcileOutcome>>,
    cancel: watch::Sender<bool>,
    tally: RunTally,
}

impl SchedulerActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                msg = self.mailbox.recv() => match msg {
                    Some(SchedulerMessage::Reconcile { wallet_id }) => self.spawn_run(wallet_id),
                    Some(SchedulerMessage::Flush { response }) => {
                        self.drain().await;
                        let _ = response.send(std::mem::take(&mut self.tally));
                    }
                    Some(SchedulerMessage::Shutdown { response }) => {
                        self.shutdown().await;
                        let _ = response.send(std::mem::take(&mut self.tally));
                        break;
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },

                Some(joined) = self.runs.join_next(), if !self.runs.is_empty() => {
                    self.observe(joined);
                }
            }
        }

        info!("Reconcile scheduler stopped");
    }

    fn spawn_run(&mut self, wallet_id: WalletId) {
        let reconciler = self.reconciler.clone();
        let mut cancel = self.cancel.subscribe();

        self.runs.spawn(async move {
            let delay = reconciler.settings().jitter.sample();
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.changed() => {
                        debug!(wallet_id = %wallet_id, "Reconcile run cancelled during jitter");
                        return None;
                    }
                }
            }
            Some(reconciler.reconcile(&wallet_id).await)
        });
    }

    fn observe(&mut self, joined: std::result::Result<Option<ReconcileOutcome>, JoinError>) {
        match joined {
            Ok(outcome) => self.tally.record(outcome.as_ref()),
            Err(e) => {
                error!(error = %e, "Reconcile run panicked");
                self.tally.failed += 1;
            }
        }
    }

    async fn drain(&mut self) {
        while let Some(joined) = self.runs.join_next().await {
            self.observe(joined);
        }
    }

    async fn shutdown(&mut self) {
        let _ = self.cancel.send(true);
        self.mailbox.close();

        let mut dropped = 0usize;
        while let Ok(msg) = self.mailbox.try_recv() {
            match msg {
                SchedulerMessage::Reconcile { .. } => dropped += 1,
                SchedulerMessage::Flush { response } | SchedulerMessage::Shutdown { response } => {
                    // Answered after the drain below with an empty tally
                    let _ = response.send(RunTally::default());
                }
            }
        }
        if dropped > 0 {
            warn!(dropped, "Discarded queued reconcile requests at shutdown");
        }
        self.tally.cancelled += dropped;

        self.drain().await;
    }
}

/// Handle for sending requests to the scheduler actor
#[derive(Clone)]
pub struct ReconcileHandle {
    sender: mpsc::Sender<SchedulerMessage>,
}

impl ReconcileHandle {
    /// Wait until every run requested before this call has finished.
    /// Returns the outcomes collected since the previous flush.
    pub async fn flush(&self) -> Result<RunTally> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerMessage::Flush { response: tx })
            .await
            .map_err(|_| WalletError::Concurrency("Scheduler mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| WalletError::Concurrency("Response channel closed".to_string()))
    }

    /// Stop the scheduler
    pub async fn shutdown(&self) -> Result<RunTally> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerMessage::Shutdown { response: tx })
            .await
            .map_err(|_| WalletError::Concurrency("Scheduler mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| WalletError::Concurrency("Response channel closed".to_string()))
    }
}

impl ReconcileTrigger for ReconcileHandle {
    fn schedule(&self, wallet_id: &WalletId) {
        let msg = SchedulerMessage::Reconcile {
            wallet_id: wallet_id.clone(),
        };

        match self.sender.try_send(msg) {
            Ok(()) => debug!(wallet_id = %wallet_id, "Scheduled reconciliation"),
            Err(TrySendError::Full(_)) => {
                metrics::QUEUE_DROPPED.inc();
                warn!(wallet_id = %wallet_id, "Reconcile queue full; relying on a later run");
            }
            Err(TrySendError::Closed(_)) => {
                metrics::QUEUE_DROPPED.inc();
                warn!(wallet_id = %wallet_id, "Reconcile scheduler stopped; request dropped");
            }
        }
    }
}

/// Spawn the scheduler actor
pub fn spawn_reconcile_scheduler(reconciler: Arc<Reconciler>, capacity: usize) -> ReconcileHandle {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (cancel, _) = watch::channel(false);

    let actor = SchedulerActor {
        reconciler,
        mailbox: rx,
        runs: JoinSet::new(),
        cancel,
        tally: RunTally::default(),
    };

    tokio::spawn(async move {
        actor.run().await;
    });

    ReconcileHandle { sender: tx }
}
