use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::SyncConfig;
use super::handle::{PendingChanges, SyncCommand, SyncCounters, SyncHandle};
use crate::builder::{BuildMode, BuildOutcome, IndexBuilder};
use crate::lock::BuildLockManager;
use crate::store::{ChangeEvent, ChangeOp, EntryStore, TmId};

/// Result of one build task as seen by the coordinator.
#[derive(Debug)]
enum Completion {
    Finished(BuildOutcome),
    Failed { message: String, tm_missing: bool },
}

#[derive(Debug, Default)]
struct TmSyncState {
    /// When the next build may start; `None` while idle.
    due: Option<Instant>,
    pending: PendingChanges,
    /// Next build ignores the up-to-date check.
    force: bool,
    in_flight: bool,
    /// Changes arrived while a build was running.
    follow_up: bool,
    /// Consecutive failed builds.
    failures: u32,
    /// Consecutive contended attempts.
    contended: u32,
}

impl TmSyncState {
    fn is_idle(&self) -> bool {
        self.due.is_none() && !self.in_flight && !self.follow_up && !self.force
    }
}

/// Turns change notifications into debounced, serialized index builds.
///
/// One actor task owns all per-TM scheduling state. Each change resets the TM's
/// debounce timer; when it expires, a build runs as a separate task. Changes that
/// arrive during a build schedule exactly one follow-up build. A periodic sweep
/// reclaims stale locks and schedules dirty TMs whose notification was lost.
pub struct AutoSyncCoordinator {
    builder: Arc<IndexBuilder>,
    locks: Arc<BuildLockManager>,
    store: Arc<EntryStore>,
    config: SyncConfig,
    rx: mpsc::Receiver<SyncCommand>,
    done_tx: mpsc::UnboundedSender<(TmId, Completion)>,
    done_rx: mpsc::UnboundedReceiver<(TmId, Completion)>,
    counters: Arc<SyncCounters>,
    states: HashMap<TmId, TmSyncState>,
}

impl AutoSyncCoordinator {
    pub fn new(
        builder: Arc<IndexBuilder>,
        locks: Arc<BuildLockManager>,
        store: Arc<EntryStore>,
        config: SyncConfig,
    ) -> (Self, SyncHandle) {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(SyncCounters::default());
        let handle = SyncHandle::new(tx, Arc::clone(&counters));
        let coordinator = Self {
            builder,
            locks,
            store,
            config,
            rx,
            done_tx,
            done_rx,
            counters,
            states: HashMap::new(),
        };
        (coordinator, handle)
    }

    /// Creates the coordinator and runs it on the current tokio runtime.
    pub fn spawn(
        builder: Arc<IndexBuilder>,
        locks: Arc<BuildLockManager>,
        store: Arc<EntryStore>,
        config: SyncConfig,
    ) -> (SyncHandle, JoinHandle<()>) {
        let (coordinator, handle) = Self::new(builder, locks, store, config);
        (handle, tokio::spawn(coordinator.run()))
    }

    pub async fn run(mut self) {
        info!(
            debounce_ms = self.config.debounce.as_millis() as u64,
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            max_build_retries = self.config.max_build_retries,
            "Auto-sync coordinator started"
        );

        let mut sweep = time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let next_due = self.next_due();
            // Queued commands first, so a backlog of changes is folded into the
            // debounce state before any timer fires.
            tokio::select! {
                biased;
                command = self.rx.recv() => match command {
                    Some(SyncCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some((tm_id, completion)) = self.done_rx.recv() => {
                    self.on_completion(tm_id, completion);
                }
                _ = sleep_until_due(next_due) => self.start_due_builds(),
                _ = sweep.tick() => self.sweep(),
            }
        }

        self.rx.close();
        self.drain_in_flight().await;
        info!("Auto-sync coordinator stopped");
    }

    fn handle_command(&mut self, command: SyncCommand) {
        match command {
            SyncCommand::Change(event) => self.on_change(event),
            SyncCommand::Rebuild(tm_id) => {
                let state = self.states.entry(tm_id).or_default();
                state.force = true;
                state.failures = 0;
                if state.in_flight {
                    state.follow_up = true;
                } else {
                    state.due = Some(Instant::now());
                }
                debug!(tm_id, "Rebuild requested");
            }
            SyncCommand::Forget(tm_id) => {
                if self.states.remove(&tm_id).is_some() {
                    debug!(tm_id, "Dropped sync state for deleted TM");
                }
            }
            SyncCommand::Shutdown => {}
        }
    }

    fn on_change(&mut self, event: ChangeEvent) {
        SyncCounters::bump(&self.counters.notifications);
        let debounce = self.config.debounce;
        let state = self.states.entry(event.tm_id).or_default();
        state.pending.record(&event);
        // A new mutation earns a fresh retry budget.
        if event.op != ChangeOp::Reconcile {
            state.failures = 0;
        }

        if state.in_flight {
            state.follow_up = true;
            return;
        }
        let now = Instant::now();
        state.due = match (event.op, state.due) {
            // Reconciliation never postpones a build already scheduled.
            (ChangeOp::Reconcile, Some(due)) => Some(due),
            (ChangeOp::Reconcile, None) => Some(now),
            _ => Some(now + debounce),
        };
    }

    fn next_due(&self) -> Option<Instant> {
        self.states
            .values()
            .filter(|s| !s.in_flight)
            .filter_map(|s| s.due)
            .min()
    }

    fn start_due_builds(&mut self) {
        let now = Instant::now();
        let due: Vec<TmId> = self
            .states
            .iter()
            .filter(|(_, s)| !s.in_flight && s.due.is_some_and(|d| d <= now))
            .map(|(id, _)| *id)
            .collect();
        for tm_id in due {
            self.start_build(tm_id);
        }
    }

    fn start_build(&mut self, tm_id: TmId) {
        let Some(state) = self.states.get_mut(&tm_id) else {
            return;
        };
        state.due = None;
        state.in_flight = true;
        let mode = if std::mem::take(&mut state.force) {
            BuildMode::Force
        } else {
            BuildMode::IfStale
        };
        let pending = std::mem::take(&mut state.pending);
        SyncCounters::bump(&self.counters.builds_fired);
        info!(tm_id, ?mode, "auto-sync: {pending}");

        let builder = Arc::clone(&self.builder);
        let build = tokio::spawn(async move { builder.build(tm_id, mode).await });
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let completion = match build.await {
                Ok(Ok(outcome)) => Completion::Finished(outcome),
                Ok(Err(e)) => Completion::Failed {
                    tm_missing: e.is_tm_missing(),
                    message: e.to_string(),
                },
                Err(e) => Completion::Failed {
                    message: format!("build task aborted: {e}"),
                    tm_missing: false,
                },
            };
            let _ = done.send((tm_id, completion));
        });
    }

    fn on_completion(&mut self, tm_id: TmId, completion: Completion) {
        if let Completion::Failed {
            tm_missing: true, ..
        } = completion
        {
            self.states.remove(&tm_id);
            debug!(tm_id, "TM deleted before its build ran");
            return;
        }

        let config = &self.config;
        let counters = &self.counters;
        let Some(state) = self.states.get_mut(&tm_id) else {
            debug!(tm_id, "Build finished for a forgotten TM");
            return;
        };
        state.in_flight = false;
        let now = Instant::now();

        match completion {
            Completion::Finished(BuildOutcome::Contended { holder, .. }) => {
                SyncCounters::bump(&counters.builds_contended);
                state.contended += 1;
                let delay = config.backoff(state.contended);
                // The retry covers anything that arrived meanwhile.
                state.follow_up = false;
                state.due = Some(now + delay);
                debug!(
                    tm_id,
                    ?holder,
                    retry_in_ms = delay.as_millis() as u64,
                    "Build lock busy; retrying later"
                );
            }
            Completion::Finished(_) => {
                SyncCounters::bump(&counters.builds_completed);
                state.failures = 0;
                state.contended = 0;
                if std::mem::take(&mut state.follow_up) {
                    SyncCounters::bump(&counters.follow_ups);
                    state.due = Some(now);
                }
            }
            Completion::Failed { message, .. } => {
                SyncCounters::bump(&counters.builds_failed);
                state.failures += 1;
                state.contended = 0;
                let follow_up = std::mem::take(&mut state.follow_up);
                if follow_up || state.failures <= config.max_build_retries {
                    let delay = config.backoff(state.failures);
                    state.due = Some(now + delay);
                    warn!(
                        tm_id,
                        attempt = state.failures,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %message,
                        "Index build failed; retrying"
                    );
                } else {
                    error!(
                        tm_id,
                        attempts = state.failures,
                        error = %message,
                        "Index build failed; giving up until the next change"
                    );
                }
            }
        }

        if state.is_idle() && state.failures == 0 {
            self.states.remove(&tm_id);
        }
    }

    /// Reclaims stale locks, resets abandoned builds and schedules dirty TMs that no
    /// notification reached.
    fn sweep(&mut self) {
        SyncCounters::bump(&self.counters.sweeps);

        match self.locks.reclaim_stale() {
            Ok(reclaimed) => {
                self.counters
                    .locks_reclaimed
                    .fetch_add(reclaimed.len() as u64, Ordering::Relaxed);
            }
            Err(e) => warn!(error = %e, "Stale lock sweep failed"),
        }

        let stale_before = self.locks.stale_cutoff_ms();
        match self.store.stuck_builds(stale_before) {
            Ok(stuck) => {
                for tm_id in stuck {
                    let ours = self.locks.is_held(tm_id)
                        || self.states.get(&tm_id).is_some_and(|s| s.in_flight);
                    if ours {
                        continue;
                    }
                    if let Err(e) = self.store.recover_interrupted_build(tm_id, stale_before) {
                        warn!(tm_id, error = %e, "Failed to recover interrupted build");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Stuck build scan failed"),
        }

        match self.store.dirty_tms() {
            Ok(dirty) => {
                for tm_id in dirty {
                    let waiting = self
                        .states
                        .get(&tm_id)
                        .is_some_and(|s| s.in_flight || s.due.is_some());
                    if waiting {
                        continue;
                    }
                    SyncCounters::bump(&self.counters.reconciled);
                    debug!(tm_id, "Sweep found unindexed changes");
                    self.on_change(ChangeEvent::new(tm_id, ChangeOp::Reconcile, 0));
                }
            }
            Err(e) => warn!(error = %e, "Dirty TM sweep failed"),
        }
    }

    async fn drain_in_flight(&mut self) {
        let in_flight = self.states.values().filter(|s| s.in_flight).count();
        if in_flight == 0 {
            return;
        }
        info!(in_flight, "Waiting for in-flight builds");

        let deadline = Instant::now() + self.config.shutdown_grace;
        let mut remaining = in_flight;
        while remaining > 0 {
            match time::timeout_at(deadline, self.done_rx.recv()).await {
                Ok(Some((tm_id, _))) => {
                    if self.states.get(&tm_id).is_some_and(|s| s.in_flight) {
                        remaining -= 1;
                    }
                    self.states.remove(&tm_id);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(remaining, "Shutdown grace elapsed with builds still running");
                    break;
                }
            }
        }
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(due) => time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}
