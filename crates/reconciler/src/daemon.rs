use crate::reconciler::{CancelFlag, ReconcileOutcome, Reconciler};
use crate::{ReconcileError, Result};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use rightsizer_fingerprint::IGNORED_SCOPES;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time;

const DEFAULT_TRIGGER_REASON: &str = "fs_event";
const POLL_TRIGGER_REASON: &str = "poll_tick";

#[derive(Debug, Clone, Copy)]
pub struct WatchConfig {
    /// Quiet period after the last filesystem event before a pass runs.
    pub debounce: Duration,
    /// Upper bound on how long a busy event stream can defer a pass.
    pub max_batch_wait: Duration,
    /// Cadence of the timer trigger; drift is re-checked even without
    /// filesystem events.
    pub poll_interval: Duration,
    pub notify_poll_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(750),
            max_batch_wait: Duration::from_secs(3),
            poll_interval: Duration::from_secs(300),
            notify_poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileUpdate {
    pub completed_at: SystemTime,
    pub duration_ms: u64,
    pub success: bool,
    pub reason: String,
    pub outcome: Option<ReconcileOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    pub last_success: Option<SystemTime>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_duration_ms: Option<u64>,
    pub pending_events: usize,
    pub reconciling: bool,
}

impl DaemonHealth {
    fn initial() -> Self {
        Self {
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
            last_duration_ms: None,
            pending_events: 0,
            reconciling: false,
        }
    }
}

enum DaemonCommand {
    Trigger { reason: String },
    Shutdown,
}

/// Background loop that keeps one source reconciled.
///
/// Filesystem events (debounced), the periodic poll tick, and explicit
/// [`WatchDaemon::trigger`] calls all enter the same reconciliation path.
#[derive(Clone)]
pub struct WatchDaemon {
    inner: Arc<WatchDaemonInner>,
}

struct WatchDaemonInner {
    command_tx: mpsc::Sender<DaemonCommand>,
    update_tx: broadcast::Sender<ReconcileUpdate>,
    health_tx: watch::Sender<DaemonHealth>,
    _watcher: std::sync::Mutex<Option<RecommendedWatcher>>,
}

impl WatchDaemon {
    pub fn start(reconciler: Arc<Reconciler>, config: WatchConfig) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (command_tx, command_rx) = mpsc::channel(16);
        let (health_tx, _health_rx) = watch::channel(DaemonHealth::initial());
        let (update_tx, _) = broadcast::channel(32);

        let watcher =
            create_fs_watcher(reconciler.root(), event_tx, config.notify_poll_interval)?;

        spawn_reconcile_loop(
            reconciler,
            config,
            event_rx,
            command_rx,
            update_tx.clone(),
            health_tx.clone(),
        );

        Ok(Self {
            inner: Arc::new(WatchDaemonInner {
                command_tx,
                update_tx,
                health_tx,
                _watcher: std::sync::Mutex::new(Some(watcher)),
            }),
        })
    }

    /// Explicit "check now"; maps to the same transition as a poll tick.
    pub async fn trigger(&self, reason: impl Into<String>) -> Result<()> {
        self.inner
            .command_tx
            .send(DaemonCommand::Trigger {
                reason: reason.into(),
            })
            .await
            .map_err(|e| ReconcileError::Other(format!("failed to send trigger: {e}")))?;
        Ok(())
    }

    #[must_use]
    pub fn subscribe_updates(&self) -> broadcast::Receiver<ReconcileUpdate> {
        self.inner.update_tx.subscribe()
    }

    #[must_use]
    pub fn health_snapshot(&self) -> DaemonHealth {
        self.inner.health_tx.subscribe().borrow().clone()
    }

    #[must_use]
    pub fn health_stream(&self) -> watch::Receiver<DaemonHealth> {
        self.inner.health_tx.subscribe()
    }
}

impl Drop for WatchDaemon {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            let _ = self.inner.command_tx.try_send(DaemonCommand::Shutdown);
        }
    }
}

fn create_fs_watcher(
    root: &Path,
    sender: mpsc::Sender<notify::Result<Event>>,
    poll_interval: Duration,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = sender.blocking_send(res);
        },
        NotifyConfig::default().with_poll_interval(poll_interval),
    )
    .map_err(|e| ReconcileError::Other(format!("watcher init failed: {e}")))?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| ReconcileError::Other(format!("failed to watch {}: {e}", root.display())))?;
    Ok(watcher)
}

struct DebounceState {
    debounce: Duration,
    max_batch: Duration,
    dirty: bool,
    pending: usize,
    last_event: Option<Instant>,
    first_event: Option<Instant>,
    reason: Option<String>,
    force_immediate: bool,
}

impl DebounceState {
    fn new(debounce: Duration, max_batch: Duration) -> Self {
        Self {
            debounce,
            max_batch,
            dirty: false,
            pending: 0,
            last_event: None,
            first_event: None,
            reason: None,
            force_immediate: false,
        }
    }

    fn record_event(&mut self, count: usize, reason: &str) {
        self.pending += count.max(1);
        self.reason = Some(reason.to_string());
        self.last_event = Some(Instant::now());
        self.first_event.get_or_insert_with(Instant::now);
        self.dirty = true;
    }

    fn force_run(&mut self, reason: String) {
        self.pending += 1;
        self.reason = Some(reason);
        self.force_immediate = true;
        self.dirty = true;
    }

    const fn pending(&self) -> usize {
        self.pending
    }

    const fn should_run(&self) -> bool {
        self.dirty
    }

    fn next_deadline(&self) -> Option<time::Instant> {
        if !self.dirty {
            return None;
        }

        if self.force_immediate {
            return Some(time::Instant::now());
        }

        let mut deadline = self.last_event.map(|last| last + self.debounce);

        if let Some(first) = self.first_event {
            let forced = first + self.max_batch;
            deadline = Some(match deadline {
                Some(current) if forced < current => forced,
                Some(current) => current,
                None => forced,
            });
        }

        deadline.map(time::Instant::from_std)
    }

    fn take_reason(&mut self) -> Option<String> {
        self.reason.take()
    }

    fn reset(&mut self) {
        self.dirty = false;
        self.pending = 0;
        self.last_event = None;
        self.first_event = None;
        self.force_immediate = false;
    }
}

fn spawn_reconcile_loop(
    reconciler: Arc<Reconciler>,
    config: WatchConfig,
    mut event_rx: mpsc::Receiver<notify::Result<Event>>,
    mut command_rx: mpsc::Receiver<DaemonCommand>,
    update_tx: broadcast::Sender<ReconcileUpdate>,
    health_tx: watch::Sender<DaemonHealth>,
) {
    tokio::spawn(async move {
        let mut state = DebounceState::new(config.debounce, config.max_batch_wait);
        let mut health = DaemonHealth::initial();
        let mut poll = time::interval_at(
            time::Instant::now() + config.poll_interval,
            config.poll_interval,
        );
        poll.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            let next_deadline = state.next_deadline();

            tokio::select! {
                Some(event) = event_rx.recv() => {
                    if handle_event(reconciler.root(), event, &mut state) {
                        health.pending_events = state.pending();
                        let _ = health_tx.send(health.clone());
                    }
                }
                Some(cmd) = command_rx.recv() => {
                    match cmd {
                        DaemonCommand::Trigger { reason } => {
                            state.force_run(reason);
                            health.pending_events = state.pending();
                            let _ = health_tx.send(health.clone());
                        }
                        DaemonCommand::Shutdown => break,
                    }
                }
                _ = poll.tick() => {
                    state.record_event(1, POLL_TRIGGER_REASON);
                }
                () = async {
                    if let Some(deadline) = next_deadline {
                        time::sleep_until(deadline).await;
                    }
                }, if state.should_run() && next_deadline.is_some() => {
                    health.reconciling = true;
                    let _ = health_tx.send(health.clone());

                    let reason = state
                        .take_reason()
                        .unwrap_or_else(|| DEFAULT_TRIGGER_REASON.to_string());
                    let started = Instant::now();
                    let result = reconciler.run_once(&CancelFlag::new()).await;
                    let duration_ms = started.elapsed().as_millis() as u64;

                    match result {
                        Ok(outcome) => {
                            health.last_success = Some(SystemTime::now());
                            health.last_error = None;
                            health.consecutive_failures = 0;
                            let _ = update_tx.send(ReconcileUpdate {
                                completed_at: SystemTime::now(),
                                duration_ms,
                                success: true,
                                reason,
                                outcome: Some(outcome),
                                error: None,
                            });
                        }
                        Err(ReconcileError::ReconciliationInProgress(source)) => {
                            // A racing manual pass holds the lease; this tick
                            // is dropped, not queued.
                            log::debug!(
                                "Reconciliation already in progress for {source}; skipping tick"
                            );
                        }
                        Err(err) => {
                            log::error!("Reconciliation failed: {err}");
                            health.last_error = Some(err.to_string());
                            health.consecutive_failures += 1;
                            let _ = update_tx.send(ReconcileUpdate {
                                completed_at: SystemTime::now(),
                                duration_ms,
                                success: false,
                                reason,
                                outcome: None,
                                error: Some(err.to_string()),
                            });
                        }
                    }

                    health.reconciling = false;
                    health.pending_events = 0;
                    health.last_duration_ms = Some(duration_ms);
                    let _ = health_tx.send(health.clone());
                    state.reset();
                }
            }
        }
    });
}

fn handle_event(root: &Path, event: notify::Result<Event>, state: &mut DebounceState) -> bool {
    match event {
        Ok(evt) => {
            if evt.paths.is_empty() {
                state.record_event(1, DEFAULT_TRIGGER_REASON);
                return true;
            }

            let relevant = evt
                .paths
                .iter()
                .filter(|path| is_relevant_path(root, path))
                .count();
            if relevant > 0 {
                state.record_event(relevant, DEFAULT_TRIGGER_REASON);
                return true;
            }
            false
        }
        Err(err) => {
            log::warn!("Watcher error: {err}");
            false
        }
    }
}

fn is_relevant_path(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };

    for component in relative.components() {
        if let std::path::Component::Normal(name) = component {
            let name = name.to_string_lossy().to_lowercase();
            if name.starts_with('.') {
                return false;
            }
            if IGNORED_SCOPES.iter().any(|ignored| ignored == &name) {
                return false;
            }
        }
    }
    true
}
