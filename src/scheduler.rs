//! Re-apply scheduling
//!
//! Two tasks:
//!
//! - Listener: power supply change events for either tracked device (re)arm a
//!   debounce deadline. When it expires, one apply pass runs. A burst of
//!   events inside the window costs a single pass.
//! - Heartbeat: on every tick, drain the hook counters to the log and re-apply
//!   if the charger silently reset the PD protocol mode.
//!
//! Apply passes take the store lock and do synchronous device I/O, so they
//! run on the blocking pool; the tasks only await them.
//!
//! `shutdown` stops both and waits for them, so no apply is in flight once it
//! returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::{spawn_blocking, JoinHandle};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::apply::Applier;
use crate::interception::RewriteStats;
use crate::uevent::PowerSupplyEvent;

/// Default debounce window
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Default heartbeat period
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub debounce: Duration,
    pub heartbeat: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

/// Listener state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    PendingDebounce,
}

#[derive(Debug, Default)]
struct Counters {
    debounced: AtomicU64,
    heartbeat: AtomicU64,
}

pub struct ReapplyScheduler {
    state: Arc<Mutex<SchedulerState>>,
    counters: Arc<Counters>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ReapplyScheduler {
    /// Spawn the listener and heartbeat tasks on the current runtime
    pub fn start(
        applier: Arc<Applier>,
        events: broadcast::Receiver<PowerSupplyEvent>,
        stats: Arc<RewriteStats>,
        config: SchedulerConfig,
    ) -> Self {
        let state = Arc::new(Mutex::new(SchedulerState::Idle));
        let counters = Arc::new(Counters::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener = tokio::spawn(listen(
            Arc::clone(&applier),
            events,
            config.debounce,
            Arc::clone(&state),
            Arc::clone(&counters),
            shutdown_rx.clone(),
        ));
        let heartbeat = tokio::spawn(heartbeat(
            applier,
            stats,
            config.heartbeat,
            Arc::clone(&counters),
            shutdown_rx,
        ));

        info!(
            "Reapply scheduler started (debounce {:?}, heartbeat {:?})",
            config.debounce, config.heartbeat
        );

        Self {
            state,
            counters,
            shutdown_tx,
            tasks: vec![listener, heartbeat],
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    /// Apply passes triggered by debounced change events
    pub fn debounced_applies(&self) -> u64 {
        self.counters.debounced.load(Ordering::Relaxed)
    }

    /// Apply passes triggered by heartbeat drift detection
    pub fn heartbeat_applies(&self) -> u64 {
        self.counters.heartbeat.load(Ordering::Relaxed)
    }

    /// Stop both tasks and wait until they have finished
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Scheduler task ended abnormally: {}", e);
            }
        }
        debug!("Reapply scheduler stopped");
    }
}

async fn listen(
    applier: Arc<Applier>,
    mut events: broadcast::Receiver<PowerSupplyEvent>,
    debounce: Duration,
    state: Arc<Mutex<SchedulerState>>,
    counters: Arc<Counters>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut deadline: Option<Instant> = None;
    let mut source_open = true;

    loop {
        let pending = deadline;
        let expiry = async move {
            match pending {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = shutdown.changed() => break,

            event = events.recv(), if source_open => {
                let relevant = match event {
                    Ok(event) => applier.store().role_of(&event.name).is_some(),
                    // Dropped events may have been ours
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Missed {} power supply events", n);
                        true
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Change source closed, heartbeat only");
                        source_open = false;
                        false
                    }
                };
                if relevant {
                    deadline = Some(Instant::now() + debounce);
                    *state.lock() = SchedulerState::PendingDebounce;
                }
            }

            _ = expiry => {
                deadline = None;
                let pass = Arc::clone(&applier);
                if let Err(e) = spawn_blocking(move || pass.apply()).await {
                    warn!("Debounced apply failed: {}", e);
                }
                counters.debounced.fetch_add(1, Ordering::Relaxed);
                *state.lock() = SchedulerState::Idle;
            }
        }
    }
}

async fn heartbeat(
    applier: Arc<Applier>,
    stats: Arc<RewriteStats>,
    period: Duration,
    counters: Arc<Counters>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let counts = stats.drain();
                if !counts.is_empty() {
                    debug!(
                        "Hooks: glink {}/{} rewritten (last original {}), \
                         show {} rewritten, {} no room, pd_verifed forced {}",
                        counts.glink_rewritten,
                        counts.glink_seen,
                        counts.glink_last_original,
                        counts.show_rewritten,
                        counts.show_no_room,
                        counts.pd_forced
                    );
                }
                let check = Arc::clone(&applier);
                match spawn_blocking(move || check.reapply_if_drifted()).await {
                    Ok(true) => {
                        counters.heartbeat.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Heartbeat check failed: {}", e),
                }
            }
        }
    }
}
