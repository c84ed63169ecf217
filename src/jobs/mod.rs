//! Scheduled Jobs
//!
//! Fixed-interval polling of all source stores.
//! One cycle runs immediately on start, then one per interval. Cycles never
//! overlap: the loop is a single task and ticks missed while a cycle is
//! still running are skipped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::pool::CloseReport;
use crate::relay::{CycleReport, RelayWorker};
use crate::store::Connector;

// =========================================================================
// Status Board
// =========================================================================

/// Scheduler state shared with the status endpoint
#[derive(Debug)]
pub struct StatusBoard {
    running: AtomicBool,
    polling_interval: Duration,
    monitored_databases: Vec<String>,
    cycles_completed: AtomicU64,
    last_cycle: RwLock<Option<CycleReport>>,
}

/// Point-in-time view of the scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub polling_interval_secs: u64,
    pub monitored_databases: Vec<String>,
    pub cycles_completed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<CycleReport>,
}

impl StatusBoard {
    pub fn new(polling_interval: Duration, monitored_databases: Vec<String>) -> Self {
        Self {
            running: AtomicBool::new(false),
            polling_interval,
            monitored_databases,
            cycles_completed: AtomicU64::new(0),
            last_cycle: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::SeqCst)
    }

    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle.read().clone()
    }

    pub fn snapshot(&self) -> SchedulerStatus {
        SchedulerStatus {
            is_running: self.is_running(),
            polling_interval_secs: self.polling_interval.as_secs(),
            monitored_databases: self.monitored_databases.clone(),
            cycles_completed: self.cycles_completed(),
            last_cycle: self.last_cycle(),
        }
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    fn record(&self, report: CycleReport) {
        *self.last_cycle.write() = Some(report);
        self.cycles_completed.fetch_add(1, Ordering::SeqCst);
    }
}

// =========================================================================
// Polling Scheduler
// =========================================================================

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Polling Scheduler - drives `RelayWorker::poll_all` on a fixed interval
pub struct PollingScheduler<C: Connector> {
    worker: Arc<Mutex<RelayWorker<C>>>,
    interval: Duration,
    running: Option<RunningLoop>,
    board: Arc<StatusBoard>,
}

impl<C: Connector> PollingScheduler<C> {
    /// Create a scheduler; the interval comes from the worker's settings
    pub fn new(worker: RelayWorker<C>) -> Self {
        let interval = worker.settings().polling_interval;
        let databases = worker.sources().iter().map(|s| s.name.clone()).collect();

        Self {
            worker: Arc::new(Mutex::new(worker)),
            interval,
            running: None,
            board: Arc::new(StatusBoard::new(interval, databases)),
        }
    }

    pub fn status_board(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.board)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start polling. Runs the first cycle before returning; a second call
    /// while running does nothing.
    pub async fn start(&mut self) {
        if self.running.is_some() {
            tracing::warn!("Polling already running");
            return;
        }

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Starting polling"
        );
        self.board.set_running(true);

        run_cycle(&self.worker, &self.board).await;

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let worker = Arc::clone(&self.worker);
        let board = Arc::clone(&self.board);
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                // Shutdown wins over a tick that became due during a long cycle
                tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        run_cycle(&worker, &board).await;
                    }
                }
            }

            tracing::debug!("Polling loop exited");
        });

        self.running = Some(RunningLoop { shutdown, handle });
    }

    /// Stop future cycles; waits for an in-flight cycle to finish
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        tracing::info!("Stopping polling");
        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "Polling task ended abnormally");
        }

        self.board.set_running(false);
    }

    /// Run one cycle now, outside the schedule
    pub async fn run_once(&self) -> CycleReport {
        let mut worker = self.worker.lock().await;
        let report = worker.poll_all().await;
        self.board.record(report.clone());
        report
    }

    /// Close all pools held by the worker
    pub async fn close_pools(&self) -> CloseReport {
        self.worker.lock().await.close_all().await
    }
}

async fn run_cycle<C: Connector>(worker: &Mutex<RelayWorker<C>>, board: &StatusBoard) {
    let mut worker = worker.lock().await;
    let report = worker.poll_all().await;

    if report.total_failed() > 0 {
        tracing::warn!(
            cycle_id = %report.cycle_id,
            failed = report.total_failed(),
            "Poll cycle finished with failures"
        );
    }

    board.record(report);
}

// =========================================================================
// Tests
// =========================================================================
