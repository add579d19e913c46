//! Scanner loop: probe → reconcile → sleep, until stopped.
//!
//! At most one loop runs per [`ScannerLoop`]. Start and stop are serialized
//! through one async mutex; cancellation is cooperative, so an in-flight
//! sweep always finishes before the loop exits. Loop sweeps and on-demand
//! sweeps share one reconcile lock, taken after the probe returns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use netwarden_audit::AuditLog;
use netwarden_core::events::{EventPayload, MonitorEvent};
use netwarden_core::Clock;
use netwarden_store::DeviceStore;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::probe::Prober;
use crate::reconcile::{self, ReconcileSummary};

/// Everything one sweep needs. Cheap to clone into the loop task.
#[derive(Clone)]
pub struct Sweeper {
    prober: Arc<dyn Prober>,
    store: Arc<dyn DeviceStore>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
    bus: broadcast::Sender<MonitorEvent>,
    range: IpNet,
    reconcile_lock: Arc<AsyncMutex<()>>,
}

impl Sweeper {
    pub fn new(
        prober: Arc<dyn Prober>,
        store: Arc<dyn DeviceStore>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
        bus: broadcast::Sender<MonitorEvent>,
        range: IpNet,
    ) -> Self {
        Self {
            prober,
            store,
            audit,
            clock,
            bus,
            range,
            reconcile_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Execute a single sweep: probe → plan → persist → audit.
    ///
    /// No lock is held across the probe. Snapshot, plan and apply run under
    /// the reconcile lock, and `now` is taken once it is held.
    pub async fn run_sweep(&self) -> Result<ReconcileSummary> {
        let scan_id = Uuid::new_v4();
        let start = Instant::now();
        self.publish(EventPayload::ScanStarted {
            scan_id,
            target: self.range.to_string(),
        });

        let outcome = self.probe_and_reconcile().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            Ok(summary) => {
                tracing::info!(
                    scan_id = %scan_id,
                    target_range = %self.range,
                    observed = summary.observed,
                    new = summary.new_count,
                    moved = summary.moved_count,
                    disconnected = summary.disconnected_count,
                    duration_ms,
                    "Sweep complete"
                );
                self.publish(EventPayload::ScanCompleted {
                    scan_id,
                    observed: summary.observed,
                    new_count: summary.new_count,
                    moved_count: summary.moved_count,
                    reconnected_count: summary.reconnected_count,
                    disconnected_count: summary.disconnected_count,
                    duration_ms,
                });
            }
            Err(e) => self.publish(EventPayload::ScanFailed {
                scan_id,
                error: e.to_string(),
            }),
        }

        outcome
    }

    async fn probe_and_reconcile(&self) -> Result<ReconcileSummary> {
        let observations = self.prober.probe(&self.range).await?;
        let _guard = self.reconcile_lock.lock().await;
        let now = self.clock.now();
        reconcile::reconcile(&observations, &*self.store, &*self.audit, now).await
    }

    fn publish(&self, payload: EventPayload) {
        // No subscribers is not an error.
        let _ = self.bus.send(MonitorEvent::new(self.clock.now(), payload));
    }
}

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    AlreadyIdle,
}

/// Point-in-time view of the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanStatus {
    pub running: bool,
    pub interval_secs: u64,
    pub sweeps_completed: u64,
    pub sweeps_failed: u64,
    pub last_sweep_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct LastSweep {
    at: Option<DateTime<Utc>>,
    error: Option<String>,
}

#[derive(Debug, Default)]
struct LoopStats {
    running: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
    last: Mutex<LastSweep>,
}

impl LoopStats {
    fn record(&self, at: DateTime<Utc>, error: Option<String>) {
        let counter = if error.is_some() {
            &self.failed
        } else {
            &self.completed
        };
        counter.fetch_add(1, Ordering::SeqCst);

        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        last.at = Some(at);
        last.error = error;
    }
}

struct LoopTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// The recurring sweep task and its idle/running state.
pub struct ScannerLoop {
    sweeper: Sweeper,
    interval: Duration,
    task: AsyncMutex<Option<LoopTask>>,
    stats: Arc<LoopStats>,
}

impl ScannerLoop {
    pub fn new(sweeper: Sweeper, interval: Duration) -> Self {
        Self {
            sweeper,
            interval,
            task: AsyncMutex::new(None),
            stats: Arc::new(LoopStats::default()),
        }
    }

    pub fn sweeper(&self) -> &Sweeper {
        &self.sweeper
    }

    /// Spawn the loop unless one is already running. Returns immediately.
    pub async fn start(&self) -> StartOutcome {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return StartOutcome::AlreadyRunning;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            self.sweeper.clone(),
            self.interval,
            token.clone(),
            Arc::clone(&self.stats),
        ));
        *task = Some(LoopTask { token, handle });
        self.stats.running.store(true, Ordering::SeqCst);

        tracing::info!(interval_secs = self.interval.as_secs(), "Scanner loop started");
        StartOutcome::Started
    }

    /// Cancel the loop and wait for its current iteration to finish.
    pub async fn stop(&self) -> StopOutcome {
        let mut task = self.task.lock().await;
        let Some(LoopTask { token, handle }) = task.take() else {
            return StopOutcome::AlreadyIdle;
        };

        token.cancel();
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Scanner loop task panicked");
        }
        self.stats.running.store(false, Ordering::SeqCst);

        tracing::info!("Scanner loop stopped");
        StopOutcome::Stopped
    }

    /// Never waits on start/stop.
    pub fn status(&self) -> ScanStatus {
        let last = self.stats.last.lock().unwrap_or_else(|e| e.into_inner());
        ScanStatus {
            running: self.stats.running.load(Ordering::SeqCst),
            interval_secs: self.interval.as_secs(),
            sweeps_completed: self.stats.completed.load(Ordering::SeqCst),
            sweeps_failed: self.stats.failed.load(Ordering::SeqCst),
            last_sweep_at: last.at,
            last_error: last.error.clone(),
        }
    }
}

impl Drop for ScannerLoop {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().as_ref() {
            task.token.cancel();
        }
    }
}

async fn run_loop(
    sweeper: Sweeper,
    interval: Duration,
    token: CancellationToken,
    stats: Arc<LoopStats>,
) {
    loop {
        if token.is_cancelled() {
            break;
        }

        let error = match sweeper.run_sweep().await {
            Ok(_) => None,
            Err(e) => {
                tracing::error!(error = %e, "Sweep failed; next sweep proceeds on schedule");
                Some(e.to_string())
            }
        };
        stats.record(sweeper.clock.now(), error);

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::probe::MockProber;
    use netwarden_audit::{AuditQuery, MemoryAuditLog};
    use netwarden_core::{HardwareId, ManualClock, Observation};
    use netwarden_store::MemoryDeviceStore;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000 + secs, 0).unwrap()
    }

    fn one_device() -> Vec<Observation> {
        vec![Observation {
            address: "10.0.0.5".parse().unwrap(),
            hardware_id: HardwareId::parse("aa:bb").unwrap(),
        }]
    }

    fn sweeper(prober: MockProber, audit: Arc<MemoryAuditLog>) -> (Sweeper, broadcast::Receiver<MonitorEvent>) {
        let (bus, rx) = broadcast::channel(64);
        let sweeper = Sweeper::new(
            Arc::new(prober),
            Arc::new(MemoryDeviceStore::new()),
            audit,
            Arc::new(ManualClock::new(at(0))),
            bus,
            "10.0.0.0/24".parse().unwrap(),
        );
        (sweeper, rx)
    }

    #[tokio::test]
    async fn test_sweep_publishes_lifecycle_events() {
        let mut prober = MockProber::new();
        prober.expect_probe().returning(|_| Ok(one_device()));
        let audit = Arc::new(MemoryAuditLog::new());
        let (sweeper, mut rx) = sweeper(prober, Arc::clone(&audit));

        let summary = sweeper.run_sweep().await.unwrap();
        assert_eq!(summary.new_count, 1);
        assert_eq!(audit.len(), 1);

        assert!(matches!(
            rx.recv().await.unwrap().payload,
            EventPayload::ScanStarted { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap().payload,
            EventPayload::ScanCompleted { new_count: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_probe_failure_surfaces_and_records_nothing() {
        let mut prober = MockProber::new();
        prober.expect_probe().returning(|_| {
            Err(ProbeError::PermissionDenied {
                stderr: "requires root privileges".into(),
            })
        });
        let audit = Arc::new(MemoryAuditLog::new());
        let (sweeper, mut rx) = sweeper(prober, Arc::clone(&audit));

        let err = sweeper.run_sweep().await.unwrap_err();
        assert!(matches!(err, crate::DiscoverError::Probe(_)));
        assert!(audit.is_empty());

        rx.recv().await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap().payload,
            EventPayload::ScanFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let mut prober = MockProber::new();
        prober.expect_probe().returning(|_| Ok(Vec::new()));
        let audit = Arc::new(MemoryAuditLog::new());
        let (sweeper, _rx) = sweeper(prober, Arc::clone(&audit));
        let scanner = ScannerLoop::new(sweeper, Duration::from_secs(3600));

        assert_eq!(scanner.stop().await, StopOutcome::AlreadyIdle);
        assert_eq!(scanner.start().await, StartOutcome::Started);
        assert_eq!(scanner.start().await, StartOutcome::AlreadyRunning);
        assert!(scanner.status().running);

        assert_eq!(scanner.stop().await, StopOutcome::Stopped);
        assert_eq!(scanner.stop().await, StopOutcome::AlreadyIdle);
        assert!(!scanner.status().running);
        assert!(audit.query(&AuditQuery::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_starts_spawn_one_loop() {
        let mut prober = MockProber::new();
        prober.expect_probe().times(1).returning(|_| Ok(Vec::new()));
        let audit = Arc::new(MemoryAuditLog::new());
        let (sweeper, mut rx) = sweeper(prober, audit);
        let scanner = Arc::new(ScannerLoop::new(sweeper, Duration::from_secs(3600)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scanner = Arc::clone(&scanner);
                tokio::spawn(async move { scanner.start().await })
            })
            .collect();
        let mut started = 0;
        for handle in handles {
            if handle.await.unwrap() == StartOutcome::Started {
                started += 1;
            }
        }
        assert_eq!(started, 1);

        while !matches!(
            rx.recv().await.unwrap().payload,
            EventPayload::ScanCompleted { .. }
        ) {}
        scanner.stop().await;
        assert_eq!(scanner.status().sweeps_completed, 1);
    }

    #[tokio::test]
    async fn test_failed_sweep_does_not_stop_the_loop() {
        let mut prober = MockProber::new();
        let mut calls = 0;
        prober.expect_probe().returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(ProbeError::Timeout { secs: 120 })
            } else {
                Ok(one_device())
            }
        });
        let audit = Arc::new(MemoryAuditLog::new());
        let (sweeper, mut rx) = sweeper(prober, Arc::clone(&audit));
        let scanner = ScannerLoop::new(sweeper, Duration::from_millis(10));

        scanner.start().await;
        loop {
            if let EventPayload::ScanCompleted { .. } = rx.recv().await.unwrap().payload {
                break;
            }
        }
        scanner.stop().await;

        let status = scanner.status();
        assert!(status.sweeps_failed >= 1);
        assert!(status.sweeps_completed >= 1);
        assert!(!status.running);
        assert!(!audit.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_sweeps_create_one_device() {
        let mut prober = MockProber::new();
        prober.expect_probe().times(2).returning(|_| Ok(one_device()));
        let audit = Arc::new(MemoryAuditLog::new());
        let (sweeper, _rx) = sweeper(prober, Arc::clone(&audit));
        let scanner = Arc::new(ScannerLoop::new(sweeper, Duration::from_secs(3600)));

        let on_demand = {
            let scanner = Arc::clone(&scanner);
            tokio::spawn(async move { scanner.sweeper().run_sweep().await })
        };
        let looped = scanner.sweeper().clone();
        let (a, b) = tokio::join!(on_demand, looped.run_sweep());
        let summaries = [a.unwrap().unwrap(), b.unwrap()];

        assert_eq!(summaries.iter().map(|s| s.new_count).sum::<u32>(), 1);
        assert_eq!(audit.len(), 2);
        let first_connections = audit
            .query(&AuditQuery::default())
            .unwrap()
            .into_iter()
            .filter(|r| r.event.details == "First connection")
            .count();
        assert_eq!(first_connections, 1);
    }
}
