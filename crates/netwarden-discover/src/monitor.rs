//! Wiring: one store, one audit log, one event bus, one scanner loop.

use std::sync::Arc;
use std::time::Duration;

use ipnet::IpNet;
use netwarden_audit::AuditLog;
use netwarden_core::events::MonitorEvent;
use netwarden_core::Clock;
use netwarden_store::DeviceStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::console::Console;
use crate::identity::IdentityProvider;
use crate::probe::Prober;
use crate::scanner::{ScannerLoop, Sweeper};
use crate::status::{spawn_signal_listener, Signaler, StatusAggregator};

/// Capacity of the in-process event bus.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// The collaborators a monitor is built from.
pub struct MonitorParts {
    pub prober: Arc<dyn Prober>,
    pub store: Arc<dyn DeviceStore>,
    pub audit: Arc<dyn AuditLog>,
    pub signaler: Arc<dyn Signaler>,
    pub identity: Arc<dyn IdentityProvider>,
    pub clock: Arc<dyn Clock>,
}

/// A running monitor: console, scanner loop, and the signal listener.
pub struct Monitor {
    console: Console,
    scanner: Arc<ScannerLoop>,
    bus: broadcast::Sender<MonitorEvent>,
    ctx: CancellationToken,
    signal_task: JoinHandle<()>,
}

impl Monitor {
    /// Assemble the monitor and spawn its signal listener.
    ///
    /// Must be called from within a tokio runtime. The scanner loop starts
    /// idle.
    pub fn new(parts: MonitorParts, range: IpNet, interval: Duration) -> Self {
        let (bus, events) = broadcast::channel(EVENT_BUS_CAPACITY);
        let ctx = CancellationToken::new();
        let signal_task = spawn_signal_listener(events, parts.signaler, ctx.child_token());

        let sweeper = Sweeper::new(
            parts.prober,
            Arc::clone(&parts.store),
            Arc::clone(&parts.audit),
            Arc::clone(&parts.clock),
            bus.clone(),
            range,
        );
        let scanner = Arc::new(ScannerLoop::new(sweeper, interval));
        let status =
            StatusAggregator::new(Arc::clone(&parts.store), Arc::clone(&parts.clock), bus.clone());
        let console = Console::new(
            parts.store,
            parts.audit,
            Arc::clone(&scanner),
            status,
            parts.identity,
            parts.clock,
        );

        Self {
            console,
            scanner,
            bus,
            ctx,
            signal_task,
        }
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn scanner(&self) -> &ScannerLoop {
        &self.scanner
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.bus.subscribe()
    }

    /// Stop the scanner loop, then the signal listener.
    pub async fn shutdown(self) {
        self.scanner.stop().await;
        self.ctx.cancel();
        if let Err(e) = self.signal_task.await {
            tracing::error!(error = %e, "Signal listener panicked");
        }
    }
}
