//! Network status aggregation and the indicator signal.
//!
//! Reading the status publishes a `StatusObserved` event on the bus; the
//! signal listener subscribes and forwards it to a [`Signaler`]. A status
//! read therefore never depends on the indicator being reachable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netwarden_core::events::{EventPayload, MonitorEvent};
use netwarden_core::types::staleness_threshold;
use netwarden_core::{Clock, NetworkStatus};
use netwarden_store::DeviceStore;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{DiscoverError, Result};

/// Computes [`NetworkStatus`] from devices inside the presence window.
#[derive(Clone)]
pub struct StatusAggregator {
    store: Arc<dyn DeviceStore>,
    clock: Arc<dyn Clock>,
    bus: broadcast::Sender<MonitorEvent>,
}

impl StatusAggregator {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        clock: Arc<dyn Clock>,
        bus: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        Self { store, clock, bus }
    }

    /// Compute the current status and publish it for the indicator.
    pub async fn status(&self) -> Result<NetworkStatus> {
        let now = self.clock.now();
        let connected = self.store.list_within(staleness_threshold(), now).await?;
        let status = NetworkStatus::from_devices(&connected, now);

        let observed = MonitorEvent::new(
            now,
            EventPayload::StatusObserved {
                secure: status.secure,
                connected_count: status.connected_count,
                unauthorized_count: status.unauthorized_count,
            },
        );
        if self.bus.send(observed).is_err() {
            tracing::debug!("No status subscribers");
        }

        Ok(status)
    }
}

/// Best-effort external indicator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Signaler: Send + Sync {
    async fn signal(&self, unauthorized_count: usize) -> Result<()>;
}

/// Used when no indicator is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSignaler;

#[async_trait]
impl Signaler for NoopSignaler {
    async fn signal(&self, _unauthorized_count: usize) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndicatorCommand {
    #[serde(rename = "RED_ON")]
    RedOn,
    #[serde(rename = "GREEN_ON")]
    GreenOn,
}

impl IndicatorCommand {
    pub fn for_unauthorized(unauthorized_count: usize) -> Self {
        if unauthorized_count > 0 {
            Self::RedOn
        } else {
            Self::GreenOn
        }
    }
}

#[derive(Serialize)]
struct CommandBody {
    command: IndicatorCommand,
}

/// Posts red/green commands to the indicator bridge over HTTP.
pub struct HttpSignaler {
    client: Client,
    endpoint: String,
}

impl HttpSignaler {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| DiscoverError::Config(format!("signal client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/arduino/command", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Signaler for HttpSignaler {
    async fn signal(&self, unauthorized_count: usize) -> Result<()> {
        let command = IndicatorCommand::for_unauthorized(unauthorized_count);
        self.client
            .post(&self.endpoint)
            .json(&CommandBody { command })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DiscoverError::Signal(e.to_string()))?;

        tracing::debug!(command = ?command, endpoint = %self.endpoint, "Indicator signaled");
        Ok(())
    }
}

/// Forward every `StatusObserved` event to the signaler until cancelled.
///
/// Signal failures are logged and dropped.
pub fn spawn_signal_listener(
    mut events: broadcast::Receiver<MonitorEvent>,
    signaler: Arc<dyn Signaler>,
    ctx: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = ctx.cancelled() => break,
                received = events.recv() => received,
            };

            match event {
                Ok(MonitorEvent {
                    payload: EventPayload::StatusObserved { unauthorized_count, .. },
                    ..
                }) => {
                    if let Err(e) = signaler.signal(unauthorized_count).await {
                        tracing::warn!(error = %e, unauthorized_count, "Indicator signal failed");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Signal listener lagged behind the event bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, Utc};
    use netwarden_core::{Device, HardwareId, ManualClock};
    use netwarden_store::MemoryDeviceStore;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000 + secs, 0).unwrap()
    }

    async fn seeded_store() -> Arc<MemoryDeviceStore> {
        let store = Arc::new(MemoryDeviceStore::new());
        for (i, authorized) in [true, true, false].into_iter().enumerate() {
            let id = HardwareId::parse(&format!("aa:0{i}")).unwrap();
            let mut device = Device::discovered(id, "10.0.0.1".parse().unwrap(), at(0));
            device.authorized = authorized;
            store.upsert(&device).await.unwrap();
        }
        let stale = HardwareId::parse("aa:ff").unwrap();
        store
            .upsert(&Device::discovered(stale, "10.0.0.2".parse().unwrap(), at(-600)))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_status_counts_connected_devices() {
        let (bus, mut rx) = broadcast::channel(8);
        let aggregator = StatusAggregator::new(
            seeded_store().await,
            Arc::new(ManualClock::new(at(60))),
            bus,
        );

        let status = aggregator.status().await.unwrap();
        assert_eq!(
            status,
            NetworkStatus {
                secure: false,
                connected_count: 3,
                unauthorized_count: 1,
            }
        );
        assert_eq!(
            rx.recv().await.unwrap().payload,
            EventPayload::StatusObserved {
                secure: false,
                connected_count: 3,
                unauthorized_count: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_status_without_subscribers_succeeds() {
        let (bus, rx) = broadcast::channel(8);
        drop(rx);
        let clock = Arc::new(ManualClock::new(at(0)));
        let aggregator = StatusAggregator::new(seeded_store().await, clock.clone(), bus);

        clock.advance(TimeDelta::minutes(10));
        let status = aggregator.status().await.unwrap();
        assert!(status.secure);
        assert_eq!(status.connected_count, 0);
    }

    #[tokio::test]
    async fn test_listener_swallows_signal_failures() {
        let (bus, rx) = broadcast::channel(8);
        let mut signaler = MockSignaler::new();
        let mut seq = mockall::Sequence::new();
        signaler
            .expect_signal()
            .withf(|count| *count == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(DiscoverError::Signal("connection refused".into())));
        signaler
            .expect_signal()
            .withf(|count| *count == 0)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let ctx = CancellationToken::new();
        let handle = spawn_signal_listener(rx, Arc::new(signaler), ctx.clone());

        for unauthorized_count in [1, 0] {
            bus.send(MonitorEvent::new(
                at(0),
                EventPayload::StatusObserved {
                    secure: unauthorized_count == 0,
                    connected_count: 2,
                    unauthorized_count,
                },
            ))
            .unwrap();
        }
        drop(bus);

        // Closing the bus ends the listener once both events are handled.
        handle.await.unwrap();
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_indicator_command_wire_format() {
        let body = serde_json::to_string(&CommandBody {
            command: IndicatorCommand::for_unauthorized(2),
        })
        .unwrap();
        assert_eq!(body, r#"{"command":"RED_ON"}"#);
        assert_eq!(IndicatorCommand::for_unauthorized(0), IndicatorCommand::GreenOn);
    }
}
