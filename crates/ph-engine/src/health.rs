//! Service availability monitoring
//!
//! Periodically probes every local and incoming service endpoint and feeds
//! changes into [`ServiceRegistry::record_availability`]. A result is only
//! applied while the service still listens on the endpoint that was probed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use ph_core::config::HealthConfig;
use ph_core::{EngineError, ServiceRef, Snapshot};

use crate::registry::ServiceRegistry;
use crate::store::StateStore;

/// Checks whether an endpoint is reachable
#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    async fn probe(&self, address: &str, port: u16) -> bool;
}

/// Reachable means a TCP connect succeeds within the timeout
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl AvailabilityProbe for TcpProbe {
    async fn probe(&self, address: &str, port: u16) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect((address, port))).await,
            Ok(Ok(_))
        )
    }
}

/// An endpoint to probe and the availability the snapshot currently shows
struct Target {
    service: ServiceRef,
    address: String,
    port: u16,
    available: bool,
}

fn targets(snapshot: &Snapshot) -> Vec<Target> {
    let local = snapshot.local_services.iter().map(|s| Target {
        service: ServiceRef::Local {
            name: s.name.clone(),
        },
        address: s.address.clone(),
        port: s.port,
        available: s.available,
    });
    let incoming = snapshot.groups.iter().flat_map(|g| {
        g.incoming_services.iter().map(move |s| Target {
            service: ServiceRef::Incoming {
                email: g.email.clone(),
                address: s.address.clone(),
                port: s.port,
            },
            address: s.address.clone(),
            port: s.port,
            available: s.available,
        })
    });
    local.chain(incoming).collect()
}

/// Monitors service availability on an interval
pub struct HealthMonitor {
    store: Arc<StateStore>,
    registry: Arc<ServiceRegistry>,
    probe: Arc<dyn AvailabilityProbe>,
    /// Probe interval
    pub interval: Duration,
}

impl HealthMonitor {
    /// Create a monitor probing over TCP
    pub fn new(store: Arc<StateStore>, registry: Arc<ServiceRegistry>, config: &HealthConfig) -> Self {
        Self::with_probe(
            store,
            registry,
            Arc::new(TcpProbe::new(config.probe_timeout)),
            config.interval,
        )
    }

    pub fn with_probe(
        store: Arc<StateStore>,
        registry: Arc<ServiceRegistry>,
        probe: Arc<dyn AvailabilityProbe>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            probe,
            interval,
        }
    }

    /// Probe every service once. Returns the number of availability changes applied.
    pub async fn check_once(&self) -> usize {
        let mut changed = 0;
        for target in targets(&self.store.current()) {
            let available = self.probe.probe(&target.address, target.port).await;
            if available == target.available {
                continue;
            }
            match self.registry.record_availability(
                &target.service,
                &target.address,
                target.port,
                available,
            ) {
                Ok(true) => changed += 1,
                // Endpoint modified while we were probing
                Ok(false) => {}
                // Removed while we were probing
                Err(EngineError::NotFound { .. }) => {}
                Err(e) => tracing::warn!("Failed to update availability of {}: {}", target.service, e),
            }
        }
        changed
    }

    /// Start probing until cancelled
    pub fn spawn_monitor(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Health monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let changed = self.check_once().await;
                        if changed > 0 {
                            tracing::debug!("{} service(s) changed availability", changed);
                        }
                    }
                }
            }
        })
    }
}
