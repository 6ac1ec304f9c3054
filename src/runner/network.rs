//! Admission gate: whether dispatched tasks may use the current network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkCost {
    /// Unmetered and unconstrained.
    Inexpensive,
    Expensive,
}

/// Classifies the active network path.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn probe(&self) -> NetworkCost;
}

/// A probe that always answers the same, for hosts without a way to tell.
pub struct StaticNetworkProbe(pub NetworkCost);

#[async_trait]
impl NetworkProbe for StaticNetworkProbe {
    async fn probe(&self) -> NetworkCost {
        self.0
    }
}

/// Lock-free reads of the current network cost and the user's setting.
pub struct AdmissionGate {
    cost: watch::Sender<NetworkCost>,
    allow_expensive: AtomicBool,
}

impl AdmissionGate {
    pub fn new(initial: NetworkCost, allow_expensive: bool) -> Self {
        let (cost, _) = watch::channel(initial);
        Self {
            cost,
            allow_expensive: AtomicBool::new(allow_expensive),
        }
    }

    pub fn is_low_cost(&self) -> bool {
        *self.cost.borrow() == NetworkCost::Inexpensive
    }

    pub fn allows_expensive(&self) -> bool {
        self.allow_expensive.load(Ordering::SeqCst)
    }

    /// Whether a task may run right now.
    pub fn admits(&self) -> bool {
        self.is_low_cost() || self.allows_expensive()
    }

    /// Returns true when the setting switched from disallowed to allowed.
    pub fn set_allow_expensive(&self, allow: bool) -> bool {
        let previous = self.allow_expensive.swap(allow, Ordering::SeqCst);
        allow && !previous
    }

    /// Record a new classification. Returns true when the network just
    /// became inexpensive.
    pub fn update(&self, cost: NetworkCost) -> bool {
        let previous = self.cost.send_replace(cost);
        if previous != cost {
            info!("Network is now {:?}", cost);
        }
        previous == NetworkCost::Expensive && cost == NetworkCost::Inexpensive
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkCost> {
        self.cost.subscribe()
    }
}

/// Periodically probes the network and feeds the gate.
pub struct NetworkMonitor {
    gate: Arc<AdmissionGate>,
    probe: Arc<dyn NetworkProbe>,
    interval: Duration,
    on_inexpensive: Option<Box<dyn Fn() + Send + Sync>>,
}

impl NetworkMonitor {
    pub fn new(gate: Arc<AdmissionGate>, probe: Arc<dyn NetworkProbe>, interval: Duration) -> Self {
        Self {
            gate,
            probe,
            interval,
            on_inexpensive: None,
        }
    }

    /// Called each time the network turns from expensive to inexpensive.
    pub fn on_inexpensive(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_inexpensive = Some(Box::new(callback));
        self
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!("Network monitor started, probing every {:?}", self.interval);
        loop {
            let cost = self.probe.probe().await;
            debug!("Network probe: {:?}", cost);
            if self.gate.update(cost) {
                if let Some(callback) = &self.on_inexpensive {
                    callback();
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.cancelled() => {
                    info!("Network monitor stopped");
                    break;
                }
            }
        }
    }
}
