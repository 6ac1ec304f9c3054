mod network;
mod task_runner;

pub use network::{AdmissionGate, NetworkCost, NetworkMonitor, NetworkProbe, StaticNetworkProbe};
pub use task_runner::TaskRunner;
