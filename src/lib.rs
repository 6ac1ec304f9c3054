//! Offline content sync engine.
//!
//! The library exposes the engine and its building blocks; the `offliner`
//! binary is a thin CLI over [`Offliner`].

pub mod config;
pub mod downloads;
pub mod error;
pub mod file_ref;
pub mod handlers;
pub mod offline_store;
pub mod offliner;
pub mod remote;
pub mod retry;
pub mod runner;
pub mod sqlite_persistence;
pub mod tasks;

// Re-export commonly used types for convenience
pub use downloads::{Download, Downloads};
pub use error::{LicenseError, OfflinerError};
pub use offliner::Offliner;
pub use runner::{NetworkCost, NetworkProbe, StaticNetworkProbe};
pub use tasks::ResourceType;
