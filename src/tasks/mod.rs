//! Offline task model.

mod models;

pub use models::*;
