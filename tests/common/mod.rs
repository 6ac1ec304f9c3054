//! Common test infrastructure
//!
//! Tests drive a real [`Offliner`] against an in-process fake of the remote
//! side. Tests should only import from this module.

mod fakes;
mod fixtures;

pub use fakes::{FakeContent, FakeRemote};
pub use fixtures::TestEngine;
