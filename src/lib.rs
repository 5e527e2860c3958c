//! Coordination core for a serverless LAN-local collaborative jukebox:
//! peer discovery, a TCP mesh, weighted-bully leader election, and
//! causally-ordered playlist replication. No central server (§2).
//!
//! Split into a library and a thin [`main`](../src/main.rs) binary so
//! the `tests/` integration suite can drive the core modules directly
//! without spinning up real sockets.

pub mod config;
pub mod controller;
pub mod election;
pub mod error;
pub mod event;
pub mod identity;
#[path = "log.rs"]
pub mod app_log;
pub mod net;
pub mod playback;
pub mod protocol;
pub mod runtime;
pub mod store;
pub mod view;
