//! Robot Link Module
//!
//! Everything between the session logic and the physical robot.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ConnectionManager                      │
//! │   (single link owner - sole writer of ConnectionState)   │
//! └──────────┬──────────────────┬───────────────────┬───────┘
//!            │                  │                   │
//!            ▼                  ▼                   ▼
//! ┌────────────────┐  ┌──────────────────┐  ┌──────────────┐
//! │ LinkTransport  │  │     Protocol     │  │  Reconnect   │
//! │                │  │                  │  │              │
//! │ - Classic      │  │ - C/S/P/N/D/A    │  │ - remembered │
//! │ - BLE (MTU)    │  │ - x1000 scaling  │  │   target     │
//! │ - Loopback     │  │ - decoding       │  │ - interval   │
//! └────────────────┘  └──────────────────┘  └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Wire frames, encoding and decoding
//! - [`transport`] - Transport capability traits and errors
//! - [`connection`] - Connection state machine and outbound writes
//! - [`reconnect`] - Background reconnection policy
//! - [`scanner`] - Timeout-bounded device discovery
//! - [`identity`] - Controller name announced to the robot
//! - [`loopback`] - In-memory robot

pub mod connection;
pub mod identity;
pub mod loopback;
pub mod protocol;
pub mod reconnect;
pub mod scanner;
pub mod transport;

pub use connection::{ConnectionManager, Delivery};
pub use reconnect::ReconnectPolicy;

use std::fmt::Display;
use tracing::warn;

/// Run-and-forget for teardown paths that must never fail the caller.
///
/// Errors are logged and discarded.
pub fn best_effort<T, E: Display>(what: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{} failed (ignored): {}", what, e);
            None
        }
    }
}
