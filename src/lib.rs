//! Remote control for a ping-pong launching robot.
//!
//! - [`domain`] - configuration model, pacing, settings
//! - [`infrastructure`] - robot link (protocol, transports, connection) and logging
//! - [`session`] - training runs and live aim
//! - [`app`] - composition root

pub mod app;
pub mod domain;
pub mod infrastructure;
pub mod session;

pub use app::RobotRemote;
