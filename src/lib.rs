//! Runtime core of a host-resident monitoring agent
//!
//! - [`instance`] - durable catalog of monitored instances with control-plane fallback
//! - [`restart`] - background detection of database server restarts
//! - [`coordinator`] - command dispatcher keeping both consistent with the control-plane

#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod control_plane;
pub mod coordinator;
pub mod error;
pub mod instance;
pub mod probe;
pub mod restart;
pub mod util;

pub use coordinator::{Command, CommandKind, Coordinator, Reply};
pub use error::{InstanceError, InstanceResult};
pub use instance::{InstanceRecord, InstanceStore};
pub use restart::{Fingerprint, LivenessSource, RestartMonitor};
