//! querygate-supervisor - Lifecycle of managed backend servers
//!
//! The [`ServerSupervisor`] starts every managed server with its
//! environment bundle, waits for it to answer its health probe, restarts
//! single servers on demand, and stops everything within a hard bound at
//! shutdown. Launching is pluggable: [`ProcessLauncher`] spawns OS
//! processes, [`TaskLauncher`] serves axum routers in-process.
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!               |           |           |
//!               +--------> Failed <-----+
//! ```

pub mod error;
pub mod launcher;
pub mod monitor;
pub mod process;
pub mod readiness;
pub mod supervisor;
pub mod task;

pub use error::{SupervisorError, SupervisorResult};
pub use launcher::{RunningServer, ServerLauncher};
pub use monitor::{Monitor, DEFAULT_MONITOR_INTERVAL, MIN_MONITOR_INTERVAL};
pub use process::ProcessLauncher;
pub use readiness::{wait_for_port_release, ReadinessConfig, ReadinessProbe};
pub use supervisor::{ServerOutcome, ServerSupervisor, SupervisorConfig};
pub use task::{RouterFactory, TaskLauncher};
