//! # procherd
//!
//! Supervisor for a small fleet of child processes: one base process and any
//! number of dependents.
//!
//! The base starts first and gets a warm-up window before its dependents
//! launch. Each process runs under its own monitor task, which restarts it
//! after abnormal exits within a bounded budget. When the base ends for good,
//! its dependents are terminated. Stopping the fleet escalates from waiting to
//! SIGTERM (dependents before base) to SIGKILL.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use procherd::{ProcessSpec, Supervisor, SupervisorConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), procherd::SupervisorError> {
//! let sup = Supervisor::new(SupervisorConfig::default());
//!
//! sup.register(ProcessSpec::new("dbus", "dbus-daemon").args(["--session", "--nofork"]))
//!     .await?;
//! sup.register(
//!     ProcessSpec::new("vnc", "x11vnc")
//!         .depends_on("dbus")
//!         .max_restarts(3)
//!         .restart_cooldown(Duration::from_secs(2)),
//! )
//! .await?;
//!
//! sup.start().await?;
//! tokio::signal::ctrl_c().await.ok();
//! sup.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
mod monitor;
pub mod policy;
pub mod relay;
pub mod shutdown;
pub mod signal;
pub mod spec;
pub mod state;
pub mod supervisor;

pub use config::FleetConfig;
pub use error::{ConfigError, FleetError, ProcessError, SupervisorError};
pub use relay::{OutputRelay, RelayTags, Sink};
pub use shutdown::{ShutdownPhase, ShutdownReport, ShutdownTimeouts};
pub use spec::ProcessSpec;
pub use state::{ManagedProcess, MonitorState, ProcessStatus, TerminationReason};
pub use supervisor::{Supervisor, SupervisorConfig};
