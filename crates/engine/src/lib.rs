//! The execution orchestration engine.
//!
//! Three tightly coupled services: the [`environment::EnvironmentManager`]
//! provisions one isolated runtime per script, the [`executor::Executor`]
//! supervises script processes, and the [`scheduler::Scheduler`] maps
//! trigger expressions onto executor invocations. All shared state lives
//! inside these structs and is threaded around as cloneable handles;
//! there are no process-wide globals.

pub mod alert;
pub mod config;
pub mod environment;
pub mod executor;
pub mod locks;
pub mod scheduler;

pub use alert::{Alerter, LogAlerter};
pub use config::EngineConfig;
pub use environment::EnvironmentManager;
pub use executor::Executor;
pub use locks::{KeyedLocks, RunningSet};
pub use scheduler::Scheduler;
