//! Context environment.
//!
//! Executes workloads through a submission client in attached or detached
//! mode, keeps the latest result in a shared slot, and cancels attached jobs
//! when the process is shut down.

#![warn(missing_docs)]

pub mod slot;
pub mod shutdown;
pub mod context;
pub mod registry;

pub use slot::ResultSlot;
pub use shutdown::{run_hooks_on_signal, HookStats, ShutdownHook, ShutdownHooks};
pub use context::ContextEnvironment;
pub use registry::{ContextEnvironmentFactory, ContextRegistry, RegistryError};
