//! ContainerRuntime adapter: the orchestrator's only path to the host's
//! Docker-compatible daemon, reached as a sibling process (DOOD), never
//! nested.

mod bollard_runtime;
mod runtime;
mod types;

#[cfg(test)]
mod fake;

pub use bollard_runtime::BollardRuntime;
pub use runtime::{ContainerRuntime, ExecHandle, LogLines};
pub use types::{ContainerError, LaunchSpec, MountSpec, RawLine};

#[cfg(test)]
pub use fake::{FakeContainerRuntime, Script};
