//! Sandboxed execution of generated artifacts.
//!
//! - `config`: limits and scratch locations
//! - `runtime`: the container runtime capability and the Docker CLI backend
//! - `execution`: one artifact, one throwaway container

pub mod config;
pub mod execution;
pub mod runtime;

pub use config::SandboxConfig;
pub use execution::{container_name, run_command, ExecutionSandbox};
pub use runtime::{ContainerRun, ContainerRuntime, DockerCli};
