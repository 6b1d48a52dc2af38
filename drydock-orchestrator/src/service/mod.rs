//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services own the runner lifecycle: credentials, containers, the registry and
//! the command entry points built on top of them.

pub mod containers;
pub mod credentials;
pub mod placeholders;
pub mod registry;
pub mod runner;

// Re-export for convenience
pub use containers::ContainerManager;
pub use credentials::CredentialIssuer;
pub use registry::RunnerRegistry;
pub use runner::RunnerService;
