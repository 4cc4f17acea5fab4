//! Gatewire provisioning workflow.
//!
//! This crate provides the three provisioners (queue, API, permission) and the
//! [`ProvisioningOrchestrator`] that sequences them into one ordered workflow
//! per request and runs batches of requests.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Provisioners sequence calls between business logic
//! in the [`provisioning`] crate and the provider ports it defines. They contain
//! no provider details of their own; any implementation of the ports can be
//! injected.

pub mod api;
pub mod orchestrator;
pub mod permission;
pub mod queue;
pub mod retry;

pub use api::{ApiProvisioner, IntegrationFailure};
pub use orchestrator::{ProvisioningError, ProvisioningOrchestrator, RunOutcome, StepError};
pub use permission::PermissionBinder;
pub use queue::QueueProvisioner;
pub use tokio_util::sync::CancellationToken;
