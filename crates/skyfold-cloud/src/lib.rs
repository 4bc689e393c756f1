//! Skyfold reconcile engine
//!
//! This crate drives declared cloud infrastructure toward its desired state
//! through repeated, idempotent passes. No pass ever blocks on a long-running
//! remote operation: the operation's continuation token is recorded in the
//! object's status and polled again on the next pass.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │            control loop (embedding app)          │
//! └─────────────────┬───────────────────────────────┘
//!                   │ reconcile / delete
//! ┌─────────────────▼───────────────────────────────┐
//! │                 skyfold-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  Orchestrator: group → dependents → tags  │   │
//! │  └──────────────────┬───────────────────────┘   │
//! │  ┌──────────────────▼───────────────────────┐   │
//! │  │  AsyncExecutor (resume or start)          │   │
//! │  └──────┬─────────────────────────┬─────────┘   │
//! │  ┌──────▼───────┐  ┌──────────────▼─────────┐   │
//! │  │OperationStore│  │  CapabilityCache        │   │
//! │  │ StatusHandle │  │  (zones per location)  │   │
//! │  └──────────────┘  └────────────────────────┘   │
//! └───────┬─────────────────────────────────────────┘
//!         │ trait ResourceClient / TagsClient / SkuSource
//! ┌───────▼───────┐
//! │  cloud SDKs   │
//! └───────────────┘
//! ```

pub mod capability;
pub mod client;
pub mod error;
pub mod executor;
pub mod operation;
pub mod orchestrator;
pub mod spec;
pub mod state;
pub mod tags;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use capability::{CacheEntry, CapabilityCache, ResourceSku, SkuSource};
pub use client::{AsyncResult, OperationState, PendingOperation, ResourceClient, TagsClient};
pub use error::{CloudError, Phase, Result};
pub use executor::{AsyncExecutor, Progress};
pub use operation::{Operation, OperationKey, OperationKind, OperationStore};
pub use orchestrator::{DeleteOutcome, Orchestrator, Prepare, ReconcileOutcome, Reconciler};
pub use spec::{ResourceRef, ResourceSpec};
pub use state::{
    Condition, ConditionStatus, FailureDomainSpec, ObjectPhase, ObjectStatus, StatusHandle,
    StatusStore,
};
pub use tags::{BuildParams, Lifecycle, Tags};
