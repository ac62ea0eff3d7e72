//! hcflow Cloud Infrastructure
//!
//! Provider-neutral building blocks for managing cloud resources declaratively:
//! the resource lifecycle trait, the state waiter used after every
//! asynchronous cloud operation, caller-level retry, and the local record of
//! applied resources.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                    hcf CLI                       │
//! │            (plan / apply / destroy)              │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 hcflow-cloud                     │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │   trait CloudResource { create/read/... } │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌───────┐  ┌────────────┐   │
//! │  │    Waiter    │  │ Retry │  │ State Mgmt │   │
//! │  └──────────────┘  └───────┘  └────────────┘   │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//!          ┌────────▼────────┐
//!          │   huaweicloud   │
//!          │ rds / nat / cce │
//!          └─────────────────┘
//! ```

pub mod action;
pub mod error;
pub mod resource;
pub mod retry;
pub mod state;
pub mod waiter;

// Re-exports
pub use action::{Action, ActionResult, ActionType, ApplyResult, Plan, PlanSummary};
pub use error::{CloudError, Result};
pub use resource::{CloudResource, Timeouts};
pub use retry::{RetryConfig, RetryError, retry_with_timeout};
pub use state::{GlobalState, ResourceState, StateLock, StateManager, TAINTED};
pub use waiter::{Observation, StateChangeConf};
