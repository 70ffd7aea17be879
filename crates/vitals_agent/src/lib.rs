//! HTTP agent hosting the vitals sync pipeline.
//!
//! The host application drives it over a small local API: lifecycle
//! transitions, sign-in and sign-out, wearable connection and on-demand
//! summaries. Background syncing runs on the [`vitals_client::sync::SyncScheduler`].

pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::router;
pub use state::{AgentComponents, AgentState, PendingGrantAuthorizer};

/// Default request body limit.
pub const DEFAULT_MAX_BODY_SIZE: usize = 2 * 1024 * 1024;
