//! `azdo_export` pulls projects, work items, repositories and pull requests
//! from Azure DevOps and writes them as normalized entities.

/// Endpoint mappers and write-back operations.
pub mod api;
/// Basic and OAuth credentials with token refresh.
pub mod auth;
/// Per-project export checkpoints and webhook bookkeeping.
pub mod checkpoint;
/// Runtime configuration loading and validation.
pub mod config;
/// Bounded fan-out of fallible work units.
pub mod executor;
/// Full and incremental export runs.
pub mod export;
/// Authenticated REST facade.
pub mod http;
/// Logging setup.
pub mod logging;
/// Memoized work item type lookups.
pub mod memo;
/// Runtime metrics counters.
pub mod metrics;
/// Normalized output entities.
pub mod model;
/// `$top`/`$skip` pagination.
pub mod paginate;
/// Output sinks for normalized entities.
pub mod pipe;
/// Stable reference ids for native identifiers.
pub mod refid;
/// Durable key-value state.
pub mod state;
/// Webhook delivery handling.
pub mod webhook;
