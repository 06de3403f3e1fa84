// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! Crate-wide error taxonomy. Mirrors how the rest of this codebase layers a
//! small `thiserror` enum per subsystem and a narrow conversion into the
//! surface callers actually see (compare `crate::errors::RequestErrorType` in
//! the client crates this one was adapted from).

use thiserror::Error;

/// Errors surfaced by the replicated-map layer (Compressed/Literal DData).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DDataError {
    /// The local write did not reach the requested `WriteConsistency`
    /// within `writeTimeout`. Policy: swallow locally, let the next tick
    /// (and eventually a forced tick) re-advertise.
    #[error("replication write timed out before reaching the requested consistency")]
    ReplicationTimeout,
    /// The replication subsystem reports no reachable peers.
    #[error("no reachable cluster peers")]
    ClusterUnreachable,
}

/// Top-level error type for the pub-sub core's public API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PubSubError {
    #[error(transparent)]
    DData(#[from] DDataError),

    /// Surfaced synchronously to the caller of `declareAckLabels` when the
    /// label is already owned by another node's entry at declaration time.
    #[error("ack label {0:?} is already declared by another node")]
    LabelConflict(String),

    /// The component a request was addressed to is no longer running
    /// (supervisor is mid-restart, or shutdown has begun).
    #[error("component {0} is not available")]
    ComponentUnavailable(&'static str),

    /// A subscriber's topic was not valid (empty string).
    #[error("topic must be a non-empty string")]
    InvalidTopic,
}

/// A pub-sub task panicked; the owning supervisor logs this and restarts the
/// task after `restart-delay`. Never returned to an external caller — kept
/// here purely so `supervisor.rs` and tests can name the event uniformly.
#[derive(Debug, Error)]
#[error("component {component} crashed: {message}")]
pub struct SupervisorCrash {
    pub component: &'static str,
    pub message: String,
}

/// The local Subscriptions Registry observed a subscriber's termination
/// signal. Never surfaced as an error to a caller; the registry just drops
/// the entry. Kept as a type so logging call sites stay uniform.
#[derive(Debug)]
pub struct SubscriberGone;

pub(crate) fn label_conflict(label: impl Into<String>) -> PubSubError {
    PubSubError::LabelConflict(label.into())
}
