//! Bulk message broadcasting.
//!
//! - `dispatcher`: sends one spintax template to a recipient list, one
//!   recipient at a time, isolating per-recipient failures
//! - `service`: the broadcast lifecycle around the dispatcher (resolution,
//!   persistence, scheduling, cancellation)
//! - `collaborators`: the resolver/sender/observer seams

mod backoff;
mod cancel;
mod collaborators;
mod dispatcher;
mod pacing;
mod service;
mod types;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use collaborators::{DeliveryObserver, MessageSender, RecipientResolver};
pub use dispatcher::{BroadcastDispatcher, DispatchConfig, DispatchOutcome};
pub use pacing::{Pacer, PacingPolicy};
pub use service::{
    BroadcastError, BroadcastReport, BroadcastRequest, BroadcastService, ServiceStatsSnapshot,
    MAX_MESSAGE_CHARS,
};
pub use types::{
    BroadcastSummary, BroadcastTally, DeliveryResult, MessageTag, Recipient, ResolveError,
    SendError, SentMessage, StopReason,
};
