//! Facebook Graph API adapter.
//!
//! `PageMessenger` implements the broadcast collaborator traits on top of
//! the Graph API:
//! - `RecipientResolver`: conversations updated inside the eligibility window
//! - `MessageSender`: `POST /me/messages`
//!
//! Graph error payloads are classified into `SendError` / `ResolveError`
//! here so the broadcast core never inspects provider responses.

mod client;
mod error;
mod types;

pub use client::{GraphClient, PageMessenger};
pub use error::{GraphError, GraphErrorKind};
pub use types::{eligible_recipients, parse_graph_time, Conversation, ConversationPage};
