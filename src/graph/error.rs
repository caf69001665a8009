use std::time::Duration;

use thiserror::Error;

use crate::broadcast::{ResolveError, SendError};

/// Graph error codes that mean "slow down"
const RATE_LIMIT_CODES: &[i64] = &[4, 17, 32, 613, 80006];

/// Graph error codes for missing or expired permissions
const PERMISSION_CODES: &[i64] = &[10, 190];

/// Subcode of code 100 for a recipient the page cannot message
const NO_MATCHING_USER_SUBCODE: i64 = 2018001;

/// Code returned when the user is not available
const USER_UNAVAILABLE_CODE: i64 = 551;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Graph API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: Option<i64>,
        subcode: Option<i64>,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Graph API transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected Graph API response: {0}")]
    Decode(String),
}

/// How a Graph failure should be treated by the broadcast core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphErrorKind {
    RateLimited,
    PermissionDenied,
    InvalidRecipient,
    Network,
    Provider,
}

impl GraphError {
    pub fn kind(&self) -> GraphErrorKind {
        match self {
            GraphError::Api {
                status,
                code,
                subcode,
                ..
            } => classify(*status, *code, *subcode),
            GraphError::Transport(_) => GraphErrorKind::Network,
            GraphError::Decode(_) => GraphErrorKind::Provider,
        }
    }

    fn code(&self) -> Option<i64> {
        match self {
            GraphError::Api { code, .. } => *code,
            _ => None,
        }
    }

    fn detail(&self) -> String {
        match self {
            GraphError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

fn classify(status: u16, code: Option<i64>, subcode: Option<i64>) -> GraphErrorKind {
    match code {
        Some(c) if RATE_LIMIT_CODES.contains(&c) => GraphErrorKind::RateLimited,
        _ if status == 429 => GraphErrorKind::RateLimited,
        Some(c) if PERMISSION_CODES.contains(&c) || (200..=299).contains(&c) => {
            GraphErrorKind::PermissionDenied
        }
        Some(100) if subcode == Some(NO_MATCHING_USER_SUBCODE) => GraphErrorKind::InvalidRecipient,
        Some(USER_UNAVAILABLE_CODE) => GraphErrorKind::InvalidRecipient,
        _ => GraphErrorKind::Provider,
    }
}

impl From<GraphError> for SendError {
    fn from(err: GraphError) -> Self {
        match err.kind() {
            GraphErrorKind::RateLimited => SendError::RateLimited {
                message: err.detail(),
                retry_after: match &err {
                    GraphError::Api { retry_after, .. } => *retry_after,
                    _ => None,
                },
            },
            GraphErrorKind::PermissionDenied => SendError::PermissionDenied(err.detail()),
            GraphErrorKind::InvalidRecipient => SendError::InvalidRecipient(err.detail()),
            GraphErrorKind::Network => SendError::Network(err.detail()),
            GraphErrorKind::Provider => SendError::Provider {
                code: err.code(),
                message: err.detail(),
            },
        }
    }
}

impl From<GraphError> for ResolveError {
    fn from(err: GraphError) -> Self {
        match err.kind() {
            GraphErrorKind::PermissionDenied => ResolveError::PermissionDenied(err.detail()),
            GraphErrorKind::RateLimited | GraphErrorKind::Network => {
                ResolveError::Unavailable(err.detail())
            }
            GraphErrorKind::InvalidRecipient | GraphErrorKind::Provider => {
                ResolveError::Provider(err.to_string())
            }
        }
    }
}
