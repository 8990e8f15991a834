//! Error surface of the federation runtime.

use crate::{FederateState, GlobalId};
use thiserror::Error;

/// Errors reported across the federate-facing API and between nodes.
///
/// Handler-local errors are replied to the requesting source and the node
/// continues; structural errors (timeouts, transport) propagate as error
/// messages and trigger disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FederationError {
    #[error("operation not valid in the {0} state")]
    InvalidState(FederateState),

    #[error("unknown handle {0}")]
    InvalidHandle(GlobalId),

    #[error("global name '{0}' is already registered")]
    NameCollision(String),

    #[error("name '{0}' is already registered within this federate")]
    LocalNameCollision(String),

    #[error("initialization timed out before the required connections arrived")]
    InitTimeout,

    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("the node is disconnected")]
    Disconnected,

    #[error("internal error: {0}")]
    Internal(String),
}

impl FederationError {
    /// Stable short code used on the wire (the `name` field of error
    /// messages) so errors survive routing without payload decoding.
    pub fn code(&self) -> &'static str {
        match self {
            FederationError::InvalidState(_) => "invalid-state",
            FederationError::InvalidHandle(_) => "invalid-handle",
            FederationError::NameCollision(_) => "name-collision",
            FederationError::LocalNameCollision(_) => "local-name-collision",
            FederationError::InitTimeout => "init-timeout",
            FederationError::ConnectionFailure(_) => "connection-failure",
            FederationError::TransportFailure(_) => "transport-failure",
            FederationError::Disconnected => "disconnected",
            FederationError::Internal(_) => "internal",
        }
    }

    /// The variable part of the error, paired with [`code`](Self::code)
    /// on the wire.
    pub fn detail(&self) -> String {
        match self {
            FederationError::InvalidState(state) => state.to_string(),
            FederationError::InvalidHandle(id) => id.to_string(),
            FederationError::NameCollision(name)
            | FederationError::LocalNameCollision(name)
            | FederationError::ConnectionFailure(name)
            | FederationError::TransportFailure(name)
            | FederationError::Internal(name) => name.clone(),
            FederationError::InitTimeout | FederationError::Disconnected => String::new(),
        }
    }

    /// Inverse of [`code`](Self::code), for errors received off the wire.
    pub fn from_code(code: &str, detail: &str) -> Self {
        match code {
            "invalid-state" => FederationError::Internal(format!("invalid state: {detail}")),
            "invalid-handle" => FederationError::InvalidHandle(GlobalId::INVALID),
            "name-collision" => FederationError::NameCollision(detail.to_string()),
            "local-name-collision" => FederationError::LocalNameCollision(detail.to_string()),
            "init-timeout" => FederationError::InitTimeout,
            "connection-failure" => FederationError::ConnectionFailure(detail.to_string()),
            "transport-failure" => FederationError::TransportFailure(detail.to_string()),
            "disconnected" => FederationError::Disconnected,
            other => FederationError::Internal(format!("{other}: {detail}")),
        }
    }
}
