//! Core capability errors (identifier parsing and validation).
//!
//! These are bounded and stable: core errors represent refusal states on
//! input, not library implementation details.

use thiserror::Error;

use crate::error::Transience;

/// Invalid identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("stripe id `{raw}` is invalid: {reason}")]
    Stripe { raw: String, reason: String },
    #[error("server id `{raw}` is invalid: {reason}")]
    Server { raw: String, reason: String },
    #[error("entity id `{raw}` is invalid: {reason}")]
    Entity { raw: String, reason: String },
    #[error("connection id `{raw}` is invalid: {reason}")]
    Connection { raw: String, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }
}
