//! Membership discovery: finds, connects and reconnects to stripe peers.

use std::io;

use thiserror::Error;

use crate::core::ServerId;
use crate::error::Transience;

pub mod manager;
pub mod peer;

pub use manager::{
    BackoffPolicy, DiscoveryConfig, DiscoveryHandle, MembershipDiscovery, MessagingLayer,
    PeerConfig, PeerLink, PeerTransport,
};
pub use peer::{PeerState, PeerStateMachine};

/// Send/connect failures. Never fatal here; retry belongs to the transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("peer {peer} unreachable: {reason}")]
    Unreachable { peer: ServerId, reason: String },
    #[error("link to {peer} is closed")]
    Closed { peer: ServerId },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    pub fn transience(&self) -> Transience {
        Transience::Retryable
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    #[error("peer {peer}: illegal transition {from} -> {to}")]
    InvalidTransition {
        peer: ServerId,
        from: PeerState,
        to: PeerState,
    },
    #[error("failed to spawn discovery thread: {0}")]
    Spawn(#[source] io::Error),
}

impl DiscoveryError {
    pub fn transience(&self) -> Transience {
        match self {
            DiscoveryError::InvalidTransition { .. } => Transience::Permanent,
            DiscoveryError::Spawn(_) => Transience::Retryable,
        }
    }
}
