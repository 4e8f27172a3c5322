//! Per-peer connection state machine.

use std::fmt;

use crate::core::ServerId;

use super::DiscoveryError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerState {
    Unknown,
    Connecting,
    Connected,
    Disconnected,
}

impl PeerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerState::Unknown => "unknown",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
        }
    }

    pub fn can_transition_to(self, next: PeerState) -> bool {
        matches!(
            (self, next),
            (PeerState::Unknown, PeerState::Connecting)
                | (PeerState::Connecting, PeerState::Connected)
                | (PeerState::Connecting, PeerState::Disconnected)
                | (PeerState::Connected, PeerState::Disconnected)
                | (PeerState::Disconnected, PeerState::Connecting)
        )
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct PeerStateMachine {
    peer: ServerId,
    state: PeerState,
    connects: u64,
    losses: u64,
}

impl PeerStateMachine {
    pub fn new(peer: ServerId) -> Self {
        Self {
            peer,
            state: PeerState::Unknown,
            connects: 0,
            losses: 0,
        }
    }

    pub fn peer(&self) -> &ServerId {
        &self.peer
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Successful connects so far.
    pub fn connects(&self) -> u64 {
        self.connects
    }

    /// Established links that were later lost.
    pub fn losses(&self) -> u64 {
        self.losses
    }

    /// Move to `next`; returns the previous state.
    pub fn transition(&mut self, next: PeerState) -> Result<PeerState, DiscoveryError> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(DiscoveryError::InvalidTransition {
                peer: self.peer.clone(),
                from,
                to: next,
            });
        }
        match (from, next) {
            (_, PeerState::Connected) => self.connects += 1,
            (PeerState::Connected, PeerState::Disconnected) => self.losses += 1,
            _ => {}
        }
        self.state = next;
        Ok(from)
    }
}
