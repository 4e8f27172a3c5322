//! Outbound peer discovery and reconnection.
//!
//! One thread per peer: connect, hand the channel to the messaging layer,
//! wait for the link to drop, back off, reconnect. Discovery holds no
//! replication state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError};

use crate::core::ServerId;

use super::peer::{PeerState, PeerStateMachine};
use super::{DiscoveryError, TransportError};

const SHUTDOWN_POLL: Duration = Duration::from_millis(25);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerConfig {
    pub server: ServerId,
    pub addr: String,
}

/// An established link: the channel plus a signal that fires (or
/// disconnects) when the link is gone.
pub struct PeerLink<C> {
    pub channel: C,
    pub closed: Receiver<()>,
}

pub trait PeerTransport: Send + Sync + 'static {
    type Channel: Send + 'static;

    fn connect(&self, peer: &PeerConfig) -> Result<PeerLink<Self::Channel>, TransportError>;
}

pub trait MessagingLayer<C>: Send + Sync + 'static {
    fn peer_connected(&self, server: &ServerId, channel: C);
    fn peer_lost(&self, server: &ServerId);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            max: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    pub local: ServerId,
    pub peers: Vec<PeerConfig>,
    pub backoff: BackoffPolicy,
}

type PeerTable = Arc<Mutex<BTreeMap<ServerId, PeerStateMachine>>>;

pub struct MembershipDiscovery<T, M> {
    config: DiscoveryConfig,
    transport: Arc<T>,
    messaging: Arc<M>,
    peers: PeerTable,
}

impl<T, M> MembershipDiscovery<T, M>
where
    T: PeerTransport,
    M: MessagingLayer<T::Channel>,
{
    /// The local server and repeated entries for one server are dropped;
    /// the first address listed for a peer wins.
    pub fn new(mut config: DiscoveryConfig, transport: Arc<T>, messaging: Arc<M>) -> Self {
        let mut seen = BTreeSet::new();
        let local = config.local.clone();
        config.peers.retain(|peer| {
            if peer.server == local {
                return false;
            }
            if !seen.insert(peer.server.clone()) {
                tracing::warn!(
                    peer = %peer.server,
                    addr = %peer.addr,
                    "duplicate peer entry ignored"
                );
                return false;
            }
            true
        });
        let peers = config
            .peers
            .iter()
            .map(|peer| (peer.server.clone(), PeerStateMachine::new(peer.server.clone())))
            .collect();
        Self {
            config,
            transport,
            messaging,
            peers: Arc::new(Mutex::new(peers)),
        }
    }

    pub fn peer_states(&self) -> BTreeMap<ServerId, PeerState> {
        snapshot(&self.peers)
    }

    pub fn start(self) -> Result<DiscoveryHandle, DiscoveryError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut joins = Vec::new();

        for peer in self.config.peers.iter().cloned() {
            let runtime = PeerRuntime {
                transport: Arc::clone(&self.transport),
                messaging: Arc::clone(&self.messaging),
                peers: Arc::clone(&self.peers),
                backoff: self.config.backoff,
                shutdown: Arc::clone(&shutdown),
            };
            let name = format!("stripe-discovery-{}", peer.server);
            let spawned = thread::Builder::new()
                .name(name)
                .spawn(move || run_peer_loop(peer, runtime));
            match spawned {
                Ok(join) => joins.push(join),
                Err(err) => {
                    shutdown.store(true, Ordering::Relaxed);
                    for join in joins {
                        let _ = join.join();
                    }
                    return Err(DiscoveryError::Spawn(err));
                }
            }
        }

        Ok(DiscoveryHandle {
            shutdown,
            joins,
            peers: self.peers,
        })
    }
}

pub struct DiscoveryHandle {
    shutdown: Arc<AtomicBool>,
    joins: Vec<JoinHandle<()>>,
    peers: PeerTable,
}

impl DiscoveryHandle {
    pub fn peer_states(&self) -> BTreeMap<ServerId, PeerState> {
        snapshot(&self.peers)
    }

    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for join in self.joins {
            let _ = join.join();
        }
    }
}

struct PeerRuntime<T, M> {
    transport: Arc<T>,
    messaging: Arc<M>,
    peers: PeerTable,
    backoff: BackoffPolicy,
    shutdown: Arc<AtomicBool>,
}

impl<T, M> PeerRuntime<T, M> {
    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    fn set_state(&self, server: &ServerId, next: PeerState) {
        let mut peers = self.peers.lock().expect("peer table lock poisoned");
        let Some(machine) = peers.get_mut(server) else {
            tracing::warn!(peer = %server, "state change for unknown peer");
            return;
        };
        match machine.transition(next) {
            Ok(from) => tracing::debug!(peer = %server, from = %from, to = %next, "peer state"),
            Err(err) => tracing::warn!(peer = %server, error = %err, "peer state change refused"),
        }
    }

    /// Sleep up to `delay`, waking early on shutdown.
    fn pause(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.stopping() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep(std::cmp::min(deadline - now, SHUTDOWN_POLL));
        }
    }
}

fn run_peer_loop<T, M>(peer: PeerConfig, runtime: PeerRuntime<T, M>)
where
    T: PeerTransport,
    M: MessagingLayer<T::Channel>,
{
    let mut backoff = Backoff::new(runtime.backoff);

    while !runtime.stopping() {
        runtime.set_state(&peer.server, PeerState::Connecting);
        let connect_start = Instant::now();
        match runtime.transport.connect(&peer) {
            Ok(link) => {
                backoff.reset();
                runtime.set_state(&peer.server, PeerState::Connected);
                tracing::info!(peer = %peer.server, addr = %peer.addr, "peer connected");
                runtime
                    .messaging
                    .peer_connected(&peer.server, link.channel);

                wait_for_loss(&link.closed, &runtime);

                runtime.set_state(&peer.server, PeerState::Disconnected);
                runtime.messaging.peer_lost(&peer.server);
                if !runtime.stopping() {
                    tracing::warn!(peer = %peer.server, "peer link lost; rediscovering");
                }
            }
            Err(err) => {
                runtime.set_state(&peer.server, PeerState::Disconnected);
                tracing::warn!(peer = %peer.server, addr = %peer.addr, error = %err, "peer connect failed");
            }
        }

        if runtime.stopping() {
            break;
        }

        let delay = backoff.next_delay();
        let elapsed = connect_start.elapsed();
        if delay > elapsed {
            runtime.pause(delay - elapsed);
        }
    }
}

fn wait_for_loss<T, M>(closed: &Receiver<()>, runtime: &PeerRuntime<T, M>) {
    while !runtime.stopping() {
        match closed.recv_timeout(SHUTDOWN_POLL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

fn snapshot(peers: &PeerTable) -> BTreeMap<ServerId, PeerState> {
    peers
        .lock()
        .expect("peer table lock poisoned")
        .iter()
        .map(|(server, machine)| (server.clone(), machine.state()))
        .collect()
}

#[derive(Debug)]
struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(policy: BackoffPolicy) -> Self {
        Self {
            base: policy.base,
            max: policy.max,
            current: policy.base,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.current.checked_mul(2).unwrap_or(self.max);
        self.current = std::cmp::min(next, self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.base;
    }
}
