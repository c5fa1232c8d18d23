//! Connection Hub
//!
//! Owns the registry, each connection's outbox, and the signaling
//! coordinator behind one lock. Registration changes take the write lock;
//! relays and signals run under the read lock, so a resolve-then-send never
//! interleaves with a register or unregister.
//!
//! Outbound delivery never waits: each connection has a bounded outbox and an
//! event that doesn't fit is dropped.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::config::{ServerConfig, SignalingConfig};
use crate::presence;
use crate::protocol::{InboundEvent, OutboundEvent};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::relay;
use crate::signaling::{CallState, SignalingCoordinator};

/// An outbound event addressed to one connection
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: ConnectionId,
    pub event: OutboundEvent,
}

#[derive(Debug, Clone, Copy)]
pub struct HubOptions {
    pub outbox_capacity: usize,
    pub signaling: SignalingConfig,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            outbox_capacity: 256,
            signaling: SignalingConfig::default(),
        }
    }
}

impl From<&ServerConfig> for HubOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            outbox_capacity: config.outbox_capacity,
            signaling: config.signaling,
        }
    }
}

struct HubState {
    registry: ConnectionRegistry,
    outboxes: HashMap<ConnectionId, mpsc::Sender<OutboundEvent>>,
    signaling: SignalingCoordinator,
}

impl HubState {
    fn deliver(&self, deliveries: Vec<Delivery>) {
        for Delivery { to, event } in deliveries {
            let Some(outbox) = self.outboxes.get(&to) else {
                log::debug!("No outbox for {}, dropping {}", to, event.kind());
                continue;
            };
            match outbox.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    log::warn!("Outbox full for {}, dropping {}", to, event.kind());
                }
                Err(TrySendError::Closed(event)) => {
                    log::debug!("Outbox closed for {}, dropping {}", to, event.kind());
                }
            }
        }
    }

    fn announce_presence(&self) {
        let deliveries = presence::announce(&self.registry, self.outboxes.keys().copied());
        self.deliver(deliveries);
    }
}

pub struct ConnectionHub {
    state: RwLock<HubState>,
    outbox_capacity: usize,
}

impl ConnectionHub {
    pub fn new(options: HubOptions) -> Self {
        Self {
            state: RwLock::new(HubState {
                registry: ConnectionRegistry::new(),
                outboxes: HashMap::new(),
                signaling: SignalingCoordinator::new(options.signaling),
            }),
            outbox_capacity: options.outbox_capacity.max(1),
        }
    }

    /// Open a transport-only connection. Nothing is announced until `addUser`.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<OutboundEvent>) {
        let connection_id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.outbox_capacity);
        self.state.write().outboxes.insert(connection_id, tx);
        log::debug!("Connection {} opened", connection_id);
        (connection_id, rx)
    }

    /// Dispatch one inbound event from `connection_id`
    pub fn handle(&self, connection_id: ConnectionId, event: InboundEvent) {
        log::debug!("{} from {}", event.kind(), connection_id);

        match event {
            InboundEvent::AddUser(user_id) => self.add_user(connection_id, &user_id),
            InboundEvent::SendMsg(message) => {
                let state = self.state.read();
                let deliveries = relay::relay(&state.registry, connection_id, message);
                state.deliver(deliveries);
            }
            InboundEvent::CallUser {
                from_user_id,
                to_user_id,
                offer,
            } => {
                let state = self.state.read();
                let deliveries =
                    state
                        .signaling
                        .call_user(&state.registry, &from_user_id, &to_user_id, offer);
                state.deliver(deliveries);
            }
            InboundEvent::AnswerCall {
                from_user_id,
                to_user_id,
                answer,
            } => {
                let state = self.state.read();
                let deliveries =
                    state
                        .signaling
                        .answer_call(&state.registry, &from_user_id, &to_user_id, answer);
                state.deliver(deliveries);
            }
            InboundEvent::IceCandidate {
                from_user_id,
                to_user_id,
                candidate,
            } => {
                let state = self.state.read();
                let deliveries = state.signaling.ice_candidate(
                    &state.registry,
                    &from_user_id,
                    &to_user_id,
                    candidate,
                );
                state.deliver(deliveries);
            }
            InboundEvent::EndCall {
                from_user_id,
                to_user_id,
            } => {
                let state = self.state.read();
                let deliveries = state
                    .signaling
                    .end_call(&state.registry, &from_user_id, &to_user_id);
                state.deliver(deliveries);
            }
        }
    }

    fn add_user(&self, connection_id: ConnectionId, user_id: &str) {
        let mut state = self.state.write();
        if !state.outboxes.contains_key(&connection_id) {
            log::debug!("Ignoring addUser {} from closed connection {}", user_id, connection_id);
            return;
        }

        match state.registry.register(user_id, connection_id) {
            Some(previous) if previous == connection_id => {
                log::debug!("User {} re-added on {}", user_id, connection_id)
            }
            Some(previous) => log::info!(
                "User {} moved to {} (superseded {})",
                user_id,
                connection_id,
                previous
            ),
            None => log::info!("User added: {} -> {}", user_id, connection_id),
        }
        state.announce_presence();
    }

    /// Tear down a connection. Only the first call for a given id has any effect.
    pub fn disconnect(&self, connection_id: ConnectionId) -> bool {
        let mut state = self.state.write();
        if state.outboxes.remove(&connection_id).is_none() {
            return false;
        }

        let departed = state.registry.unregister(connection_id);
        let deliveries = state.signaling.users_departed(&state.registry, &departed);
        state.deliver(deliveries);
        state.announce_presence();

        log::info!("Disconnected: {} (users {:?})", connection_id, departed);
        true
    }

    pub fn online_users(&self) -> BTreeSet<String> {
        self.state.read().registry.snapshot()
    }

    pub fn resolve(&self, user_id: &str) -> Option<ConnectionId> {
        self.state.read().registry.resolve(user_id)
    }

    pub fn call_state(&self, a: &str, b: &str) -> CallState {
        self.state.read().signaling.call_state(a, b)
    }

    pub fn connection_count(&self) -> usize {
        self.state.read().outboxes.len()
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(HubOptions::default())
    }
}
