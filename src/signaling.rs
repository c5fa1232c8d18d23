//! Call Signaling
//!
//! Routes the offer/answer/ICE/hang-up exchange that sets up a peer-to-peer
//! call. Every event names both participants, so forwarding only needs the
//! registry. A transient [`CallTracker`] follows each pair's progress so the
//! coordinator can optionally reject out-of-order signals and tell a partner
//! when the other side vanished mid-call.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

use crate::config::SignalingConfig;
use crate::hub::Delivery;
use crate::protocol::{OutboundEvent, USER_NOT_ONLINE};
use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Ringing,
    Active,
    Ended,
}

/// One negotiation between two users
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub caller_id: String,
    pub callee_id: String,
    pub state: CallState,
}

impl CallSession {
    fn involves(&self, user_id: &str) -> bool {
        self.caller_id == user_id || self.callee_id == user_id
    }

    fn partner_of(&self, user_id: &str) -> &str {
        if self.caller_id == user_id {
            &self.callee_id
        } else {
            &self.caller_id
        }
    }
}

/// Unordered participant pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CallKey(String, String);

impl CallKey {
    fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }
}

/// In-memory call progress keyed by participant pair.
///
/// Ended calls are removed, so an absent pair reads as `Idle`.
#[derive(Debug, Default)]
pub struct CallTracker {
    calls: HashMap<CallKey, CallSession>,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, a: &str, b: &str) -> CallState {
        self.calls
            .get(&CallKey::new(a, b))
            .map(|call| call.state)
            .unwrap_or(CallState::Idle)
    }

    pub fn get(&self, a: &str, b: &str) -> Option<&CallSession> {
        self.calls.get(&CallKey::new(a, b))
    }

    /// Start ringing, replacing whatever the pair had before
    pub fn ring(&mut self, caller_id: &str, callee_id: &str) {
        self.calls.insert(
            CallKey::new(caller_id, callee_id),
            CallSession {
                caller_id: caller_id.to_string(),
                callee_id: callee_id.to_string(),
                state: CallState::Ringing,
            },
        );
    }

    /// Ringing → Active. Returns false when no matching ringing call exists.
    pub fn answer(&mut self, callee_id: &str, caller_id: &str) -> bool {
        match self.calls.get_mut(&CallKey::new(caller_id, callee_id)) {
            Some(call)
                if call.state == CallState::Ringing
                    && call.caller_id == caller_id
                    && call.callee_id == callee_id =>
            {
                call.state = CallState::Active;
                true
            }
            _ => false,
        }
    }

    pub fn end(&mut self, a: &str, b: &str) -> Option<CallSession> {
        self.calls.remove(&CallKey::new(a, b)).map(|mut call| {
            call.state = CallState::Ended;
            call
        })
    }

    /// End every call `user_id` takes part in
    pub fn end_all_for(&mut self, user_id: &str) -> Vec<CallSession> {
        let keys: Vec<CallKey> = self
            .calls
            .iter()
            .filter(|(_, call)| call.involves(user_id))
            .map(|(key, _)| key.clone())
            .collect();

        keys.into_iter()
            .filter_map(|key| self.calls.remove(&key))
            .map(|mut call| {
                call.state = CallState::Ended;
                call
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

pub struct SignalingCoordinator {
    config: SignalingConfig,
    calls: Mutex<CallTracker>,
}

impl SignalingCoordinator {
    pub fn new(config: SignalingConfig) -> Self {
        Self {
            config,
            calls: Mutex::new(CallTracker::new()),
        }
    }

    pub fn call_state(&self, a: &str, b: &str) -> CallState {
        self.calls.lock().state(a, b)
    }

    pub fn call_user(
        &self,
        registry: &ConnectionRegistry,
        from_user_id: &str,
        to_user_id: &str,
        offer: Value,
    ) -> Vec<Delivery> {
        let Some(callee_conn) = registry.resolve(to_user_id) else {
            log::debug!("Call from {} to offline user {}", from_user_id, to_user_id);
            return registry
                .resolve(from_user_id)
                .map(|caller_conn| Delivery {
                    to: caller_conn,
                    event: OutboundEvent::CallUnavailable {
                        to_user_id: to_user_id.to_string(),
                        message: USER_NOT_ONLINE.to_string(),
                    },
                })
                .into_iter()
                .collect();
        };

        self.calls.lock().ring(from_user_id, to_user_id);
        log::info!("Call ringing: {} -> {}", from_user_id, to_user_id);

        vec![Delivery {
            to: callee_conn,
            event: OutboundEvent::IncomingCall {
                from_user_id: from_user_id.to_string(),
                offer,
            },
        }]
    }

    /// `from_user_id` is the callee answering `to_user_id`'s call
    pub fn answer_call(
        &self,
        registry: &ConnectionRegistry,
        from_user_id: &str,
        to_user_id: &str,
        answer: Value,
    ) -> Vec<Delivery> {
        let Some(caller_conn) = registry.resolve(to_user_id) else {
            log::debug!("Dropping answer from {}: {} is offline", from_user_id, to_user_id);
            return Vec::new();
        };

        let mut calls = self.calls.lock();
        if !calls.answer(from_user_id, to_user_id) {
            log::debug!(
                "Answer from {} to {} without a ringing call (state {:?})",
                from_user_id,
                to_user_id,
                calls.state(from_user_id, to_user_id)
            );
            if self.config.enforce_call_state {
                return Vec::new();
            }
        } else {
            log::info!("Call active: {} <-> {}", to_user_id, from_user_id);
        }

        vec![Delivery {
            to: caller_conn,
            event: OutboundEvent::CallAnswered {
                from_user_id: from_user_id.to_string(),
                answer,
            },
        }]
    }

    pub fn ice_candidate(
        &self,
        registry: &ConnectionRegistry,
        from_user_id: &str,
        to_user_id: &str,
        candidate: Value,
    ) -> Vec<Delivery> {
        let Some(peer_conn) = registry.resolve(to_user_id) else {
            log::debug!("Dropping ICE candidate from {}: {} is offline", from_user_id, to_user_id);
            return Vec::new();
        };

        let state = self.calls.lock().state(from_user_id, to_user_id);
        if !matches!(state, CallState::Ringing | CallState::Active) {
            log::debug!(
                "ICE candidate from {} to {} outside a call (state {:?})",
                from_user_id,
                to_user_id,
                state
            );
            if self.config.enforce_call_state {
                return Vec::new();
            }
        }

        vec![Delivery {
            to: peer_conn,
            event: OutboundEvent::IceCandidate {
                from_user_id: from_user_id.to_string(),
                candidate,
            },
        }]
    }

    pub fn end_call(
        &self,
        registry: &ConnectionRegistry,
        from_user_id: &str,
        to_user_id: &str,
    ) -> Vec<Delivery> {
        let ended = self.calls.lock().end(from_user_id, to_user_id);
        match &ended {
            Some(_) => log::info!("Call ended by {} (partner {})", from_user_id, to_user_id),
            None => {
                log::debug!("Hang-up from {} to {} without a call", from_user_id, to_user_id);
                if self.config.enforce_call_state {
                    return Vec::new();
                }
            }
        }

        registry
            .resolve(to_user_id)
            .map(|peer_conn| Delivery {
                to: peer_conn,
                event: OutboundEvent::CallEnded {
                    from_user_id: from_user_id.to_string(),
                },
            })
            .into_iter()
            .collect()
    }

    /// Forget the calls of users whose connection closed.
    ///
    /// Partners are only told when `end_calls_on_disconnect` is set.
    pub fn users_departed(&self, registry: &ConnectionRegistry, user_ids: &[String]) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        let mut calls = self.calls.lock();

        for user_id in user_ids {
            for call in calls.end_all_for(user_id) {
                let partner = call.partner_of(user_id);
                log::info!("Call between {} and {} ended by disconnect", user_id, partner);

                if !self.config.end_calls_on_disconnect {
                    continue;
                }
                if let Some(partner_conn) = registry.resolve(partner) {
                    deliveries.push(Delivery {
                        to: partner_conn,
                        event: OutboundEvent::CallEnded {
                            from_user_id: user_id.clone(),
                        },
                    });
                }
            }
        }

        deliveries
    }
}
