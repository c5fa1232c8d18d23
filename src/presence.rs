//! Presence
//!
//! Builds the `onlineUsers` announcement sent to every open connection after
//! the registry changes.

use crate::hub::Delivery;
use crate::protocol::OutboundEvent;
use crate::registry::{ConnectionId, ConnectionRegistry};

pub fn online_users(registry: &ConnectionRegistry) -> OutboundEvent {
    OutboundEvent::OnlineUsers(registry.snapshot().into_iter().collect())
}

/// One `onlineUsers` delivery per connection, registered or not
pub fn announce<I>(registry: &ConnectionRegistry, connections: I) -> Vec<Delivery>
where
    I: IntoIterator<Item = ConnectionId>,
{
    let event = online_users(registry);
    connections
        .into_iter()
        .map(|to| Delivery {
            to,
            event: event.clone(),
        })
        .collect()
}
