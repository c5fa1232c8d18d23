//! Message Relay
//!
//! Best-effort, at-most-once forwarding of chat-message notifications. The
//! durable copy lives in the message store; this path only saves clients a
//! round-trip, so nothing here is queued or retried.

use crate::hub::Delivery;
use crate::protocol::{ChatMessage, OutboundEvent};
use crate::registry::{ConnectionId, ConnectionRegistry};

/// Route `message` to the receiver and to the sender's other live connection.
///
/// `origin` is the connection the message arrived on; it never gets an echo.
pub fn relay(
    registry: &ConnectionRegistry,
    origin: ConnectionId,
    message: ChatMessage,
) -> Vec<Delivery> {
    let receiver_conn = registry.resolve(&message.receiver_id);
    let sender_conn = registry
        .resolve(&message.sender_id)
        .filter(|conn| *conn != origin && Some(*conn) != receiver_conn);

    let targets: Vec<ConnectionId> = receiver_conn.into_iter().chain(sender_conn).collect();
    if targets.is_empty() {
        log::debug!(
            "Dropping message {} -> {}: nobody online to notify",
            message.sender_id,
            message.receiver_id
        );
        return Vec::new();
    }

    let event = OutboundEvent::ShareMsg(message);
    targets
        .into_iter()
        .map(|to| Delivery {
            to,
            event: event.clone(),
        })
        .collect()
}
