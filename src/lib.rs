//! Duo Chat - Presence and Call Signaling Coordinator
//!
//! Tracks which users hold a live connection, relays chat-message
//! notifications between them, and forwards the offer/answer/ICE exchange
//! that sets up peer-to-peer audio/video calls.

pub mod config;
pub mod hub;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod signaling;
pub mod transport;

pub use config::{ClientConfig, ServerConfig};
pub use hub::{ConnectionHub, Delivery, HubOptions};
pub use protocol::{ChatMessage, InboundEvent, OutboundEvent};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use signaling::{CallState, SignalingCoordinator};
