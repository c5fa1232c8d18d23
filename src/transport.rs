//! Connection transport
//!
//! Drives one client stream: a reader task decodes frames in arrival order
//! and hands them to the hub, a writer task drains the connection's outbox.
//! Whichever finishes first ends the connection, and the hub's disconnect
//! runs exactly once afterwards.

use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::hub::ConnectionHub;
use crate::protocol::{read_frame, write_frame, InboundEvent, ProtocolError};

/// Serve a connected client until it closes or its stream fails
pub async fn serve_connection<S>(
    stream: S,
    peer_addr: SocketAddr,
    hub: Arc<ConnectionHub>,
    max_frame_bytes: usize,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (connection_id, mut outbox) = hub.connect();
    info!("Connected: {} ({})", connection_id, peer_addr);

    let (mut read_half, mut write_half) = tokio::io::split(stream);

    let mut writer = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            write_frame(&mut write_half, &event).await?;
        }
        Ok::<(), ProtocolError>(())
    });

    let reader_hub = hub.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = read_frame(&mut read_half, max_frame_bytes).await? {
            match InboundEvent::decode(&frame) {
                Ok(Some(event)) => reader_hub.handle(connection_id, event),
                Ok(None) => {}
                Err(e) => warn!("Malformed event from {}: {}", connection_id, e),
            }
        }
        debug!("{} closed its stream", connection_id);
        Ok::<(), ProtocolError>(())
    });

    let joined = tokio::select! {
        result = &mut reader => {
            writer.abort();
            result
        }
        result = &mut writer => {
            reader.abort();
            result
        }
    };

    hub.disconnect(connection_id);
    info!("Disconnected: {} ({})", connection_id, peer_addr);

    joined.map_err(|e| ProtocolError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}
