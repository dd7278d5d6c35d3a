//! Unix datagram ingress; identical framing to UDP.

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::net::UnixDatagram;

use crate::event::EventSender;
use crate::telemetry::Telemetry;

use super::{dispatch_packet, PACKET_BUFFER_SIZE};

/// Receives StatsD datagrams over a filesystem socket.
pub struct UnixgramListener {
    socket: UnixDatagram,
    sender: EventSender,
    telemetry: Arc<Telemetry>,
}

impl UnixgramListener {
    /// Binds a datagram socket at `path`.
    pub fn bind(
        path: &Path,
        sender: EventSender,
        telemetry: Arc<Telemetry>,
    ) -> io::Result<UnixgramListener> {
        let socket = UnixDatagram::bind(path)?;
        Ok(UnixgramListener { socket, sender, telemetry })
    }

    /// Receives packets until the socket fails; a socket error is the
    /// listener's shutdown signal.
    pub async fn listen(self) -> io::Result<()> {
        let mut buffer = vec![0u8; PACKET_BUFFER_SIZE];
        loop {
            let (len, _) = self.socket.recv_from(&mut buffer).await?;
            self.telemetry.increment_unixgram_packets();
            dispatch_packet(&buffer[..len], &self.sender, &self.telemetry).await;
        }
    }
}
