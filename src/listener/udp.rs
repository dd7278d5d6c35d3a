//! UDP datagram ingress.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::event::EventSender;
use crate::telemetry::Telemetry;

use super::{dispatch_packet, PACKET_BUFFER_SIZE};

/// Receives StatsD datagrams over UDP; one datagram is one packet.
pub struct UdpListener {
    socket: UdpSocket,
    sender: EventSender,
    telemetry: Arc<Telemetry>,
}

impl UdpListener {
    /// Binds a UDP socket on `addr`.
    pub async fn bind(
        addr: SocketAddr,
        sender: EventSender,
        telemetry: Arc<Telemetry>,
    ) -> io::Result<UdpListener> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(UdpListener { socket, sender, telemetry })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receives packets until the socket fails; a socket error is the
    /// listener's shutdown signal.
    pub async fn listen(self) -> io::Result<()> {
        let mut buffer = vec![0u8; PACKET_BUFFER_SIZE];
        loop {
            let (len, _) = self.socket.recv_from(&mut buffer).await?;
            self.telemetry.increment_udp_packets();
            dispatch_packet(&buffer[..len], &self.sender, &self.telemetry).await;
        }
    }
}
