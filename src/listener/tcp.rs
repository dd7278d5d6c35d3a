//! TCP stream ingress.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::event::EventSender;
use crate::parser::line_to_events;
use crate::telemetry::{SampleError, Telemetry};

/// Longest accepted line, including the delimiter.
const MAX_LINE_LENGTH: usize = 65536;

/// Accepts StatsD connections and reads newline-delimited samples from each.
pub struct TcpListener {
    listener: tokio::net::TcpListener,
    sender: EventSender,
    telemetry: Arc<Telemetry>,
}

impl TcpListener {
    /// Binds a TCP listener on `addr`.
    pub async fn bind(
        addr: SocketAddr,
        sender: EventSender,
        telemetry: Arc<Telemetry>,
    ) -> io::Result<TcpListener> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        Ok(TcpListener { listener, sender, telemetry })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the socket fails, serving each connection
    /// on its own task. An accept failure terminates the listener.
    pub async fn listen(self) -> io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            self.telemetry.increment_tcp_connections();
            let sender = self.sender.clone();
            let telemetry = Arc::clone(&self.telemetry);
            tokio::spawn(handle_connection(stream, peer, sender, telemetry));
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    sender: EventSender,
    telemetry: Arc<Telemetry>,
) {
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::with_capacity(1024);
    loop {
        buffer.clear();
        let mut limited = (&mut reader).take(MAX_LINE_LENGTH as u64);
        match limited.read_until(b'\n', &mut buffer).await {
            // End of stream closes the connection quietly.
            Ok(0) => return,
            Ok(_) => {
                if buffer.last() != Some(&b'\n') && buffer.len() >= MAX_LINE_LENGTH {
                    telemetry.increment_tcp_line_too_long();
                    debug!(peer = %peer, "closing connection: line too long");
                    return;
                }

                let mut line = buffer.as_slice();
                if line.last() == Some(&b'\n') {
                    line = &line[..line.len() - 1];
                }
                if line.last() == Some(&b'\r') {
                    line = &line[..line.len() - 1];
                }

                telemetry.increment_lines();
                match std::str::from_utf8(line) {
                    Ok(line) => sender.queue(line_to_events(line, &telemetry)).await,
                    Err(_) => {
                        telemetry.increment_sample_error(SampleError::MalformedLine);
                        debug!(peer = %peer, "discarding line with invalid utf-8");
                    }
                }
            }
            Err(error) => {
                telemetry.increment_tcp_errors();
                debug!(peer = %peer, error = %error, "read from connection failed");
                return;
            }
        }
    }
}
