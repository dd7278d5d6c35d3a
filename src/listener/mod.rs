//! Socket ingress: datagram and stream listeners that split incoming bytes
//! into lines and feed the event channel.

mod tcp;
mod udp;
#[cfg(unix)]
mod unixgram;

pub use tcp::TcpListener;
pub use udp::UdpListener;
#[cfg(unix)]
pub use unixgram::UnixgramListener;

use tracing::debug;

use crate::event::EventSender;
use crate::parser::line_to_events;
use crate::telemetry::{SampleError, Telemetry};

/// Datagram receive buffer size; one datagram is one packet.
pub(crate) const PACKET_BUFFER_SIZE: usize = 65535;

/// Splits one datagram into lines and queues the parsed batches in order.
pub(crate) async fn dispatch_packet(packet: &[u8], sender: &EventSender, telemetry: &Telemetry) {
    for raw_line in packet.split(|byte| *byte == b'\n') {
        telemetry.increment_lines();
        match std::str::from_utf8(raw_line) {
            Ok(line) => sender.queue(line_to_events(line, telemetry)).await,
            Err(_) => {
                telemetry.increment_sample_error(SampleError::MalformedLine);
                debug!("discarding line with invalid utf-8");
            }
        }
    }
}
