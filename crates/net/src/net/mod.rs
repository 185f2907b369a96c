mod client;
mod config;
mod connection;
mod error;
mod framing;
mod port_check;
mod processing;
mod protocol;
mod registry;
mod selector;
mod stats;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use client::NetworkClient;
pub use config::{ClientConfig, NetConfig};
pub use connection::{
    Connection, ConnectionHandle, ConnectionId, ConnectionState, DatagramSender, ReadOutcome,
    ReadReport,
};
pub use error::ConnectionError;
pub use framing::PacketFramer;
pub use port_check::{probe_tcp, probe_udp};
pub use processing::{PacketDispatch, ProcessingScheduler, WorkerPool};
pub use protocol::{
    decode_handshake, encode_datagram, encode_frame, encode_handshake, encode_port_check,
    parse_datagram, Channel, CorrelationId, Datagram, HandshakeError, Packet,
    DATAGRAM_HEADER_SIZE, DEFAULT_PORT, FRAME_HEADER_SIZE, HANDSHAKE_SIZE, MAX_DATAGRAM_SIZE,
    MAX_PACKET_SIZE, PORT_CHECK_MAGIC, PROTOCOL_VERSION,
};
pub use registry::ConnectionRegistry;
pub use selector::{DisconnectReason, NetworkSelector, ShutdownHandle};
pub use stats::{ConnectionStats, NetworkStats};

/// Locks `mutex`, carrying on with the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
