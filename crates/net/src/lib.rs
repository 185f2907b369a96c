pub mod codec;
pub mod net;

pub use codec::{CodecError, Marshaller, Unmarshaller};
pub use net::{
    Channel, ClientConfig, Connection, ConnectionError, ConnectionHandle, ConnectionId,
    ConnectionRegistry, ConnectionState, ConnectionStats, CorrelationId, NetConfig,
    NetworkClient, NetworkSelector, NetworkStats, Packet, PacketDispatch, PacketFramer,
    ProcessingScheduler, ShutdownHandle, WorkerPool, DEFAULT_PORT, MAX_DATAGRAM_SIZE,
    MAX_PACKET_SIZE, PORT_CHECK_MAGIC, PROTOCOL_VERSION,
};
