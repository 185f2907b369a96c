use std::net::IpAddr;
use std::time::Duration;

use super::protocol::{MAX_DATAGRAM_SIZE, MAX_PACKET_SIZE};

#[derive(Debug, Clone)]
pub struct NetConfig {
    pub max_packet_size: usize,
    pub max_datagram_size: usize,
    pub read_buffer_size: usize,
    pub max_pending_write_bytes: usize,
    pub max_connections: usize,
    pub poll_timeout: Duration,
    pub port_check_hosts: Vec<IpAddr>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            max_datagram_size: MAX_DATAGRAM_SIZE,
            read_buffer_size: 64 * 1024,
            max_pending_write_bytes: 4 * MAX_PACKET_SIZE,
            max_connections: 1024,
            poll_timeout: Duration::from_millis(10),
            port_check_hosts: Vec::new(),
        }
    }
}

impl NetConfig {
    pub fn is_port_check_host(&self, ip: IpAddr) -> bool {
        self.port_check_hosts.contains(&ip)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub max_packet_size: usize,
    pub max_datagram_size: usize,
    pub handshake_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            max_datagram_size: MAX_DATAGRAM_SIZE,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}
