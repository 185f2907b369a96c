#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub connections_accepted: u64,
    pub connections_refused: u64,
    pub connections_closed: u64,
    pub protocol_violations: u64,
    pub tcp_bytes_received: u64,
    pub udp_packets_received: u64,
    pub udp_bytes_received: u64,
    pub datagrams_dropped: u64,
    pub port_checks_answered: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub packets_received: u64,
    pub packets_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub datagrams_sent: u64,
    pub datagrams_dropped: u64,
}
