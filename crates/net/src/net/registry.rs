use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use super::connection::{Connection, ConnectionHandle, ConnectionId};
use super::protocol::CorrelationId;

/// Live connections plus the tables that attribute UDP datagrams to them.
///
/// Only ever touched by the network thread.
pub struct ConnectionRegistry<S> {
    connections: HashMap<ConnectionId, Connection<S>>,
    by_correlation: HashMap<CorrelationId, ConnectionId>,
    by_datagram: HashMap<(SocketAddr, CorrelationId), ConnectionId>,
    max_connections: usize,
}

impl<S> ConnectionRegistry<S> {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            by_correlation: HashMap::new(),
            by_datagram: HashMap::new(),
            max_connections,
        }
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    pub fn is_correlation_taken(&self, id: CorrelationId) -> bool {
        self.by_correlation.contains_key(&id)
    }

    pub fn insert(&mut self, connection: Connection<S>) -> &mut Connection<S> {
        let id = connection.id();
        self.by_correlation.insert(connection.correlation_id(), id);
        self.connections.entry(id).insert_entry(connection).into_mut()
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection<S>> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<S>> {
        self.connections.get_mut(&id)
    }

    /// Drops the connection from every table; datagrams still carrying its
    /// correlation id become unknown.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection<S>> {
        let connection = self.connections.remove(&id)?;
        let correlation_id = connection.correlation_id();
        self.by_correlation.remove(&correlation_id);
        if let Some(addr) = connection.udp_addr() {
            self.by_datagram.remove(&(addr, correlation_id));
        }
        Some(connection)
    }

    /// Finds the connection a datagram belongs to. The first datagram for a
    /// connection binds its UDP address, provided it comes from the same
    /// host as the TCP stream.
    pub fn route_datagram(&mut self, from: SocketAddr, id: CorrelationId) -> Option<ConnectionId> {
        if let Some(&connection_id) = self.by_datagram.get(&(from, id)) {
            return Some(connection_id);
        }

        let connection_id = *self.by_correlation.get(&id)?;
        let connection = self.connections.get_mut(&connection_id)?;
        if connection.udp_addr().is_some()
            || connection.peer_addr().ip() != from.ip()
            || !connection.state().is_open()
        {
            return None;
        }

        connection.bind_udp(from);
        self.by_datagram.insert((from, id), connection_id);
        log::debug!("{}: UDP bound to {}", connection, from);
        Some(connection_id)
    }

    /// Queues `payload` on the owning connection, if any.
    pub fn deliver_datagram(
        &mut self,
        from: SocketAddr,
        id: CorrelationId,
        payload: &[u8],
    ) -> Option<Arc<ConnectionHandle>> {
        let connection_id = self.route_datagram(from, id)?;
        let handle = self.connections.get(&connection_id)?.handle();
        handle.feed_immediate(payload.to_vec());
        Some(Arc::clone(handle))
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection<S>> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Connection<S>> + '_ {
        self.by_correlation.clear();
        self.by_datagram.clear();
        self.connections.drain().map(|(_, connection)| connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::tests::{connection, MockStream};

    fn registry() -> ConnectionRegistry<MockStream> {
        let mut registry = ConnectionRegistry::new(8);
        registry.insert(connection(1, 0x11));
        registry.insert(connection(2, 0x22));
        registry
    }

    fn udp(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_unknown_correlation_is_dropped() {
        let mut registry = registry();
        assert!(registry
            .deliver_datagram(udp(5000), CorrelationId(0x99), b"stray")
            .is_none());
        for connection in registry.iter() {
            assert_eq!(connection.handle().pending_inbound(), 0);
        }
    }

    #[test]
    fn test_datagram_reaches_only_its_connection() {
        let mut registry = registry();
        let handle = registry
            .deliver_datagram(udp(5000), CorrelationId(0x22), b"hello")
            .unwrap();
        assert_eq!(handle.id(), ConnectionId(2));

        let two = registry.get(ConnectionId(2)).unwrap();
        assert_eq!(two.handle().pending_inbound(), 1);
        assert_eq!(two.udp_addr(), Some(udp(5000)));
        assert_eq!(
            registry.get(ConnectionId(1)).unwrap().handle().pending_inbound(),
            0
        );

        assert_eq!(
            registry.route_datagram(udp(5000), CorrelationId(0x22)),
            Some(ConnectionId(2))
        );
    }

    #[test]
    fn test_bound_connection_rejects_other_addresses() {
        let mut registry = registry();
        registry.route_datagram(udp(5000), CorrelationId(0x11)).unwrap();
        assert_eq!(registry.route_datagram(udp(5001), CorrelationId(0x11)), None);
    }

    #[test]
    fn test_foreign_host_cannot_bind() {
        let mut registry = registry();
        let foreign: SocketAddr = "10.1.2.3:5000".parse().unwrap();
        assert_eq!(registry.route_datagram(foreign, CorrelationId(0x11)), None);
        assert_eq!(registry.get(ConnectionId(1)).unwrap().udp_addr(), None);
    }

    #[test]
    fn test_remove_forgets_correlation() {
        let mut registry = registry();
        registry.route_datagram(udp(5000), CorrelationId(0x11)).unwrap();
        assert!(registry.is_correlation_taken(CorrelationId(0x11)));

        let removed = registry.remove(ConnectionId(1)).unwrap();
        assert_eq!(removed.id(), ConnectionId(1));
        assert!(!registry.is_correlation_taken(CorrelationId(0x11)));
        assert_eq!(registry.route_datagram(udp(5000), CorrelationId(0x11)), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_capacity() {
        let mut registry = ConnectionRegistry::new(1);
        assert!(!registry.is_full());
        registry.insert(connection(1, 0x11));
        assert!(registry.is_full());
    }
}
