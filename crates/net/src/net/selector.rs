use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Events, Interest, Poll, Token, Waker};

use super::config::NetConfig;
use super::connection::{Connection, ConnectionHandle, ConnectionId, ReadOutcome};
use super::processing::ProcessingScheduler;
use super::protocol::{encode_port_check, parse_datagram, CorrelationId, Datagram};
use super::registry::ConnectionRegistry;
use super::stats::NetworkStats;

const LISTENER: Token = Token(0);
const DATAGRAM: Token = Token(1);
const WAKER: Token = Token(2);
const FIRST_CONNECTION: usize = 3;

const EVENTS_CAPACITY: usize = 1024;
const DATAGRAM_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Listener,
    Datagram,
    Waker,
    Stream(ConnectionId),
}

impl Source {
    fn from_token(token: Token) -> Self {
        match token {
            LISTENER => Source::Listener,
            DATAGRAM => Source::Datagram,
            WAKER => Source::Waker,
            Token(n) => Source::Stream(ConnectionId(n)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClosedByPeer,
    ProtocolViolation,
    IoError,
    WriteBacklog,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClosedByPeer => "closed by peer",
            DisconnectReason::ProtocolViolation => "protocol violation",
            DisconnectReason::IoError => "i/o error",
            DisconnectReason::WriteBacklog => "write backlog exceeded",
            DisconnectReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            log::warn!("Failed to wake network selector: {}", e);
        }
    }
}

/// Single-threaded readiness loop owning the listener, the shared UDP
/// socket and every connection's TCP stream.
pub struct NetworkSelector {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    socket: UdpSocket,
    waker: Arc<Waker>,
    local_addr: SocketAddr,
    registry: ConnectionRegistry<TcpStream>,
    scheduler: Arc<dyn ProcessingScheduler>,
    config: NetConfig,
    scratch: Box<[u8]>,
    datagram_buffer: Box<[u8]>,
    next_id: usize,
    running: Arc<AtomicBool>,
    stats: NetworkStats,
}

impl NetworkSelector {
    /// Binds TCP on `addr` and UDP on the same address and port.
    pub fn bind(
        addr: SocketAddr,
        config: NetConfig,
        scheduler: Arc<dyn ProcessingScheduler>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;

        let mut listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let mut socket = UdpSocket::bind(local_addr)?;

        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        poll.registry()
            .register(&mut socket, DATAGRAM, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        log::info!("Listening on {} (tcp+udp)", local_addr);

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            listener,
            socket,
            waker,
            local_addr,
            registry: ConnectionRegistry::new(config.max_connections),
            scheduler,
            scratch: vec![0u8; config.read_buffer_size].into_boxed_slice(),
            datagram_buffer: vec![0u8; DATAGRAM_BUFFER_SIZE].into_boxed_slice(),
            config,
            next_id: FIRST_CONNECTION,
            running: Arc::new(AtomicBool::new(true)),
            stats: NetworkStats::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn udp_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: Arc::clone(&self.running),
            waker: Arc::clone(&self.waker),
        }
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.registry.get(id).map(|c| Arc::clone(c.handle()))
    }

    pub fn connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.registry.iter().map(|c| Arc::clone(c.handle())).collect()
    }

    /// Runs until shut down, then closes every connection and both
    /// sockets before handing back the final counters.
    pub fn run(mut self) -> NetworkStats {
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.poll_once(Some(self.config.poll_timeout)) {
                log::error!("Selector poll failed: {}", e);
                thread::sleep(self.config.poll_timeout);
            }
        }
        self.close()
    }

    /// One wake-up: handle every ready source, then flush every
    /// connection's pending writes. Only a failing `poll` is returned;
    /// per-peer errors are logged and cost that peer its connection.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e),
        }

        let sources: Vec<Source> = self
            .events
            .iter()
            .filter(|event| {
                event.token() == WAKER
                    || event.is_readable()
                    || event.is_read_closed()
                    || event.is_error()
            })
            .map(|event| Source::from_token(event.token()))
            .collect();

        for &source in &sources {
            match source {
                Source::Listener => self.accept_connections(),
                Source::Datagram => self.receive_datagrams(),
                Source::Waker => {}
                Source::Stream(id) => self.read_connection(id),
            }
        }

        self.write_all_pending();
        Ok(sources.len())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.on_accept(stream, addr),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("Accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn on_accept(&mut self, mut stream: TcpStream, addr: SocketAddr) {
        if self.config.is_port_check_host(addr.ip()) {
            match stream.write(&encode_port_check()) {
                Ok(_) => {
                    self.stats.port_checks_answered += 1;
                    log::info!("Answered TCP port check from {}", addr);
                }
                Err(e) => log::warn!("Port check reply to {} failed: {}", addr, e),
            }
            return;
        }

        if self.registry.is_full() {
            self.stats.connections_refused += 1;
            log::warn!(
                "Refusing {}: {} connections already open",
                addr,
                self.registry.len()
            );
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("{}: failed to disable Nagle: {}", addr, e);
        }

        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        let correlation_id = CorrelationId::generate(|c| self.registry.is_correlation_taken(c));

        let mut connection = match Connection::new(id, stream, addr, correlation_id, &self.config)
        {
            Ok(connection) => connection,
            Err(e) => {
                log::warn!("Failed to set up connection from {}: {}", addr, e);
                return;
            }
        };

        if let Err(e) = self.poll.registry().register(
            connection.stream_mut(),
            Token(id.0),
            Interest::READABLE | Interest::WRITABLE,
        ) {
            log::warn!("Failed to register {}: {}", addr, e);
            return;
        }

        connection.handle().set_waker(Arc::clone(&self.waker));
        let handle = Arc::clone(connection.handle());
        self.registry.insert(connection);
        self.stats.connections_accepted += 1;

        log::info!(
            "Accepted {} as {} ({} open)",
            addr,
            id,
            self.registry.len()
        );
        self.scheduler.connection_opened(&handle);
    }

    fn receive_datagrams(&mut self) {
        loop {
            match self.socket.recv_from(&mut self.datagram_buffer) {
                Ok((len, from)) => self.on_datagram(len, from),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e)
                    if e.kind() == io::ErrorKind::Interrupted
                        || e.kind() == io::ErrorKind::ConnectionReset =>
                {
                    continue;
                }
                Err(e) => {
                    log::warn!("UDP receive failed: {}", e);
                    break;
                }
            }
        }
    }

    fn on_datagram(&mut self, len: usize, from: SocketAddr) {
        self.stats.udp_packets_received += 1;
        self.stats.udp_bytes_received += len as u64;

        if len > self.config.max_datagram_size {
            log::debug!("Dropping {} byte datagram from {}", len, from);
            self.stats.datagrams_dropped += 1;
            return;
        }

        match parse_datagram(&self.datagram_buffer[..len]) {
            Datagram::PortCheck => match self.socket.send_to(&encode_port_check(), from) {
                Ok(_) => {
                    self.stats.port_checks_answered += 1;
                    log::info!("Answered UDP port check from {}", from);
                }
                Err(e) => log::warn!("Port check reply to {} failed: {}", from, e),
            },
            Datagram::Tagged { id, payload } => {
                match self.registry.deliver_datagram(from, id, payload) {
                    Some(handle) => self.scheduler.enqueue_processing(handle),
                    None => {
                        log::debug!(
                            "Dropping datagram from {} with unknown correlation id {}",
                            from,
                            id
                        );
                        self.stats.datagrams_dropped += 1;
                    }
                }
            }
            Datagram::Malformed => {
                log::debug!("Dropping malformed {} byte datagram from {}", len, from);
                self.stats.datagrams_dropped += 1;
            }
        }
    }

    fn read_connection(&mut self, id: ConnectionId) {
        let Some(connection) = self.registry.get_mut(id) else {
            return;
        };

        let report = connection.read_ready(&mut self.scratch);
        self.stats.tcp_bytes_received += report.bytes as u64;
        if report.packets > 0 {
            self.scheduler
                .enqueue_processing(Arc::clone(connection.handle()));
        }

        let reason = match report.outcome {
            ReadOutcome::Open => return,
            ReadOutcome::Eof => DisconnectReason::ClosedByPeer,
            ReadOutcome::Failed(e) if e.is_protocol_violation() => {
                self.stats.protocol_violations += 1;
                log::warn!(
                    "{}: protocol violation after {} bytes: {}",
                    connection,
                    report.bytes,
                    e
                );
                DisconnectReason::ProtocolViolation
            }
            ReadOutcome::Failed(e) => {
                log::warn!("{}: read failed: {}", connection, e);
                DisconnectReason::IoError
            }
        };
        self.disconnect(id, reason);
    }

    fn write_all_pending(&mut self) {
        for id in self.registry.ids() {
            let Some(connection) = self.registry.get_mut(id) else {
                continue;
            };
            if !connection.write_pending(&self.socket).is_open() {
                let reason = if connection.is_backlogged() {
                    DisconnectReason::WriteBacklog
                } else {
                    DisconnectReason::IoError
                };
                self.disconnect(id, reason);
            }
        }
    }

    fn disconnect(&mut self, id: ConnectionId, reason: DisconnectReason) {
        let Some(mut connection) = self.registry.remove(id) else {
            return;
        };

        if let Err(e) = self.poll.registry().deregister(connection.stream_mut()) {
            log::debug!("{}: deregister failed: {}", connection, e);
        }
        connection.close();
        self.stats.connections_closed += 1;

        let stats = connection.stats();
        log::info!(
            "{} disconnected ({}): {} bytes in, {} bytes out, {} open",
            connection,
            reason.as_str(),
            stats.bytes_received,
            stats.bytes_sent,
            self.registry.len()
        );
        self.scheduler.connection_closed(connection.handle());
    }

    /// Flushes what can still be written, closes every connection and
    /// releases the listener and UDP socket.
    pub fn close(mut self) -> NetworkStats {
        self.write_all_pending();
        for id in self.registry.ids() {
            self.disconnect(id, DisconnectReason::Shutdown);
        }

        let registry = self.poll.registry();
        if let Err(e) = registry.deregister(&mut self.listener) {
            log::debug!("Deregistering listener failed: {}", e);
        }
        if let Err(e) = registry.deregister(&mut self.socket) {
            log::debug!("Deregistering UDP socket failed: {}", e);
        }

        log::info!("Network selector on {} stopped", self.local_addr);
        std::mem::take(&mut self.stats)
    }
}
