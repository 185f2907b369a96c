use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, TryLockError};

use mio::Waker;

use super::config::NetConfig;
use super::error::ConnectionError;
use super::framing::PacketFramer;
use super::lock;
use super::processing::PacketDispatch;
use super::protocol::{
    encode_datagram, encode_frame, encode_handshake, Channel, CorrelationId, Packet,
    DATAGRAM_HEADER_SIZE, FRAME_HEADER_SIZE,
};
use super::stats::ConnectionStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Active,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Handshaking | ConnectionState::Active)
    }
}

/// The half of a connection shared with worker threads.
///
/// Inbound packets are pushed by the network thread and drained by
/// [`process_packets`](Self::process_packets); outbound packets travel the
/// other way and are flushed by the network thread.
pub struct ConnectionHandle {
    id: ConnectionId,
    peer_addr: SocketAddr,
    correlation_id: CorrelationId,
    max_packet_size: usize,
    max_datagram_payload: usize,
    inbound: Mutex<VecDeque<Packet>>,
    outbound: Mutex<VecDeque<Packet>>,
    processing: Mutex<()>,
    scheduled: AtomicBool,
    closed: AtomicBool,
    waker: OnceLock<Arc<Waker>>,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        correlation_id: CorrelationId,
        config: &NetConfig,
    ) -> Self {
        Self {
            id,
            peer_addr,
            correlation_id,
            max_packet_size: config.max_packet_size,
            max_datagram_payload: config
                .max_datagram_size
                .saturating_sub(DATAGRAM_HEADER_SIZE),
            inbound: Mutex::new(VecDeque::new()),
            outbound: Mutex::new(VecDeque::new()),
            processing: Mutex::new(()),
            scheduled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            waker: OnceLock::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn describe(&self) -> String {
        self.peer_addr.to_string()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        lock(&self.outbound).clear();
    }

    pub(crate) fn set_waker(&self, waker: Arc<Waker>) {
        let _ = self.waker.set(waker);
    }

    fn wake(&self) {
        if let Some(waker) = self.waker.get() {
            if let Err(e) = waker.wake() {
                log::debug!("{}: failed to wake network thread: {}", self, e);
            }
        }
    }

    pub(crate) fn push_inbound(&self, packet: Packet) {
        lock(&self.inbound).push_back(packet);
    }

    /// Queues a whole datagram payload as one unreliable packet.
    pub fn feed_immediate(&self, payload: Vec<u8>) {
        self.push_inbound(Packet::unreliable(payload));
    }

    pub fn pending_inbound(&self) -> usize {
        lock(&self.inbound).len()
    }

    /// Claims the connection for one drain. Fails while another drain is
    /// scheduled or running; that drain picks up the new packets.
    pub fn try_schedule(&self) -> bool {
        !self.scheduled.swap(true, Ordering::SeqCst)
    }

    pub fn finish_scheduled(&self) {
        self.scheduled.store(false, Ordering::SeqCst);
    }

    /// Drains the inbound queue into `dispatch`, oldest first.
    ///
    /// Only one drain runs at a time, so packets reach the application in
    /// arrival order. A call made while another thread is draining returns
    /// 0 at once instead of waiting.
    pub fn process_packets<C: ?Sized>(
        self: &Arc<Self>,
        ctx: &C,
        dispatch: &dyn PacketDispatch<C>,
    ) -> usize {
        let _serial = match self.processing.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return 0,
        };
        let mut handled = 0;
        loop {
            let Some(packet) = lock(&self.inbound).pop_front() else {
                break;
            };
            dispatch.dispatch(ctx, self, packet);
            handled += 1;
        }
        handled
    }

    fn push_outbound(&self, packet: Packet) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        lock(&self.outbound).push_back(packet);
        self.wake();
        Ok(())
    }

    pub fn send_reliable(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        if payload.len() > self.max_packet_size {
            return Err(ConnectionError::PacketTooLarge {
                len: payload.len(),
                max: self.max_packet_size,
            });
        }
        self.push_outbound(Packet::reliable(payload))
    }

    /// Large payloads must go through [`send_reliable`](Self::send_reliable);
    /// datagrams are never fragmented.
    pub fn send_unreliable(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        if payload.len() > self.max_datagram_payload {
            return Err(ConnectionError::DatagramTooLarge {
                len: payload.len(),
                max: self.max_datagram_payload,
            });
        }
        self.push_outbound(Packet::unreliable(payload))
    }

    pub(crate) fn take_outbound(&self) -> VecDeque<Packet> {
        std::mem::take(&mut *lock(&self.outbound))
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.peer_addr)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("correlation_id", &self.correlation_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub trait DatagramSender {
    fn send_datagram(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize>;
}

impl DatagramSender for mio::net::UdpSocket {
    fn send_datagram(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.send_to(data, addr)
    }
}

impl DatagramSender for std::net::UdpSocket {
    fn send_datagram(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.send_to(data, addr)
    }
}

#[derive(Debug)]
pub enum ReadOutcome {
    Open,
    Eof,
    Failed(ConnectionError),
}

#[derive(Debug)]
pub struct ReadReport {
    pub bytes: usize,
    pub packets: usize,
    pub outcome: ReadOutcome,
}

/// The network-thread half of a connection: socket, reassembly and write
/// buffers.
pub struct Connection<S> {
    stream: S,
    handle: Arc<ConnectionHandle>,
    state: ConnectionState,
    framer: PacketFramer,
    write_buffer: Vec<u8>,
    max_pending_write_bytes: usize,
    handshake_pending: usize,
    udp_addr: Option<SocketAddr>,
    stats: ConnectionStats,
}

impl<S> Connection<S> {
    /// Queues the handshake frame carrying the correlation id; it goes out
    /// on the first [`write_pending`](Self::write_pending).
    pub fn new(
        id: ConnectionId,
        stream: S,
        peer_addr: SocketAddr,
        correlation_id: CorrelationId,
        config: &NetConfig,
    ) -> Result<Self, ConnectionError> {
        let handshake = encode_handshake(correlation_id)?;
        let mut write_buffer = Vec::with_capacity(FRAME_HEADER_SIZE + handshake.len());
        encode_frame(&handshake, &mut write_buffer)?;

        Ok(Self {
            stream,
            handle: Arc::new(ConnectionHandle::new(
                id,
                peer_addr,
                correlation_id,
                config,
            )),
            state: ConnectionState::Handshaking,
            framer: PacketFramer::new(config.max_packet_size),
            handshake_pending: write_buffer.len(),
            write_buffer,
            max_pending_write_bytes: config.max_pending_write_bytes,
            udp_addr: None,
            stats: ConnectionStats::default(),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.handle.peer_addr()
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.handle.correlation_id()
    }

    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    pub(crate) fn bind_udp(&mut self, addr: SocketAddr) {
        self.udp_addr = Some(addr);
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn describe(&self) -> String {
        self.handle.describe()
    }

    pub(crate) fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

impl<S: Read + Write> Connection<S> {
    /// Reads until the socket would block, framing everything read.
    pub fn read_ready(&mut self, scratch: &mut [u8]) -> ReadReport {
        let mut report = ReadReport {
            bytes: 0,
            packets: 0,
            outcome: ReadOutcome::Open,
        };

        loop {
            match self.stream.read(scratch) {
                Ok(0) => {
                    self.state = ConnectionState::Closing;
                    report.outcome = ReadOutcome::Eof;
                    return report;
                }
                Ok(n) => {
                    report.bytes += n;
                    match self.feed_queued(&scratch[..n]) {
                        Ok(packets) => report.packets += packets,
                        Err(e) => {
                            report.outcome = ReadOutcome::Failed(e);
                            return report;
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return report,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.state = ConnectionState::Closing;
                    report.outcome = ReadOutcome::Failed(e.into());
                    return report;
                }
            }
        }
    }

    /// Appends TCP bytes and queues every complete packet. A framing
    /// violation moves the connection to `Closing`.
    pub fn feed_queued(&mut self, chunk: &[u8]) -> Result<usize, ConnectionError> {
        if !self.state.is_open() {
            return Err(ConnectionError::Closed);
        }

        self.stats.bytes_received += chunk.len() as u64;
        let handle = &self.handle;
        match self
            .framer
            .feed(chunk, |payload| handle.push_inbound(Packet::reliable(payload)))
        {
            Ok(packets) => {
                self.stats.packets_received += packets as u64;
                Ok(packets)
            }
            Err(e) => {
                self.state = ConnectionState::Closing;
                Err(e)
            }
        }
    }

    /// Moves queued outbound packets onto the wire and reports the state
    /// afterwards, so the caller can drop connections that are no longer
    /// open.
    pub fn write_pending(&mut self, udp: &impl DatagramSender) -> ConnectionState {
        if !self.state.is_open() {
            let dropped = self.handle.take_outbound().len();
            if dropped > 0 {
                log::debug!("{}: dropped {} writes after close", self, dropped);
            }
            return self.state;
        }

        for packet in self.handle.take_outbound() {
            match packet.channel {
                Channel::Reliable => {
                    match encode_frame(&packet.payload, &mut self.write_buffer) {
                        Ok(()) => self.stats.packets_sent += 1,
                        Err(e) => log::warn!("{}: failed to frame packet: {}", self, e),
                    }
                }
                Channel::Unreliable => self.send_datagram(udp, &packet.payload),
            }
        }

        if let Err(e) = self.flush() {
            log::warn!(
                "{}: write failed with {} bytes pending: {}",
                self,
                self.write_buffer.len(),
                e
            );
            self.state = ConnectionState::Closing;
        } else if self.is_backlogged() {
            log::warn!(
                "{}: peer is not reading, {} bytes pending (limit {})",
                self,
                self.write_buffer.len(),
                self.max_pending_write_bytes
            );
            self.state = ConnectionState::Closing;
        }

        self.state
    }

    /// More unsent TCP data than the configured limit.
    pub fn is_backlogged(&self) -> bool {
        self.write_buffer.len() > self.max_pending_write_bytes
    }

    fn send_datagram(&mut self, udp: &impl DatagramSender, payload: &[u8]) {
        let Some(addr) = self.udp_addr else {
            log::debug!("{}: no UDP address bound yet, dropping datagram", self);
            self.stats.datagrams_dropped += 1;
            return;
        };

        let result = encode_datagram(self.correlation_id(), payload)
            .map_err(ConnectionError::from)
            .and_then(|data| udp.send_datagram(&data, addr).map_err(ConnectionError::from));
        match result {
            Ok(_) => self.stats.datagrams_sent += 1,
            Err(e) => {
                log::debug!("{}: datagram to {} dropped: {}", self, addr, e);
                self.stats.datagrams_dropped += 1;
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut written = 0;
        let mut result = Ok(());
        while written < self.write_buffer.len() {
            match self.stream.write(&self.write_buffer[written..]) {
                Ok(0) => {
                    result = Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    ));
                    break;
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        self.write_buffer.drain(..written);
        self.stats.bytes_sent += written as u64;
        self.handshake_pending = self.handshake_pending.saturating_sub(written);
        if self.state == ConnectionState::Handshaking && self.handshake_pending == 0 {
            log::debug!("{}: handshake sent, correlation id {}", self, self.correlation_id());
            self.state = ConnectionState::Active;
        }
        result
    }

    pub fn pending_write_bytes(&self) -> usize {
        self.write_buffer.len()
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
        self.handle.mark_closed();
    }
}

impl<S> fmt::Display for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.handle)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::thread;

    use super::*;
    use crate::net::protocol::{decode_handshake, parse_datagram, Datagram};

    #[derive(Default)]
    pub(crate) struct MockStream {
        pub incoming: VecDeque<Vec<u8>>,
        pub eof: bool,
        pub written: Vec<u8>,
        pub write_limit: Option<usize>,
        pub fail_writes: bool,
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(mut chunk) = self.incoming.pop_front() else {
                if self.eof {
                    return Ok(0);
                }
                return Err(io::ErrorKind::WouldBlock.into());
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.incoming.push_front(chunk.split_off(n));
            }
            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            let n = match self.write_limit.as_mut() {
                Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
                Some(limit) => {
                    let n = buf.len().min(*limit);
                    *limit -= n;
                    n
                }
                None => buf.len(),
            };
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingSender {
        pub sent: RefCell<Vec<(Vec<u8>, SocketAddr)>>,
    }

    impl DatagramSender for RecordingSender {
        fn send_datagram(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
            self.sent.borrow_mut().push((data.to_vec(), addr));
            Ok(data.len())
        }
    }

    pub(crate) fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    pub(crate) fn connection(id: usize, correlation: u64) -> Connection<MockStream> {
        Connection::new(
            ConnectionId(id),
            MockStream::default(),
            peer(),
            CorrelationId(correlation),
            &NetConfig::default(),
        )
        .unwrap()
    }

    fn frames(payloads: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for payload in payloads {
            encode_frame(payload, &mut out).unwrap();
        }
        out
    }

    fn drain(handle: &ConnectionHandle) -> Vec<Packet> {
        lock(&handle.inbound).drain(..).collect()
    }

    #[test]
    fn test_handshake_sent_first() {
        let mut conn = connection(1, 0xABCD);
        let udp = RecordingSender::default();
        conn.handle().send_reliable(b"after".to_vec()).unwrap();

        assert_eq!(conn.state(), ConnectionState::Handshaking);
        assert_eq!(conn.write_pending(&udp), ConnectionState::Active);

        let mut framer = PacketFramer::new(1024);
        let mut payloads = Vec::new();
        framer
            .feed(&conn.stream.written, |p| payloads.push(p))
            .unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(decode_handshake(&payloads[0]), Ok(CorrelationId(0xABCD)));
        assert_eq!(payloads[1], b"after");
    }

    #[test]
    fn test_partial_write_stays_handshaking() {
        let mut conn = connection(1, 7);
        let udp = RecordingSender::default();
        conn.stream.write_limit = Some(3);

        assert_eq!(conn.write_pending(&udp), ConnectionState::Handshaking);
        assert_eq!(conn.stream.written.len(), 3);

        conn.stream.write_limit = None;
        assert_eq!(conn.write_pending(&udp), ConnectionState::Active);
        assert_eq!(conn.pending_write_bytes(), 0);
    }

    #[test]
    fn test_feed_queued_multiple_and_partial() {
        let mut conn = connection(1, 7);
        let data = frames(&[&b"one"[..], &b"two"[..], &b"three"[..]]);

        assert_eq!(conn.feed_queued(&data[..9]).unwrap(), 1);
        assert_eq!(conn.feed_queued(&data[9..]).unwrap(), 2);

        let packets = drain(conn.handle());
        let payloads: Vec<&[u8]> = packets.iter().map(|p| p.payload.as_slice()).collect();
        assert_eq!(payloads, vec![&b"one"[..], &b"two"[..], &b"three"[..]]);
        assert!(packets.iter().all(|p| p.channel == Channel::Reliable));
    }

    #[test]
    fn test_read_ready_keeps_packets_before_eof() {
        let mut conn = connection(1, 7);
        conn.stream.incoming.push_back(frames(&[&b"last words"[..]]));
        conn.stream.eof = true;

        let mut scratch = [0u8; 4];
        let report = conn.read_ready(&mut scratch);
        assert!(matches!(report.outcome, ReadOutcome::Eof));
        assert_eq!(report.packets, 1);
        assert_eq!(report.bytes, 14);
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert_eq!(conn.handle().pending_inbound(), 1);
    }

    #[test]
    fn test_read_ready_would_block_stays_open() {
        let mut conn = connection(1, 7);
        conn.stream.incoming.push_back(frames(&[&b"x"[..]])[..3].to_vec());

        let mut scratch = [0u8; 64];
        let report = conn.read_ready(&mut scratch);
        assert!(matches!(report.outcome, ReadOutcome::Open));
        assert_eq!(report.packets, 0);
        assert!(conn.state().is_open());
    }

    #[test]
    fn test_oversized_frame_closes() {
        let mut conn = connection(1, 7);
        conn.stream
            .incoming
            .push_back(vec![0x7F, 0xFF, 0xFF, 0xFF, 1, 2, 3]);

        let mut scratch = [0u8; 64];
        let report = conn.read_ready(&mut scratch);
        match report.outcome {
            ReadOutcome::Failed(e) => assert!(e.is_protocol_violation()),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(conn.feed_queued(b"more").is_err());
    }

    #[test]
    fn test_stalled_reader_closes_on_backlog() {
        let config = NetConfig {
            max_pending_write_bytes: 1024,
            ..NetConfig::default()
        };
        let mut conn = Connection::new(
            ConnectionId(1),
            MockStream::default(),
            peer(),
            CorrelationId(7),
            &config,
        )
        .unwrap();
        let udp = RecordingSender::default();
        assert_eq!(conn.write_pending(&udp), ConnectionState::Active);

        conn.stream.write_limit = Some(0);
        conn.handle().send_reliable(vec![0u8; 600]).unwrap();
        assert_eq!(conn.write_pending(&udp), ConnectionState::Active);
        assert!(!conn.is_backlogged());

        conn.handle().send_reliable(vec![0u8; 600]).unwrap();
        assert_eq!(conn.write_pending(&udp), ConnectionState::Closing);
        assert!(conn.is_backlogged());
        assert_eq!(conn.pending_write_bytes(), 2 * (FRAME_HEADER_SIZE + 600));
    }

    #[test]
    fn test_write_failure_closes() {
        let mut conn = connection(1, 7);
        conn.stream.fail_writes = true;
        let udp = RecordingSender::default();
        assert_eq!(conn.write_pending(&udp), ConnectionState::Closing);
    }

    #[test]
    fn test_unreliable_needs_bound_address() {
        let mut conn = connection(1, 0x1122);
        let udp = RecordingSender::default();

        conn.handle().send_unreliable(b"early".to_vec()).unwrap();
        conn.write_pending(&udp);
        assert!(udp.sent.borrow().is_empty());
        assert_eq!(conn.stats().datagrams_dropped, 1);

        let addr: SocketAddr = "127.0.0.1:40001".parse().unwrap();
        conn.bind_udp(addr);
        conn.handle().send_unreliable(b"late".to_vec()).unwrap();
        conn.write_pending(&udp);

        let sent = udp.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, addr);
        assert_eq!(
            parse_datagram(&sent[0].0),
            Datagram::Tagged {
                id: CorrelationId(0x1122),
                payload: b"late"
            }
        );
    }

    #[test]
    fn test_send_size_limits() {
        let conn = connection(1, 7);
        let too_big = vec![0u8; NetConfig::default().max_datagram_size];
        assert!(matches!(
            conn.handle().send_unreliable(too_big),
            Err(ConnectionError::DatagramTooLarge { .. })
        ));
        let too_big = vec![0u8; NetConfig::default().max_packet_size + 1];
        assert!(matches!(
            conn.handle().send_reliable(too_big),
            Err(ConnectionError::PacketTooLarge { .. })
        ));
    }

    #[test]
    fn test_closed_connection_drops_writes() {
        let mut conn = connection(1, 7);
        let handle = Arc::clone(conn.handle());
        conn.close();

        assert!(handle.is_closed());
        assert!(matches!(
            handle.send_reliable(b"late".to_vec()),
            Err(ConnectionError::Closed)
        ));
        let udp = RecordingSender::default();
        assert_eq!(conn.write_pending(&udp), ConnectionState::Closed);
        assert!(conn.stream.written.is_empty());
    }

    #[test]
    fn test_describe() {
        let conn = connection(3, 7);
        assert_eq!(conn.describe(), "127.0.0.1:40000");
        assert_eq!(conn.handle().to_string(), "127.0.0.1:40000");
        assert_eq!(ConnectionId(3).to_string(), "#3");
    }

    #[test]
    fn test_concurrent_drain_preserves_order() {
        const COUNT: u32 = 2000;
        let handle = Arc::new(ConnectionHandle::new(
            ConnectionId(1),
            peer(),
            CorrelationId(7),
            &NetConfig::default(),
        ));
        let received = Arc::new(Mutex::new(Vec::new()));

        let producer = {
            let handle = Arc::clone(&handle);
            thread::spawn(move || {
                for i in 0..COUNT {
                    if i % 2 == 0 {
                        handle.push_inbound(Packet::reliable(i.to_be_bytes().to_vec()));
                    } else {
                        handle.feed_immediate(i.to_be_bytes().to_vec());
                    }
                }
            })
        };

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let handle = Arc::clone(&handle);
                let received = Arc::clone(&received);
                thread::spawn(move || {
                    let dispatch = |sink: &Mutex<Vec<u32>>, _: &Arc<ConnectionHandle>, packet: Packet| {
                        let mut bytes = [0u8; 4];
                        bytes.copy_from_slice(&packet.payload);
                        lock(sink).push(u32::from_be_bytes(bytes));
                    };
                    while lock(&received).len() < COUNT as usize {
                        handle.process_packets(&*received, &dispatch);
                        thread::yield_now();
                    }
                })
            })
            .collect();

        producer.join().unwrap();
        for consumer in consumers {
            consumer.join().unwrap();
        }

        let received = lock(&received);
        assert_eq!(*received, (0..COUNT).collect::<Vec<_>>());
    }
}
