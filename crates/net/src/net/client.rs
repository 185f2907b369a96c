use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use super::config::ClientConfig;
use super::connection::ConnectionState;
use super::error::ConnectionError;
use super::framing::PacketFramer;
use super::protocol::{
    decode_handshake, encode_datagram, encode_frame, parse_datagram, CorrelationId, Datagram,
    Packet, DATAGRAM_HEADER_SIZE,
};
use super::stats::ConnectionStats;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Client side of a multiplexed connection: one TCP stream plus a UDP
/// socket on the same local address, both non-blocking.
pub struct NetworkClient {
    stream: TcpStream,
    socket: UdpSocket,
    server_addr: SocketAddr,
    local_addr: SocketAddr,
    correlation_id: Option<CorrelationId>,
    state: ConnectionState,
    framer: PacketFramer,
    write_buffer: Vec<u8>,
    read_buffer: Box<[u8]>,
    config: ClientConfig,
    stats: ConnectionStats,
}

impl NetworkClient {
    pub fn connect(server_addr: SocketAddr, config: ClientConfig) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect_timeout(&server_addr, config.handshake_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        let local_addr = stream.local_addr()?;

        let socket = UdpSocket::bind(SocketAddr::new(local_addr.ip(), 0))?;
        socket.set_nonblocking(true)?;

        log::info!("Connected to {} from {}", server_addr, local_addr);

        Ok(Self {
            stream,
            socket,
            server_addr,
            local_addr,
            correlation_id: None,
            state: ConnectionState::Handshaking,
            framer: PacketFramer::new(config.max_packet_size),
            write_buffer: Vec::new(),
            read_buffer: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
            config,
            stats: ConnectionStats::default(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn udp_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Polls until the handshake arrives. Packets that came in behind the
    /// handshake are returned rather than lost.
    pub fn wait_connected(&mut self, timeout: Duration) -> Result<Vec<Packet>, ConnectionError> {
        let deadline = Instant::now() + timeout;
        let mut packets = Vec::new();
        loop {
            packets.extend(self.poll()?);
            if self.state == ConnectionState::Active {
                return Ok(packets);
            }
            if Instant::now() >= deadline {
                return Err(ConnectionError::Timeout);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Reads whatever both sockets have and flushes pending writes.
    pub fn poll(&mut self) -> Result<Vec<Packet>, ConnectionError> {
        if !self.state.is_open() {
            return Err(ConnectionError::Closed);
        }

        let mut packets = Vec::new();
        self.read_stream(&mut packets)?;
        self.read_datagrams(&mut packets)?;
        if self.state.is_open() {
            self.flush()?;
        }
        Ok(packets)
    }

    fn read_stream(&mut self, packets: &mut Vec<Packet>) -> Result<(), ConnectionError> {
        let mut frames = Vec::new();
        loop {
            match self.stream.read(&mut self.read_buffer) {
                Ok(0) => {
                    log::info!("Server {} closed the connection", self.server_addr);
                    self.state = ConnectionState::Closed;
                    break;
                }
                Ok(n) => {
                    self.stats.bytes_received += n as u64;
                    if let Err(e) = self
                        .framer
                        .feed(&self.read_buffer[..n], |payload| frames.push(payload))
                    {
                        self.state = ConnectionState::Closed;
                        return Err(e);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.state = ConnectionState::Closed;
                    return Err(e.into());
                }
            }
        }

        for payload in frames {
            if self.correlation_id.is_none() {
                let id = match decode_handshake(&payload) {
                    Ok(id) => id,
                    Err(e) => {
                        self.state = ConnectionState::Closed;
                        return Err(e.into());
                    }
                };
                log::debug!("Handshake from {}: correlation id {}", self.server_addr, id);
                self.correlation_id = Some(id);
                if self.state == ConnectionState::Handshaking {
                    self.state = ConnectionState::Active;
                }
                continue;
            }
            self.stats.packets_received += 1;
            packets.push(Packet::reliable(payload));
        }
        Ok(())
    }

    fn read_datagrams(&mut self, packets: &mut Vec<Packet>) -> Result<(), ConnectionError> {
        loop {
            let (len, from) = match self.socket.recv_from(&mut self.read_buffer) {
                Ok(received) => received,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e)
                    if e.kind() == io::ErrorKind::Interrupted
                        || e.kind() == io::ErrorKind::ConnectionReset =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if from.ip() != self.server_addr.ip() {
                log::debug!("Ignoring datagram from unexpected host {}", from);
                continue;
            }

            match (parse_datagram(&self.read_buffer[..len]), self.correlation_id) {
                (Datagram::Tagged { id, payload }, Some(ours)) if id == ours => {
                    self.stats.bytes_received += len as u64;
                    self.stats.packets_received += 1;
                    packets.push(Packet::unreliable(payload.to_vec()));
                }
                _ => {
                    log::debug!("Dropping {} byte datagram from {}", len, from);
                    self.stats.datagrams_dropped += 1;
                }
            }
        }
    }

    pub fn send_reliable(&mut self, payload: &[u8]) -> Result<(), ConnectionError> {
        if !self.state.is_open() {
            return Err(ConnectionError::Closed);
        }
        if payload.len() > self.config.max_packet_size {
            return Err(ConnectionError::PacketTooLarge {
                len: payload.len(),
                max: self.config.max_packet_size,
            });
        }
        encode_frame(payload, &mut self.write_buffer)?;
        self.stats.packets_sent += 1;
        self.flush()
    }

    /// Needs the handshake: datagrams are tagged with the correlation id.
    /// The first one also tells the server where to send datagrams back.
    pub fn send_unreliable(&mut self, payload: &[u8]) -> Result<(), ConnectionError> {
        if !self.state.is_open() {
            return Err(ConnectionError::Closed);
        }
        let Some(id) = self.correlation_id else {
            return Err(ConnectionError::NotConnected);
        };

        let max = self
            .config
            .max_datagram_size
            .saturating_sub(DATAGRAM_HEADER_SIZE);
        if payload.len() > max {
            return Err(ConnectionError::DatagramTooLarge {
                len: payload.len(),
                max,
            });
        }

        let data = encode_datagram(id, payload)?;
        let sent = self.socket.send_to(&data, self.server_addr)?;
        self.stats.datagrams_sent += 1;
        self.stats.bytes_sent += sent as u64;
        Ok(())
    }

    /// Writes as much buffered TCP data as the socket takes.
    pub fn flush(&mut self) -> Result<(), ConnectionError> {
        let mut written = 0;
        let mut result = Ok(());
        while written < self.write_buffer.len() {
            match self.stream.write(&self.write_buffer[written..]) {
                Ok(0) => {
                    result = Err(io::Error::from(io::ErrorKind::WriteZero).into());
                    break;
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    result = Err(e.into());
                    break;
                }
            }
        }
        self.write_buffer.drain(..written);
        self.stats.bytes_sent += written as u64;
        if result.is_err() {
            self.state = ConnectionState::Closed;
        }
        result
    }

    pub fn pending_write_bytes(&self) -> usize {
        self.write_buffer.len()
    }

    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            log::debug!("Shutdown of connection to {} failed: {}", self.server_addr, e);
        }
        self.state = ConnectionState::Closed;
        log::info!("Disconnected from {}", self.server_addr);
    }
}
