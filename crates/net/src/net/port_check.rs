use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use super::protocol::{encode_port_check, parse_datagram, Datagram};

fn timed_out(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::UnexpectedEof
    )
}

/// Sends the port-check magic to `server` over UDP and waits for the echo.
pub fn probe_udp(server: SocketAddr, timeout: Duration) -> io::Result<bool> {
    let local: SocketAddr = if server.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(local)?;
    socket.send_to(&encode_port_check(), server)?;

    let deadline = Instant::now() + timeout;
    let mut buffer = [0u8; 64];
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Ok(false);
        }
        socket.set_read_timeout(Some(left))?;

        match socket.recv_from(&mut buffer) {
            Ok((len, from)) if from == server => {
                return Ok(parse_datagram(&buffer[..len]) == Datagram::PortCheck);
            }
            Ok(_) => continue,
            Err(ref e) if timed_out(e) => return Ok(false),
            Err(e) => return Err(e),
        }
    }
}

/// Connects to `server` and expects the magic as the first four bytes.
/// Only hosts the server lists for port checks get an answer; everyone
/// else receives a handshake instead.
pub fn probe_tcp(server: SocketAddr, timeout: Duration) -> io::Result<bool> {
    let mut stream = TcpStream::connect_timeout(&server, timeout)?;
    stream.set_read_timeout(Some(timeout))?;

    let mut reply = [0u8; 4];
    match stream.read_exact(&mut reply) {
        Ok(()) => Ok(parse_datagram(&reply) == Datagram::PortCheck),
        Err(ref e) if timed_out(e) => Ok(false),
        Err(e) => Err(e),
    }
}
