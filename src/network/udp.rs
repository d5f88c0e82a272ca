//! UDP datagram link built with socket2

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, info};

use super::{PacketSink, PacketSource, RecvStatus};
use crate::config::NetworkConfig;
use crate::error::NetworkError;

/// Shortest read timeout handed to the OS; zero would mean "block forever"
const MIN_READ_TIMEOUT: Duration = Duration::from_micros(100);

/// Bound UDP socket with an optional fixed peer for sending
pub struct UdpLink {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    read_timeout: Option<Duration>,
}

impl UdpLink {
    /// Bind according to `config`; `config.peer` becomes the send destination
    pub fn bind(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let addr = config.bind_addr();
        let socket = create_socket(addr, config.socket_buffer_bytes, config.broadcast)
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

        info!(
            "UDP link bound to {} (peer: {:?}, broadcast: {})",
            addr, config.peer, config.broadcast
        );

        Ok(Self {
            socket,
            peer: config.peer,
            read_timeout: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = Some(peer);
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        let timeout = timeout.max(MIN_READ_TIMEOUT);
        if self.read_timeout != Some(timeout) {
            self.socket.set_read_timeout(Some(timeout))?;
            self.read_timeout = Some(timeout);
        }
        Ok(())
    }
}

fn create_socket(addr: SocketAddr, buffer_bytes: usize, broadcast: bool) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    if buffer_bytes > 0 {
        socket.set_recv_buffer_size(buffer_bytes)?;
        socket.set_send_buffer_size(buffer_bytes)?;
    }
    if broadcast {
        socket.set_broadcast(true)?;
    }

    socket.bind(&SockAddr::from(addr))?;
    Ok(socket.into())
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

impl PacketSink for UdpLink {
    fn send(&mut self, datagram: &[u8]) -> Result<(), NetworkError> {
        let peer = self
            .peer
            .ok_or_else(|| NetworkError::SendFailed("no peer address configured".into()))?;

        let sent = self
            .socket
            .send_to(datagram, peer)
            .map_err(|e| NetworkError::SendFailed(format!("{}: {}", peer, e)))?;

        if sent != datagram.len() {
            return Err(NetworkError::SendFailed(format!(
                "short send to {}: {} of {} bytes",
                peer,
                sent,
                datagram.len()
            )));
        }
        Ok(())
    }
}

impl PacketSource for UdpLink {
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<RecvStatus, NetworkError> {
        self.set_read_timeout(timeout)
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        match self.socket.recv_from(buf) {
            Ok((len, from)) => {
                debug!("Received {} bytes from {}", len, from);
                Ok(RecvStatus::Received(len))
            }
            Err(e) if is_timeout(&e) => Ok(RecvStatus::TimedOut),
            Err(e) => Err(NetworkError::ReceiveFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback() -> NetworkConfig {
        NetworkConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            udp_port: 0,
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn test_loopback_send_recv() {
        let mut rx = UdpLink::bind(&loopback()).unwrap();
        let mut tx = UdpLink::bind(&loopback()).unwrap();
        tx.set_peer(rx.local_addr().unwrap());

        tx.send(&[1u8, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 64];
        let status = rx.recv(&mut buf, Duration::from_secs(2)).unwrap();
        assert_eq!(status, RecvStatus::Received(4));
        assert_eq!(&buf[..4], &[1u8, 2, 3, 4]);
    }

    #[test]
    fn test_recv_times_out() {
        let mut rx = UdpLink::bind(&loopback()).unwrap();
        let mut buf = [0u8; 64];
        let status = rx.recv(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(status, RecvStatus::TimedOut);
    }

    #[test]
    fn test_send_without_peer_fails() {
        let mut tx = UdpLink::bind(&loopback()).unwrap();
        assert!(matches!(
            tx.send(&[0u8; 4]),
            Err(NetworkError::SendFailed(_))
        ));
    }
}
