use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use mio::net::UdpSocket;

use crate::error::Result;

/// Datagrams larger than this are rejected at receive time.
pub const RECEIVE_BUFFER_SIZE: usize = 16 * 1024;

/// A non-blocking UDP socket connected to one remote host candidate.
pub struct Socket {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl Socket {
    pub fn new(remote: SocketAddr) -> Result<Self> {
        let bind_addr: SocketAddr = if remote.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(remote)?;
        Ok(Socket { socket, remote })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub(crate) fn inner_mut(&mut self) -> &mut UdpSocket {
        &mut self.socket
    }

    /// Sends one datagram. EAGAIN and EINTR are not reported; other
    /// errors are logged and swallowed, per the error policy.
    pub fn send(&self, data: &[u8]) -> usize {
        match self.socket.send(data) {
            Ok(n) => n,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                0
            }
            Err(e) => {
                log::error!("udp send to {} failed: {e}", self.remote);
                0
            }
        }
    }

    /// Drains every pending datagram from the socket.
    pub fn receive_all(&self) -> Vec<Bytes> {
        let mut out = Vec::new();
        let mut buf = [0u8; RECEIVE_BUFFER_SIZE];
        loop {
            match self.socket.recv(&mut buf) {
                Ok(n) if n > 0 => out.push(Bytes::copy_from_slice(&buf[..n])),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("udp recv from {} failed: {e}", self.remote);
                    break;
                }
            }
        }
        out
    }
}
