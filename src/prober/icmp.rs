use std::io::{self, Read};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use super::ProbeError;
use super::transport::{Interrupter, ProbeTransport};

/// Raw `ip4:icmp` socket connected to a single host. Needs CAP_NET_RAW or root.
pub struct RawIcmpTransport {
    remote: Ipv4Addr,
    socket: Option<Socket>,
}

impl RawIcmpTransport {
    pub fn new(remote: Ipv4Addr) -> Self {
        Self { remote, socket: None }
    }

    fn connect(&self) -> io::Result<Socket> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        let local = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        socket.bind(&local.into())?;
        let remote = SocketAddr::V4(SocketAddrV4::new(self.remote, 0));
        socket.connect(&remote.into())?;
        Ok(socket)
    }

    fn socket(&self) -> io::Result<&Socket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is closed"))
    }
}

/// Maps the outcome of a raw socket read onto the probe result.
///
/// Every IPv4 datagram carries at least its header, so a zero-length read
/// only happens once the socket has been shut down underneath us.
fn classify_read(read: io::Result<usize>, timeout: Duration) -> Result<usize, ProbeError> {
    match read {
        Ok(0) => Err(ProbeError::Read(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "socket shut down while waiting for a reply",
        ))),
        Ok(n) => Ok(n),
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            Err(ProbeError::Timeout(timeout))
        }
        Err(e) => Err(ProbeError::Read(e)),
    }
}

impl ProbeTransport for RawIcmpTransport {
    fn open(&mut self) -> Result<(), ProbeError> {
        let socket = self.connect().map_err(|source| ProbeError::Connect {
            addr: self.remote,
            source,
        })?;
        debug!(remote = %self.remote, "raw icmp socket opened");
        self.socket = Some(socket);
        Ok(())
    }

    fn send(&mut self, packet: &[u8]) -> Result<(), ProbeError> {
        self.socket()
            .and_then(|s| s.send(packet))
            .map(|_| ())
            .map_err(ProbeError::Write)
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ProbeError> {
        let socket = self.socket().map_err(ProbeError::Read)?;
        socket.set_read_timeout(Some(timeout)).map_err(ProbeError::Read)?;
        let mut reader: &Socket = socket;
        classify_read(reader.read(buf), timeout)
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!(remote = %self.remote, "raw icmp socket closed");
        }
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let socket = self.socket.as_ref()?;
        match socket.try_clone() {
            Ok(clone) => Some(Interrupter::new(move || {
                if let Err(e) = clone.shutdown(Shutdown::Both) {
                    warn!("failed to shut down icmp socket: {}", e);
                }
            })),
            Err(e) => {
                warn!("cannot clone icmp socket for cancellation: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_transport_rejects_io() {
        let mut transport = RawIcmpTransport::new(Ipv4Addr::LOCALHOST);
        assert!(matches!(transport.send(&[8, 0, 0xf7, 0xff, 0, 0, 0, 0]), Err(ProbeError::Write(_))));
        let mut buf = [0u8; 16];
        assert!(matches!(
            transport.receive(&mut buf, Duration::from_millis(10)),
            Err(ProbeError::Read(_))
        ));
        assert!(transport.interrupter().is_none());
        transport.close();
    }

    #[test]
    fn shut_down_socket_read_is_a_failure() {
        let timeout = Duration::from_secs(5);
        let err = classify_read(Ok(0), timeout).unwrap_err();
        assert!(matches!(&err, ProbeError::Read(e) if e.kind() == io::ErrorKind::UnexpectedEof));
        assert!(!err.is_fatal());
    }

    #[test]
    fn read_outcomes() {
        let timeout = Duration::from_millis(50);
        assert_eq!(classify_read(Ok(28), timeout).unwrap(), 28);
        assert!(matches!(
            classify_read(Err(io::ErrorKind::WouldBlock.into()), timeout),
            Err(ProbeError::Timeout(t)) if t == timeout
        ));
        assert!(matches!(
            classify_read(Err(io::ErrorKind::TimedOut.into()), timeout),
            Err(ProbeError::Timeout(_))
        ));
        assert!(matches!(
            classify_read(Err(io::ErrorKind::ConnectionRefused.into()), timeout),
            Err(ProbeError::Read(_))
        ));
    }
}
