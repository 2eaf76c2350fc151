//! Datagram transport used by the responder.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket},
};

use socket2::{Domain, Protocol, Socket, Type};

use crate::responder::Config;

/// A datagram transport connected to the mDNS multicast group.
///
/// The responder sends every message to the group and receives every message sent to it,
/// including its own. `recv` should return an error of kind [`io::ErrorKind::WouldBlock`] or
/// [`io::ErrorKind::TimedOut`] now and then when nothing arrives, so that the receive loop can
/// notice when the responder is shut down.
pub trait Transport: Send + Sync + 'static {
    /// Multicasts `packet` to the group.
    fn send(&self, packet: &[u8]) -> io::Result<()>;

    /// Receives the next datagram into `buf`, returning its length and sender.
    fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

/// An IPv4 UDP socket joined to the mDNS multicast group.
#[derive(Debug)]
pub struct MulticastSocket {
    sock: UdpSocket,
    group: SocketAddrV4,
}

impl MulticastSocket {
    /// Binds to the group's port on all interfaces and joins the group.
    ///
    /// The port is shared with other mDNS responders on the machine.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let group = config.group;

        let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        sock.set_reuse_address(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        sock.set_reuse_port(true)?;
        sock.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port()).into())?;
        sock.join_multicast_v4(group.ip(), &config.interface)?;
        set_multicast_options(&sock, config)?;

        let sock = UdpSocket::from(sock);
        log::debug!("joined {} on {}", group, config.interface);

        Ok(Self { sock, group })
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.sock
    }
}

/// Sends through the configured interface, loops our own messages back, and bounds reads.
fn set_multicast_options(sock: &Socket, config: &Config) -> io::Result<()> {
    sock.set_multicast_if_v4(&config.interface)?;
    sock.set_multicast_loop_v4(true)?;
    sock.set_multicast_ttl_v4(config.multicast_ttl)?;
    sock.set_read_timeout(Some(config.read_timeout))?;
    Ok(())
}

impl Transport for MulticastSocket {
    fn send(&self, packet: &[u8]) -> io::Result<()> {
        self.sock.send_to(packet, self.group)?;
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.sock.recv_from(buf)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn multicast_options_follow_config() {
        let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        let config = Config::new()
            .interface(Ipv4Addr::LOCALHOST)
            .multicast_ttl(7)
            .read_timeout(Duration::from_millis(250));
        set_multicast_options(&sock, &config).unwrap();

        assert_eq!(sock.multicast_if_v4().unwrap(), Ipv4Addr::LOCALHOST);
        assert_eq!(sock.multicast_ttl_v4().unwrap(), 7);
        assert!(sock.multicast_loop_v4().unwrap());
        assert!(sock.read_timeout().unwrap().is_some());
    }
}
