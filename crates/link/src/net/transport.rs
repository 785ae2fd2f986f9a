use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use crate::error::LinkError;

use super::protocol::PACKET_SIZE;
use super::stats::{PacketLossSimulation, TransportStats};

/// Receive buffer size. Larger than a packet so oversized datagrams are
/// seen with their real length instead of being silently truncated to 32.
pub const MAX_DATAGRAM: usize = 2 * PACKET_SIZE;

/// The raw radio primitive: a non-blocking broadcast datagram endpoint.
pub trait DatagramSocket {
    /// Binds to `port` (0 picks any) and returns the address peers see as
    /// the source of our datagrams.
    fn open(&mut self, port: u16) -> io::Result<SocketAddr>;

    fn send_broadcast(&mut self, data: &[u8]) -> io::Result<usize>;

    /// `Ok(None)` when nothing is pending.
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn close(&mut self);
}

/// UDP socket broadcasting on the local segment.
pub struct UdpBroadcastSocket {
    socket: Option<UdpSocket>,
    local_ip: IpAddr,
    broadcast_ip: IpAddr,
    target: Option<SocketAddr>,
}

impl UdpBroadcastSocket {
    pub fn new(local_ip: IpAddr) -> Self {
        Self::with_broadcast(local_ip, IpAddr::V4(Ipv4Addr::BROADCAST))
    }

    /// Directed broadcast (e.g. `192.168.1.255`) or a unicast address for
    /// loopback testing.
    pub fn with_broadcast(local_ip: IpAddr, broadcast_ip: IpAddr) -> Self {
        Self {
            socket: None,
            local_ip,
            broadcast_ip,
            target: None,
        }
    }

    /// Best guess at the address the LAN sees us as: the source address the
    /// OS routes from toward `broadcast_ip`, falling back to the default
    /// route. Nothing is actually sent. A directed broadcast such as
    /// `192.168.1.255` resolves even on a segment with no internet uplink.
    pub fn detect_local_ip(broadcast_ip: IpAddr) -> io::Result<IpAddr> {
        let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        probe.set_broadcast(true)?;

        let targets = [
            SocketAddr::new(broadcast_ip, 9),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 80),
        ];
        targets
            .into_iter()
            .find_map(|target| {
                probe.connect(target).ok()?;
                let ip = probe.local_addr().ok()?.ip();
                (!ip.is_unspecified()).then_some(ip)
            })
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no route to the LAN"))
    }
}

impl DatagramSocket for UdpBroadcastSocket {
    fn open(&mut self, port: u16) -> io::Result<SocketAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;

        let bound_port = socket.local_addr()?.port();
        self.target = Some(SocketAddr::new(self.broadcast_ip, bound_port));
        self.socket = Some(socket);

        Ok(SocketAddr::new(self.local_ip, bound_port))
    }

    fn send_broadcast(&mut self, data: &[u8]) -> io::Result<usize> {
        match (&self.socket, self.target) {
            (Some(socket), Some(target)) => socket.send_to(data, target),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "socket not open")),
        }
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let Some(socket) = &self.socket else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket not open"));
        };
        match socket.recv_from(buf) {
            Ok((size, addr)) => Ok(Some((size, addr))),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) {
        self.socket = None;
        self.target = None;
    }
}

/// Owns the single broadcast socket and hides our own echoes from callers.
pub struct BroadcastTransport<S> {
    socket: S,
    local_addr: Option<SocketAddr>,
    stats: TransportStats,
    loss_sim: PacketLossSimulation,
}

impl<S: DatagramSocket> BroadcastTransport<S> {
    pub fn new(socket: S) -> Self {
        Self {
            socket,
            local_addr: None,
            stats: TransportStats::default(),
            loss_sim: PacketLossSimulation::default(),
        }
    }

    pub fn set_packet_loss(&mut self, sim: PacketLossSimulation) {
        self.loss_sim = sim;
    }

    pub fn open(&mut self, port: u16) -> Result<SocketAddr, LinkError> {
        if self.local_addr.is_some() {
            return Err(LinkError::AlreadyOpen);
        }

        let local_addr = self
            .socket
            .open(port)
            .map_err(LinkError::TransportUnavailable)?;
        log::info!("Broadcast transport open on {}", local_addr);

        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    pub fn is_open(&self) -> bool {
        self.local_addr.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        if self.local_addr.is_none() {
            return Err(LinkError::NotOpen);
        }

        self.stats.send_calls += 1;

        if self.loss_sim.should_drop() {
            self.stats.sends_dropped += 1;
            return Ok(());
        }

        match self.socket.send_broadcast(data) {
            Ok(_) => {
                self.stats.sends_ok += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.sends_failed += 1;
                Err(LinkError::SendFailed(e))
            }
        }
    }

    /// Next datagram from another peer, or `None` when nothing (other than
    /// our own echoes) is pending. Never blocks.
    pub fn receive(&mut self, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
        let local_addr = self.local_addr?;

        loop {
            self.stats.receive_calls += 1;

            match self.socket.try_recv(buf) {
                Ok(Some((size, addr))) if addr == local_addr => {
                    self.stats.receives_filtered += 1;
                    log::trace!("Filtered own broadcast ({} bytes)", size);
                }
                Ok(Some((size, addr))) => {
                    self.stats.receives_ok += 1;
                    return Some((size, addr));
                }
                Ok(None) => return None,
                Err(e) => {
                    self.stats.receive_errors += 1;
                    log::warn!("Receive failed: {}", e);
                    return None;
                }
            }
        }
    }

    pub fn close(&mut self) {
        if self.local_addr.take().is_some() {
            self.socket.close();
            log::info!("Broadcast transport closed");
        }
    }
}
