use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use super::transport::DatagramSocket;

/// One datagram in flight from `from` to `to`.
#[derive(Debug, Clone)]
pub struct SimDatagram {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    Drop,
    /// Parked until `release_held`, which lets tests reorder traffic.
    Hold,
}

type Filter = Box<dyn FnMut(&SimDatagram) -> Verdict>;

#[derive(Debug)]
struct SimEndpoint {
    addr: SocketAddr,
    open: bool,
    inbox: VecDeque<SimDatagram>,
}

#[derive(Default)]
struct Hub {
    endpoints: Vec<SimEndpoint>,
    held: Vec<SimDatagram>,
    filter: Option<Filter>,
    radio_down: bool,
    delivered: u64,
    dropped: u64,
}

impl Hub {
    fn endpoint_mut(&mut self, addr: SocketAddr) -> Option<&mut SimEndpoint> {
        self.endpoints.iter_mut().find(|e| e.addr == addr)
    }

    fn route(&mut self, datagram: SimDatagram) {
        let verdict = match self.filter.as_mut() {
            Some(filter) => filter(&datagram),
            None => Verdict::Deliver,
        };

        match verdict {
            Verdict::Deliver => self.deliver(datagram),
            Verdict::Drop => self.dropped += 1,
            Verdict::Hold => self.held.push(datagram),
        }
    }

    fn deliver(&mut self, datagram: SimDatagram) {
        if let Some(endpoint) = self.endpoint_mut(datagram.to) {
            if endpoint.open {
                endpoint.inbox.push_back(datagram);
                self.delivered += 1;
            }
        }
    }
}

/// In-memory broadcast segment. Every open socket, the sender included,
/// receives each broadcast, like a real radio does.
#[derive(Clone, Default)]
pub struct SimulatedNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn socket(&self, addr: SocketAddr) -> SimSocket {
        let mut hub = self.hub.borrow_mut();
        if hub.endpoint_mut(addr).is_none() {
            hub.endpoints.push(SimEndpoint {
                addr,
                open: false,
                inbox: VecDeque::new(),
            });
        }
        SimSocket {
            addr,
            hub: Rc::clone(&self.hub),
        }
    }

    pub fn set_radio_available(&self, available: bool) {
        self.hub.borrow_mut().radio_down = !available;
    }

    pub fn set_filter<F>(&self, filter: F)
    where
        F: FnMut(&SimDatagram) -> Verdict + 'static,
    {
        self.hub.borrow_mut().filter = Some(Box::new(filter));
    }

    pub fn clear_filter(&self) {
        self.hub.borrow_mut().filter = None;
    }

    /// Delivers everything parked by `Verdict::Hold`, newest first.
    pub fn release_held(&self) {
        let mut hub = self.hub.borrow_mut();
        let held: Vec<SimDatagram> = hub.held.drain(..).rev().collect();
        for datagram in held {
            hub.deliver(datagram);
        }
    }

    /// Places raw bytes in `to`'s inbox, bypassing the filter.
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        self.hub.borrow_mut().deliver(SimDatagram {
            from,
            to,
            data: data.to_vec(),
        });
    }

    pub fn delivered(&self) -> u64 {
        self.hub.borrow().delivered
    }

    pub fn dropped(&self) -> u64 {
        self.hub.borrow().dropped
    }
}

pub struct SimSocket {
    addr: SocketAddr,
    hub: Rc<RefCell<Hub>>,
}

impl SimSocket {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl DatagramSocket for SimSocket {
    fn open(&mut self, _port: u16) -> io::Result<SocketAddr> {
        let mut hub = self.hub.borrow_mut();
        if hub.radio_down {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "radio unavailable"));
        }
        let endpoint = hub
            .endpoint_mut(self.addr)
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "unknown endpoint"))?;
        if endpoint.open {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "already bound"));
        }
        endpoint.open = true;
        Ok(self.addr)
    }

    fn send_broadcast(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut hub = self.hub.borrow_mut();
        if hub.radio_down {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "radio unavailable"));
        }

        let targets: Vec<SocketAddr> = hub
            .endpoints
            .iter()
            .filter(|e| e.open)
            .map(|e| e.addr)
            .collect();

        for to in targets {
            hub.route(SimDatagram {
                from: self.addr,
                to,
                data: data.to_vec(),
            });
        }

        Ok(data.len())
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let mut hub = self.hub.borrow_mut();
        let Some(endpoint) = hub.endpoint_mut(self.addr) else {
            return Ok(None);
        };

        Ok(endpoint.inbox.pop_front().map(|datagram| {
            let size = datagram.data.len().min(buf.len());
            buf[..size].copy_from_slice(&datagram.data[..size]);
            (size, datagram.from)
        }))
    }

    fn close(&mut self) {
        if let Some(endpoint) = self.hub.borrow_mut().endpoint_mut(self.addr) {
            endpoint.open = false;
            endpoint.inbox.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 8888)
    }

    #[test]
    fn test_broadcast_reaches_every_open_socket() {
        let net = SimulatedNetwork::new();
        let mut a = net.socket(addr(1));
        let mut b = net.socket(addr(2));
        let mut c = net.socket(addr(3));
        a.open(0).unwrap();
        b.open(0).unwrap();

        a.send_broadcast(&[1, 2, 3]).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(a.try_recv(&mut buf).unwrap(), Some((3, addr(1))));
        assert_eq!(b.try_recv(&mut buf).unwrap(), Some((3, addr(1))));
        assert_eq!(c.try_recv(&mut buf).unwrap(), None);
        assert_eq!(net.delivered(), 2);
    }

    #[test]
    fn test_held_datagrams_arrive_reversed() {
        let net = SimulatedNetwork::new();
        let mut a = net.socket(addr(1));
        let mut b = net.socket(addr(2));
        a.open(0).unwrap();
        b.open(0).unwrap();

        net.set_filter(|d| if d.to == addr(2) { Verdict::Hold } else { Verdict::Drop });
        a.send_broadcast(&[1]).unwrap();
        a.send_broadcast(&[2]).unwrap();
        net.clear_filter();

        let mut buf = [0u8; 8];
        assert_eq!(b.try_recv(&mut buf).unwrap(), None);

        net.release_held();
        b.try_recv(&mut buf).unwrap();
        assert_eq!(buf[0], 2);
        b.try_recv(&mut buf).unwrap();
        assert_eq!(buf[0], 1);
    }
}
