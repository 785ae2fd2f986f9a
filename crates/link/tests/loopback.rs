use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use kartlink::net::MAX_DATAGRAM;
use kartlink::{
    BroadcastTransport, LinkError, Message, Packet, PlayerId, UdpBroadcastSocket,
};

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn loopback_transport() -> (BroadcastTransport<UdpBroadcastSocket>, SocketAddr) {
    let mut transport =
        BroadcastTransport::new(UdpBroadcastSocket::with_broadcast(LOOPBACK, LOOPBACK));
    let local = transport.open(0).unwrap();
    (transport, local)
}

fn wait_for_datagram(
    transport: &mut BroadcastTransport<UdpBroadcastSocket>,
    buf: &mut [u8],
    timeout_ms: u64,
) -> Option<(usize, SocketAddr)> {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        if let Some(received) = transport.receive(buf) {
            return Some(received);
        }
        thread::sleep(Duration::from_millis(1));
    }
    None
}

#[test]
fn test_own_datagram_is_filtered_on_a_real_socket() {
    let (mut transport, local) = loopback_transport();
    assert_eq!(local.ip(), LOOPBACK);

    let packet = Packet::new(PlayerId::new(0).unwrap(), Message::Heartbeat { epoch: 1 });
    transport.send(&packet.encode()).unwrap();

    let mut buf = [0u8; MAX_DATAGRAM];
    assert_eq!(wait_for_datagram(&mut transport, &mut buf, 200), None);
    assert_eq!(transport.stats().receives_filtered, 1);
    assert_eq!(transport.stats().sends_ok, 1);
}

#[test]
fn test_foreign_datagram_is_received() {
    let (mut transport, local) = loopback_transport();
    let other = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();

    let packet = Packet::new(PlayerId::new(5).unwrap(), Message::Heartbeat { epoch: 1 });
    other.send_to(&packet.encode(), local).unwrap();

    let mut buf = [0u8; MAX_DATAGRAM];
    let (size, from) = wait_for_datagram(&mut transport, &mut buf, 500).unwrap();
    assert_eq!(from, other.local_addr().unwrap());
    assert_eq!(Packet::decode(&buf[..size]).unwrap(), packet);
}

#[test]
fn test_receive_never_blocks_when_idle() {
    let (mut transport, _) = loopback_transport();

    let mut buf = [0u8; MAX_DATAGRAM];
    let start = Instant::now();
    assert_eq!(transport.receive(&mut buf), None);
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[test]
fn test_second_bind_to_a_taken_port_is_unavailable() {
    let (_held, local) = loopback_transport();

    let mut second =
        BroadcastTransport::new(UdpBroadcastSocket::with_broadcast(LOOPBACK, LOOPBACK));
    assert!(matches!(
        second.open(local.port()),
        Err(LinkError::TransportUnavailable(_))
    ));
}

#[test]
fn test_local_ip_follows_route_to_broadcast_target() {
    assert_eq!(UdpBroadcastSocket::detect_local_ip(LOOPBACK).unwrap(), LOOPBACK);
}
