//! Broker discovery — UDP broadcast probe with a unicast subnet sweep
//! fallback for networks that drop broadcast traffic.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use ferry_core::discovery;

/// Hard cap on a unicast sweep. Anything larger than a /20 is refused
/// rather than sprayed across the network.
const MAX_SWEEP_HOSTS: u32 = 4096;

/// Resolve a broker address: an explicit `host:port` wins, otherwise the
/// LAN is probed.
pub async fn resolve(
    spec: Option<String>,
    discovery_port: u16,
    wait: Duration,
) -> Result<SocketAddr> {
    if let Some(spec) = spec {
        return tokio::net::lookup_host(spec.as_str())
            .await
            .with_context(|| format!("cannot resolve broker address {spec}"))?
            .next()
            .context("broker address resolved to nothing");
    }
    discover(discovery_port, wait)
        .await?
        .context("no broker answered on the local network")
}

/// Find a broker: broadcast first, then sweep the local subnet.
pub async fn discover(discovery_port: u16, wait: Duration) -> Result<Option<SocketAddr>> {
    if let Some(found) = probe_broadcast(discovery_port, wait).await? {
        return Ok(Some(found));
    }
    tracing::debug!("broadcast probe drew no reply, sweeping the subnet");
    probe_subnet(discovery_port, wait).await
}

async fn probe_broadcast(port: u16, wait: Duration) -> Result<Option<SocketAddr>> {
    let socket = make_broadcast_socket().context("failed to create broadcast socket")?;
    let socket = UdpSocket::from_std(socket).context("failed to convert to tokio socket")?;

    let dest = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port);
    socket
        .send_to(discovery::PROBE, dest)
        .await
        .context("broadcast send failed")?;
    tracing::debug!(port, "broadcast probe sent");

    await_reply(&socket, wait).await
}

async fn probe_subnet(port: u16, wait: Duration) -> Result<Option<SocketAddr>> {
    let Some((local, netmask)) = local_ipv4_with_netmask() else {
        tracing::debug!("no usable IPv4 interface for a subnet sweep");
        return Ok(None);
    };

    let range = SubnetRange::new(local, netmask);
    if range.host_count() > MAX_SWEEP_HOSTS {
        tracing::warn!(hosts = range.host_count(), "subnet too large to sweep");
        return Ok(None);
    }
    tracing::debug!(
        local = %local,
        netmask = %netmask,
        hosts = range.host_count(),
        "sweeping subnet"
    );

    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .context("failed to bind sweep socket")?;
    for addr in range.hosts() {
        if addr == local {
            continue;
        }
        // Unanswered probes are the common case; errors are not.
        let _ = socket.send_to(discovery::PROBE, SocketAddr::new(IpAddr::V4(addr), port)).await;
    }

    await_reply(&socket, wait).await
}

/// Poll `socket` for a broker reply until the deadline passes.
async fn await_reply(socket: &UdpSocket, wait: Duration) -> Result<Option<SocketAddr>> {
    let deadline = tokio::time::Instant::now() + wait;
    let mut buf = vec![0u8; 256];

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Err(_) => return Ok(None),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "discovery recv failed");
                return Ok(None);
            }
            Ok(Ok((len, peer))) => {
                if let Some(tcp_port) = discovery::parse_reply(&buf[..len]) {
                    tracing::info!(peer = %peer, tcp_port, "broker discovered");
                    return Ok(Some(SocketAddr::new(peer.ip(), tcp_port)));
                }
                tracing::trace!(peer = %peer, len, "ignoring non-reply datagram");
            }
        }
    }
}

fn make_broadcast_socket() -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_broadcast(true).context("SO_BROADCAST")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
    socket.bind(&bind.into()).context("bind()")?;
    Ok(socket.into())
}

/// First non-loopback IPv4 interface address and its netmask.
fn local_ipv4_with_netmask() -> Option<(Ipv4Addr, Ipv4Addr)> {
    let addrs = nix::ifaddrs::getifaddrs().ok()?;
    for ifaddr in addrs {
        let (Some(addr), Some(mask)) = (ifaddr.address, ifaddr.netmask) else {
            continue;
        };
        let (Some(addr), Some(mask)) = (addr.as_sockaddr_in(), mask.as_sockaddr_in()) else {
            continue;
        };
        let ip = Ipv4Addr::from(addr.ip());
        if ip.is_loopback() {
            continue;
        }
        return Some((ip, Ipv4Addr::from(mask.ip())));
    }
    None
}

/// Host range of an IPv4 subnet, network and broadcast excluded.
struct SubnetRange {
    network: u32,
    broadcast: u32,
}

impl SubnetRange {
    fn new(ip: Ipv4Addr, mask: Ipv4Addr) -> Self {
        let ip = u32::from(ip);
        let mask = u32::from(mask);
        let network = ip & mask;
        Self { network, broadcast: network | !mask }
    }

    fn host_count(&self) -> u32 {
        (self.broadcast - self.network).saturating_sub(1)
    }

    fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        (self.network.saturating_add(1)..self.broadcast).map(Ipv4Addr::from)
    }
}
