use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::{error, trace};

/// Where finished packets go: the publisher multicasts through this, the recovery server
///  unicasts replies through it. Tests substitute a mock to capture the assembled packets.
///
/// Implementations report send failures instead of handling them - what a failure means
///  (transient, packet still counts as transmitted) is this protocol's policy and is
///  applied in [`send_best_effort`], not at the socket.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSink: Send + Sync + 'static {
    async fn send_datagram(&self, packet: &[u8], to: SocketAddr) -> io::Result<()>;
}

#[async_trait]
impl DatagramSink for UdpSocket {
    async fn send_datagram(&self, packet: &[u8], to: SocketAddr) -> io::Result<()> {
        self.send_to(packet, to).await?;
        Ok(())
    }
}

/// Transmits one packet under the protocol's best-effort policy: a send failure is
///  transient, the packet counts as transmitted anyway (a subscriber that missed it
///  recovers it from the log later), and the error is only logged.
pub async fn send_best_effort(sink: &dyn DatagramSink, packet: &[u8], to: SocketAddr) {
    trace!("sending {} byte packet to {:?}", packet.len(), to);

    if let Err(e) = sink.send_datagram(packet, to).await {
        error!("transient failure sending packet to {:?}: {}", to, e);
    }
}

/// Binds the socket a publisher multicasts from: an ephemeral port on the source interface,
///  with the TTL and loopback flags applied.
pub async fn bind_multicast_sender(
    source_ip: Ipv4Addr,
    multicast_ttl: u32,
    multicast_loop: bool,
) -> anyhow::Result<UdpSocket> {
    let socket = UdpSocket::bind((source_ip, 0)).await?;
    socket.set_multicast_ttl_v4(multicast_ttl)?;
    socket.set_multicast_loop_v4(multicast_loop)?;
    Ok(socket)
}
