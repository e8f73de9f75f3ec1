use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;

use crate::wire::{MESSAGE_COUNT_HEARTBEAT, MESSAGE_PREFIX_LEN, PACKET_HEADER_LEN};

/// Process-wide publisher configuration, shared by all streams of a registry.
pub struct MoldConfig {
    /// The maximum size of a downstream or recovery-reply packet, i.e. the UDP payload size
    ///  this publisher assumes is deliverable without IP-level fragmentation on all routes
    ///  to its subscribers.
    ///
    /// In an ideal world, we would discover the MTU, but there is some uncertainty involved
    ///  (e.g. optional IP headers that may be introduced by some network hardware), so the
    ///  responsibility of determining the deliverable payload size is left with the
    ///  application rather than making assumptions on its own.
    ///
    /// Choosing this value too big causes packets to be dropped, which may be partial if
    ///  only some of the routes support smaller frames. Choosing it too small wastes
    ///  bandwidth on header overhead.
    pub mtu: usize,

    /// Number of recently transmitted messages retained in memory per stream for serving
    ///  recovery requests without touching the log file.
    pub recovery_buffer_capacity: usize,

    /// A pending batch is flushed once it holds this many messages, even if there is room
    ///  left within the MTU.
    pub coalesce_count_limit: usize,

    /// How long a non-empty pending batch may wait for further messages before it is
    ///  flushed. This bounds the latency cost of coalescing.
    pub coalesce_idle: Duration,

    /// Heartbeat interval for streams that do not override it. If this much time passes
    ///  without any transmission, a heartbeat packet is multicast.
    pub default_heartbeat_interval: Duration,

    /// TTL for multicast packets. 1 keeps traffic on the local segment; raise it when
    ///  subscribers sit behind multicast routers.
    pub multicast_ttl: u32,

    /// Whether multicast packets loop back to the sending host, so that subscribers on the
    ///  publisher's own machine receive them.
    pub multicast_loop: bool,

    /// This is the number of packet buffers that will be pooled at a given time - buffers in
    ///  excess of this number are discarded when they are returned.
    pub buffer_pool_size: usize,
}

impl MoldConfig {
    pub fn default_ipv4() -> MoldConfig {
        MoldConfig {
            mtu: 1400,
            recovery_buffer_capacity: 65536,
            coalesce_count_limit: 64,
            coalesce_idle: Duration::from_millis(1),
            default_heartbeat_interval: Duration::from_millis(1000),
            multicast_ttl: 1,
            multicast_loop: true,
            buffer_pool_size: 4096,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mtu < 100 {
            bail!("MTU is too small");
        }
        // 65507 is the largest UDP payload over IPv4
        if self.mtu > 65507 {
            bail!("MTU exceeds the maximum UDP payload size");
        }
        if self.coalesce_count_limit == 0 {
            bail!("coalesce count limit must be at least 1");
        }
        // the message count of a data packet must never collide with the heartbeat sentinel
        if self.coalesce_count_limit >= MESSAGE_COUNT_HEARTBEAT as usize {
            bail!("coalesce count limit must stay below the heartbeat sentinel 0xFFFF");
        }
        if self.recovery_buffer_capacity == 0 {
            bail!("recovery buffer capacity must be at least 1");
        }
        if self.buffer_pool_size == 0 {
            bail!("buffer pool size must be at least 1");
        }
        Ok(())
    }

    pub fn effective_publisher_config(&self, spec: &StreamSpec) -> EffectivePublisherConfig {
        EffectivePublisherConfig {
            max_packet_len: self.mtu,
            max_message_len: self.mtu - PACKET_HEADER_LEN - MESSAGE_PREFIX_LEN,
            coalesce_count_limit: self.coalesce_count_limit,
            coalesce_idle: self.coalesce_idle,
            heartbeat_interval: spec.heartbeat_interval.unwrap_or(self.default_heartbeat_interval),
        }
    }
}

/// Everything that identifies and wires up one stream.
pub struct StreamSpec {
    /// Caller-supplied identifier; its first 10 ASCII characters become the on-wire stream
    ///  name and double as the registry key.
    pub name: String,
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
    /// Unicast UDP port the stream's recovery server listens on.
    pub recovery_port: u16,
    /// Local interface address the multicast and recovery sockets bind to.
    pub source_ip: Ipv4Addr,
    /// Path of the stream's append-only recovery log file.
    pub log_path: PathBuf,
    /// Per-stream heartbeat interval; `None` uses the registry-wide default.
    pub heartbeat_interval: Option<Duration>,
}

/// The per-stream publisher configuration derived from [`MoldConfig`] and [`StreamSpec`].
pub struct EffectivePublisherConfig {
    pub max_packet_len: usize,
    pub max_message_len: usize,
    pub coalesce_count_limit: usize,
    pub coalesce_idle: Duration,
    pub heartbeat_interval: Duration,
}
