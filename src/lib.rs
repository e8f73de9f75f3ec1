//! Server-side MoldUDP64 publisher: a reliable-ish, low-latency, one-to-many dissemination
//!  protocol layered on UDP multicast, with unicast recovery for late or lossy subscribers.
//!
//! ## Design goals
//!
//! * The abstraction is publishing *streams of messages* (defined-length chunks of data), each
//!   message carrying a gap-free, strictly monotonic 64-bit sequence number
//!   * exactly one publisher owns a stream; subscribers join the multicast group and observe
//!     the sequence numbers to detect loss
//! * Maximise throughput and minimise latency on the downstream path
//!   * small messages are coalesced into a single packet, delaying the send operation for a
//!     short configurable interval to amortise syscall and serialisation cost
//!   * no packet ever exceeds the configured MTU - this protocol does not rely on IP-level
//!     fragmentation
//! * Recovery is advisory rather than fully reliable: a subscriber that missed packets asks
//!   for a sequence range by unicast and gets back as much of it as fits a single packet
//!   * the hot tail of the stream is served from an in-memory ring of recently sent messages
//!   * everything older is served from an append-only log file that holds every message ever
//!     transmitted on the stream
//! * Heartbeats keep the group informed of the next sequence number during idle periods, so
//!   subscribers can distinguish silence from loss
//! * Sequencing survives publisher restarts: the next sequence number is derived from the
//!   recovery log alone, never from a separately persisted counter
//!
//! ## Wire format
//!
//! Downstream packet (UDP payload, all numbers in network byte order):
//! ```ascii
//! offset 0  : stream name    10 bytes (ASCII, right-padded with 0x20)
//! offset 10 : next expected   8 bytes (u64): sequence number of the first message in this
//!              packet; for heartbeats, the sequence number the next data message would carry
//! offset 18 : message count   2 bytes (u16): 0xFFFF = heartbeat, 0x0000 = end of session
//! offset 20 : message blocks, each 'length (u16) || payload (length bytes)', repeated
//!              'message count' times
//! ```
//!
//! Recovery request (UDP payload, exactly 20 bytes):
//! ```ascii
//! offset 0  : stream name      10 bytes
//! offset 10 : sequence number   8 bytes (u64, 1-based, first sequence requested)
//! offset 18 : count             2 bytes (u16)
//! ```
//!
//! The recovery reply reuses the downstream packet format, with 'next expected' set to the
//!  first sequence actually included and 'message count' set to the number of messages that
//!  fit the MTU.
//!
//! Recovery log file: the concatenation of message blocks in sequence order starting at
//!  sequence 1, one file per stream.

pub mod buffer_pool;
pub mod config;
pub mod datagram;
pub mod error;
pub mod publisher;
pub mod recovery_buffer;
pub mod recovery_log;
pub mod recovery_server;
pub mod registry;
mod safe_converter;
pub mod seq;
pub mod stream_name;
pub mod wire;

pub use config::{MoldConfig, StreamSpec};
pub use error::{LogError, RegistryError, SubmitError};
pub use registry::{StreamHandle, StreamRegistry};
pub use seq::SequenceNumber;
pub use stream_name::StreamName;
