use std::sync::{Arc, RwLock as StdRwLock};

use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;

use crate::buffer_pool::PacketBufferPool;
use crate::config::EffectivePublisherConfig;
use crate::datagram::send_best_effort;
use crate::recovery_buffer::RecoveryBuffer;
use crate::recovery_log::RecoveryLog;
use crate::seq::SequenceNumber;
use crate::stream_name::StreamName;
use crate::wire::{self, projected_packet_size, RecoveryRequest, MESSAGE_PREFIX_LEN};

struct RecoveryServerInner {
    config: Arc<EffectivePublisherConfig>,
    stream: StreamName,
    socket: Arc<UdpSocket>,
    log: Arc<StdRwLock<RecoveryLog>>,
    recovery_buffer: Arc<StdRwLock<RecoveryBuffer>>,
    buffer_pool: Arc<PacketBufferPool>,
}

/// Per-stream recovery server: answers unicast requests for a sequence range with as much
///  of that range as fits a single packet, reading the hot tail from the recovery buffer
///  and everything older from the log. It is read-only with respect to publisher state and
///  never advances sequence numbers.
pub struct RecoveryServer {
    inner: Arc<RecoveryServerInner>,
    active_handle: Option<JoinHandle<()>>,
}

impl RecoveryServer {
    pub fn new(
        config: Arc<EffectivePublisherConfig>,
        stream: StreamName,
        socket: Arc<UdpSocket>,
        log: Arc<StdRwLock<RecoveryLog>>,
        recovery_buffer: Arc<StdRwLock<RecoveryBuffer>>,
        buffer_pool: Arc<PacketBufferPool>,
    ) -> RecoveryServer {
        RecoveryServer {
            inner: Arc::new(RecoveryServerInner {
                config,
                stream,
                socket,
                log,
                recovery_buffer,
                buffer_pool,
            }),
            active_handle: None,
        }
    }

    pub fn spawn_recv_loop(&mut self) {
        if self.active_handle.is_some() {
            warn!("recovery receive loop already spawned");
            return;
        }
        self.active_handle = Some(tokio::spawn(Self::recv_loop(self.inner.clone())));
    }

    /// The address the recovery socket is bound to. Useful when the stream was created
    ///  with recovery port 0 (ephemeral).
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.inner.socket.local_addr()
    }

    /// Stops serving recovery requests; the socket closes once the loop task is gone.
    pub fn abort(&self) {
        if let Some(handle) = &self.active_handle {
            handle.abort();
        }
    }

    async fn recv_loop(inner: Arc<RecoveryServerInner>) {
        info!("stream {}: serving recovery requests on {:?}",
              inner.stream, inner.socket.local_addr().ok());

        let mut buf = [0u8; 64];
        loop {
            let (num_read, from) = match inner.socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("recovery socket error: {}", e);
                    continue;
                }
            };

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "recovery_request", ?correlation_id);
            Self::handle_datagram(&inner, &buf[..num_read], from).instrument(span).await;
        }
    }

    async fn handle_datagram(inner: &RecoveryServerInner, datagram: &[u8], from: std::net::SocketAddr) {
        trace!("received recovery datagram from {:?}: {:?}", from, datagram);

        let request = match RecoveryRequest::deser(&mut &*datagram) {
            Ok(request) => request,
            Err(_) => {
                debug!("malformed recovery request from {:?} - dropping", from);
                return;
            }
        };

        if request.stream != inner.stream {
            debug!("recovery request from {:?} for foreign stream '{}' - dropping", from, request.stream);
            return;
        }

        let reply = {
            let log = inner.log.read().unwrap();
            let recovery_buffer = inner.recovery_buffer.read().unwrap();
            assemble_reply(&inner.config, inner.stream, &log, &recovery_buffer, &inner.buffer_pool, &request)
        };

        match reply {
            Some(packet_buf) => {
                trace!("replying to {:?} with {} recovered bytes starting at sequence {}",
                       from, packet_buf.len(), request.start);
                // the reply leaves from the recovery port, so the same socket both receives
                //  requests and answers them
                send_best_effort(inner.socket.as_ref(), &packet_buf, from).await;
                inner.buffer_pool.release(packet_buf);
            }
            None => {
                debug!("no recoverable messages for request ({}, {}) from {:?} - no reply",
                       request.start, request.count, from);
            }
        }
    }
}

/// Resolves a recovery request against the buffer and the log, packing the largest prefix
///  of the requested range that fits a single packet. Returns `None` when there is nothing
///  to reply: a zero-count or zero-start request, or a range entirely beyond what was
///  transmitted.
fn assemble_reply(
    config: &EffectivePublisherConfig,
    stream: StreamName,
    log: &RecoveryLog,
    recovery_buffer: &RecoveryBuffer,
    buffer_pool: &PacketBufferPool,
    request: &RecoveryRequest,
) -> Option<BytesMut> {
    if request.count == 0 || request.start == SequenceNumber::ZERO {
        return None;
    }

    // the log is the authoritative high-water mark of what was ever transmitted: the
    //  buffer holds a suffix of it, and may be empty right after a restart
    let last_transmitted = log.last_written();
    if request.start > last_transmitted {
        return None;
    }

    let requested_end = request.start.plus(request.count as u64);
    let end = if requested_end > last_transmitted.next() { last_transmitted.next() } else { requested_end };

    let mut messages: Vec<Bytes> = Vec::new();
    let mut packet_size = 0usize;
    for seq in request.start.to(end) {
        let encoded = match recovery_buffer.lookup(seq) {
            Some(encoded) => encoded,
            None => match log.read(seq) {
                Ok(encoded) => encoded,
                Err(e) => {
                    warn!("stream {}: failed to read sequence {} from the recovery log: {}", stream, seq, e);
                    break;
                }
            },
        };

        // per-message sizes vary, so the MTU clamp is computed by cumulative addition
        let payload_len = encoded.len() - MESSAGE_PREFIX_LEN;
        if projected_packet_size(packet_size, payload_len) > config.max_packet_len {
            break;
        }
        packet_size = projected_packet_size(packet_size, payload_len);
        messages.push(encoded);
    }

    if messages.is_empty() {
        return None;
    }

    let mut packet_buf = buffer_pool.checkout();
    wire::pack_packet(&mut packet_buf, stream, request.start, &messages);
    Some(packet_buf)
}
