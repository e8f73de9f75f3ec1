use std::net::SocketAddr;
use std::sync::{Arc, RwLock as StdRwLock};

use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::buffer_pool::PacketBufferPool;
use crate::config::EffectivePublisherConfig;
use crate::datagram::{send_best_effort, DatagramSink};
use crate::error::SubmitError;
use crate::recovery_buffer::RecoveryBuffer;
use crate::recovery_log::RecoveryLog;
use crate::seq::SequenceNumber;
use crate::stream_name::StreamName;
use crate::wire::{self, projected_packet_size};

struct PublisherInner {
    config: Arc<EffectivePublisherConfig>,
    stream: StreamName,
    group_addr: SocketAddr,
    sink: Arc<dyn DatagramSink>,
    buffer_pool: Arc<PacketBufferPool>,
    log: Arc<StdRwLock<RecoveryLog>>,
    recovery_buffer: Arc<StdRwLock<RecoveryBuffer>>,

    /// the sequence number the next submitted message will be assigned
    next_seq: SequenceNumber,
    /// encoded messages awaiting transmission, in submission order
    pending: Vec<Bytes>,
    /// the size the packet would have if `pending` was flushed now, header included
    pending_size: usize,
    last_send: Instant,
    idle_flush_handle: Option<JoinHandle<()>>,
    /// set after a fatal recovery log error; submissions are rejected until a restart
    failed: bool,
}

impl PublisherInner {
    /// Transmits the pending batch: assigns sequence numbers, makes the batch durable in the
    ///  recovery log, mirrors it into the recovery buffer and multicasts a single packet.
    ///
    /// The log write happens strictly before the send. If it fails the batch is rolled back
    ///  and no sequence numbers are consumed; a send failure after a successful log write
    ///  leaves the sequence numbers consumed, since recovery can serve the messages from
    ///  the log.
    async fn do_flush(&mut self) -> Result<(), SubmitError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let first_seq = self.next_seq;
        let batch_len = self.pending.len();

        {
            let mut log = self.log.write().unwrap();
            let rollback_point = log.last_written();

            let write_result = self.pending.iter()
                .try_for_each(|message| log.append(message).map(|_| ()))
                .and_then(|_| log.flush());

            if let Err(e) = write_result {
                if let Err(rollback_error) = log.truncate_to(rollback_point) {
                    error!("stream {}: rollback of failed batch also failed: {}", self.stream, rollback_error);
                }
                drop(log);
                error!("stream {}: fatal recovery log error, stopping submissions: {}", self.stream, e);
                self.failed = true;
                self.pending.clear();
                self.pending_size = 0;
                if let Some(handle) = self.idle_flush_handle.take() {
                    handle.abort();
                }
                return Err(e.into());
            }

            debug_assert_eq!(log.last_written(), first_seq.plus(batch_len as u64 - 1));
        }

        {
            let mut recovery_buffer = self.recovery_buffer.write().unwrap();
            for (offset, message) in self.pending.iter().enumerate() {
                recovery_buffer.insert(first_seq.plus(offset as u64), message.clone());
            }
        }

        let mut packet_buf = self.buffer_pool.checkout();
        wire::pack_packet(&mut packet_buf, self.stream, first_seq, &self.pending);
        debug_assert!(packet_buf.len() <= self.config.max_packet_len);

        trace!("stream {}: sending packet with sequences [{}, {})",
               self.stream, first_seq, first_seq.plus(batch_len as u64));
        send_best_effort(self.sink.as_ref(), &packet_buf, self.group_addr).await;
        self.buffer_pool.release(packet_buf);

        self.next_seq += batch_len as u64;
        self.pending.clear();
        self.pending_size = 0;
        self.last_send = Instant::now();
        if let Some(handle) = self.idle_flush_handle.take() {
            // NB: when the flush was triggered by the idle timer this aborts the timer's own
            //  task; there is no await point after this, so the flush still completes
            handle.abort();
        }
        Ok(())
    }

    async fn do_send_heartbeat(&mut self) {
        let mut packet_buf = self.buffer_pool.checkout();
        wire::pack_heartbeat(&mut packet_buf, self.stream, self.next_seq);

        trace!("stream {}: heartbeat with next expected sequence {}", self.stream, self.next_seq);
        send_best_effort(self.sink.as_ref(), &packet_buf, self.group_addr).await;
        self.buffer_pool.release(packet_buf);

        self.last_send = Instant::now();
    }

    async fn do_send_end_of_session(&mut self) {
        let mut packet_buf = self.buffer_pool.checkout();
        wire::pack_end_of_session(&mut packet_buf, self.stream, self.next_seq);

        send_best_effort(self.sink.as_ref(), &packet_buf, self.group_addr).await;
        self.buffer_pool.release(packet_buf);

        self.last_send = Instant::now();
    }

    /// Restart after a fatal log error: re-scan the log, resume sequencing at
    ///  `last_written + 1` and start over with an empty recovery buffer.
    fn do_restart(&mut self) -> Result<(), SubmitError> {
        {
            let mut log = self.log.write().unwrap();
            log.reopen()?;
            self.next_seq = log.last_written().next();
        }
        self.recovery_buffer.write().unwrap().clear();

        self.pending.clear();
        self.pending_size = 0;
        self.failed = false;
        self.last_send = Instant::now();

        info!("stream {}: publisher restarted from the recovery log, resuming at sequence {}",
              self.stream, self.next_seq);
        Ok(())
    }
}

/// The per-stream publisher. Producers may call [`send_message`](Self::send_message) from
///  any task; submissions are serialised on the inner lock and transmitted in arrival
///  order.
pub struct StreamPublisher {
    config: Arc<EffectivePublisherConfig>,
    inner: Arc<RwLock<PublisherInner>>,
    heartbeat_handle: Option<JoinHandle<()>>,
}

impl StreamPublisher {
    pub fn new(
        config: Arc<EffectivePublisherConfig>,
        stream: StreamName,
        group_addr: SocketAddr,
        sink: Arc<dyn DatagramSink>,
        log: Arc<StdRwLock<RecoveryLog>>,
        recovery_buffer: Arc<StdRwLock<RecoveryBuffer>>,
        buffer_pool: Arc<PacketBufferPool>,
    ) -> StreamPublisher {
        let next_seq = log.read().unwrap().last_written().next();
        if next_seq != SequenceNumber::FIRST {
            info!("stream {}: resuming sequencing at {} from the recovery log", stream, next_seq);
        }

        let inner = PublisherInner {
            config: config.clone(),
            stream,
            group_addr,
            sink,
            buffer_pool,
            log,
            recovery_buffer,
            next_seq,
            pending: Vec::new(),
            pending_size: 0,
            last_send: Instant::now(),
            idle_flush_handle: None,
            failed: false,
        };

        StreamPublisher {
            config,
            inner: Arc::new(RwLock::new(inner)),
            heartbeat_handle: None,
        }
    }

    pub fn spawn_heartbeat_loop(&mut self) {
        if self.heartbeat_handle.is_some() {
            warn!("heartbeat loop already spawned");
            return;
        }
        self.heartbeat_handle = Some(tokio::spawn(Self::heartbeat_loop(self.config.clone(), self.inner.clone())));
    }

    pub async fn next_seq(&self) -> SequenceNumber {
        self.inner.read().await.next_seq
    }

    /// Encodes and enqueues a message. Returns once the message is accepted: a batch that
    ///  the message would overflow beyond the MTU is flushed first, a batch that reaches
    ///  the coalesce count limit is flushed immediately, and a fresh batch arms the idle
    ///  flush timer so coalescing never delays a message by more than `coalesce_idle`.
    pub async fn send_message(&self, message: &[u8]) -> Result<(), SubmitError> {
        let encoded = wire::encode_message(message, self.config.max_message_len)?;

        let mut inner = self.inner.write().await;
        if inner.failed {
            return Err(SubmitError::StreamFailed);
        }

        debug!("stream {}: registering message of length {} for sending", inner.stream, message.len());

        if projected_packet_size(inner.pending_size, message.len()) > self.config.max_packet_len {
            inner.do_flush().await?;
        }

        let starts_new_batch = inner.pending.is_empty();
        inner.pending_size = projected_packet_size(inner.pending_size, message.len());
        inner.pending.push(encoded);

        if inner.pending.len() >= self.config.coalesce_count_limit {
            inner.do_flush().await?;
        }
        else if starts_new_batch {
            let batch_first_seq = inner.next_seq;
            let idle_delay = self.config.coalesce_idle;
            let inner_arc = self.inner.clone();

            inner.idle_flush_handle = Some(tokio::spawn(async move {
                time::sleep(idle_delay).await;

                let mut inner = inner_arc.write().await;
                if inner.next_seq != batch_first_seq {
                    trace!("idle flush: batch starting at {} already flushed", batch_first_seq);
                }
                else if !inner.pending.is_empty() {
                    trace!("idle flush: flushing batch starting at {}", batch_first_seq);
                    if let Err(e) = inner.do_flush().await {
                        error!("idle flush failed: {}", e);
                    }
                }
            }));
        }

        Ok(())
    }

    /// Explicitly flushes the pending batch.
    pub async fn flush(&self) -> Result<(), SubmitError> {
        self.inner.write().await.do_flush().await
    }

    /// Graceful teardown: flush what is pending, then multicast an end-of-session packet.
    pub async fn close(&self) -> Result<(), SubmitError> {
        if let Some(handle) = &self.heartbeat_handle {
            handle.abort();
        }

        let mut inner = self.inner.write().await;
        let flush_result = if inner.failed { Ok(()) } else { inner.do_flush().await };
        inner.do_send_end_of_session().await;
        if let Some(handle) = inner.idle_flush_handle.take() {
            handle.abort();
        }
        // reject submissions arriving after the end-of-session packet
        inner.failed = true;
        info!("stream {}: end of session", inner.stream);
        flush_result
    }

    /// Restarts a publisher that stopped on a fatal log error, replaying the log to
    ///  reconstruct the next sequence number.
    pub async fn restart(&self) -> Result<(), SubmitError> {
        self.inner.write().await.do_restart()
    }

    async fn heartbeat_loop(config: Arc<EffectivePublisherConfig>, inner: Arc<RwLock<PublisherInner>>) {
        loop {
            let deadline = inner.read().await.last_send + config.heartbeat_interval;
            time::sleep_until(deadline).await;

            let mut inner = inner.write().await;
            // re-check: a transmission may have happened while this task was asleep
            if !inner.failed && Instant::now() >= inner.last_send + config.heartbeat_interval {
                inner.do_send_heartbeat().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::datagram::MockDatagramSink;
    use crate::error::SubmitError;
    use crate::wire::{DownstreamPacket, MESSAGE_PREFIX_LEN};
    use rstest::rstest;
    use tokio::runtime::Builder;

    type SentPackets = Arc<Mutex<Vec<Vec<u8>>>>;

    fn recording_sink(sent: SentPackets) -> Arc<dyn DatagramSink> {
        let mut sink = MockDatagramSink::new();
        sink.expect_send_datagram()
            .returning(move |packet, _| {
                sent.lock().unwrap().push(packet.to_vec());
                Ok(())
            });
        Arc::new(sink)
    }

    fn test_config(max_packet_len: usize, coalesce_count_limit: usize) -> Arc<EffectivePublisherConfig> {
        Arc::new(EffectivePublisherConfig {
            max_packet_len,
            max_message_len: max_packet_len - 22,
            coalesce_count_limit,
            coalesce_idle: Duration::from_millis(1),
            heartbeat_interval: Duration::from_millis(1000),
        })
    }

    fn test_publisher_with_sink(
        config: Arc<EffectivePublisherConfig>,
        log_path: &Path,
        sink: Arc<dyn DatagramSink>,
    ) -> (StreamPublisher, Arc<StdRwLock<RecoveryLog>>, Arc<StdRwLock<RecoveryBuffer>>) {
        let log = Arc::new(StdRwLock::new(RecoveryLog::open(log_path).unwrap()));
        let recovery_buffer = Arc::new(StdRwLock::new(RecoveryBuffer::new(1024)));
        let max_packet_len = config.max_packet_len;
        let publisher = StreamPublisher::new(
            config,
            StreamName::new("foo"),
            SocketAddr::from(([239, 1, 1, 1], 31000)),
            sink,
            log.clone(),
            recovery_buffer.clone(),
            Arc::new(PacketBufferPool::new(max_packet_len, 16)),
        );
        (publisher, log, recovery_buffer)
    }

    fn test_publisher(
        config: Arc<EffectivePublisherConfig>,
        log_path: &Path,
        sent: SentPackets,
    ) -> (StreamPublisher, Arc<StdRwLock<RecoveryLog>>, Arc<StdRwLock<RecoveryBuffer>>) {
        test_publisher_with_sink(config, log_path, recording_sink(sent))
    }

    fn paused_rt() -> tokio::runtime::Runtime {
        Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap()
    }

    fn parse(raw: &[u8]) -> DownstreamPacket {
        DownstreamPacket::deser(&mut &*raw).unwrap()
    }

    fn payloads_of(packet: &DownstreamPacket) -> Vec<Vec<u8>> {
        packet.messages.iter()
            .map(|m| m[MESSAGE_PREFIX_LEN..].to_vec())
            .collect()
    }

    #[test]
    fn test_explicit_flush_batches_into_one_packet() {
        let dir = tempfile::tempdir().unwrap();
        let sent: SentPackets = Default::default();
        let (publisher, log, recovery_buffer) =
            test_publisher(test_config(1400, 64), &dir.path().join("foo.moldlog"), sent.clone());

        paused_rt().block_on(async move {
            publisher.send_message(b"message01").await.unwrap();
            publisher.send_message(b"message02").await.unwrap();
            publisher.send_message(b"message03").await.unwrap();
            assert!(sent.lock().unwrap().is_empty());

            publisher.flush().await.unwrap();

            let sent = sent.lock().unwrap();
            assert_eq!(sent.len(), 1);

            let packet = parse(&sent[0]);
            assert_eq!(packet.header.stream, StreamName::new("foo"));
            assert_eq!(packet.header.next_expected, SequenceNumber::from_raw(1));
            assert_eq!(packet.header.message_count, 3);
            assert_eq!(payloads_of(&packet), vec![
                b"message01".to_vec(), b"message02".to_vec(), b"message03".to_vec(),
            ]);

            assert_eq!(publisher.next_seq().await, SequenceNumber::from_raw(4));

            // the batch is durable and mirrored for recovery
            let log = log.read().unwrap();
            assert_eq!(log.last_written(), SequenceNumber::from_raw(3));
            assert_eq!(&log.read(SequenceNumber::from_raw(2)).unwrap()[MESSAGE_PREFIX_LEN..], b"message02");
            assert_eq!(
                recovery_buffer.read().unwrap().bounds(),
                Some((SequenceNumber::from_raw(1), SequenceNumber::from_raw(3)))
            );
        });
    }

    #[test]
    fn test_single_message_packet_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let sent: SentPackets = Default::default();
        let (publisher, _log, _buffer) =
            test_publisher(test_config(1400, 64), &dir.path().join("foo.moldlog"), sent.clone());

        paused_rt().block_on(async move {
            publisher.send_message(&[1, 2, 3]).await.unwrap();
            publisher.flush().await.unwrap();

            assert_eq!(sent.lock().unwrap()[0], vec![
                b'f',b'o',b'o',32,32,32,32,32,32,32, 0,0,0,0,0,0,0,1, 0,1, 0,3, 1,2,3,
            ]);
        });
    }

    #[test]
    fn test_idle_timer_flushes_pending_batch() {
        let dir = tempfile::tempdir().unwrap();
        let sent: SentPackets = Default::default();
        let (publisher, _log, _buffer) =
            test_publisher(test_config(1400, 64), &dir.path().join("foo.moldlog"), sent.clone());

        paused_rt().block_on(async move {
            publisher.send_message(b"message01").await.unwrap();
            assert!(sent.lock().unwrap().is_empty());

            time::sleep(Duration::from_millis(5)).await;

            let sent = sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            let packet = parse(&sent[0]);
            assert_eq!(packet.header.next_expected, SequenceNumber::from_raw(1));
            assert_eq!(payloads_of(&packet), vec![b"message01".to_vec()]);
        });
    }

    #[test]
    fn test_count_limit_flushes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let sent: SentPackets = Default::default();
        let (publisher, _log, _buffer) =
            test_publisher(test_config(1400, 2), &dir.path().join("foo.moldlog"), sent.clone());

        paused_rt().block_on(async move {
            publisher.send_message(b"message01").await.unwrap();
            publisher.send_message(b"message02").await.unwrap();

            let sent = sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert_eq!(parse(&sent[0]).header.message_count, 2);
        });
    }

    #[test]
    fn test_mtu_overflow_flushes_before_enqueueing() {
        let dir = tempfile::tempdir().unwrap();
        let sent: SentPackets = Default::default();
        // room for one 10-byte message per packet: 20 + (2 + 10) = 32
        let (publisher, _log, _buffer) =
            test_publisher(test_config(40, 64), &dir.path().join("foo.moldlog"), sent.clone());

        paused_rt().block_on(async move {
            publisher.send_message(b"message_01").await.unwrap();
            assert!(sent.lock().unwrap().is_empty());

            // would make the packet 44 bytes, so the first batch goes out on its own
            publisher.send_message(b"message_02").await.unwrap();
            {
                let sent = sent.lock().unwrap();
                assert_eq!(sent.len(), 1);
                let first = parse(&sent[0]);
                assert_eq!(first.header.next_expected, SequenceNumber::from_raw(1));
                assert_eq!(payloads_of(&first), vec![b"message_01".to_vec()]);
            }

            publisher.flush().await.unwrap();
            let sent = sent.lock().unwrap();
            assert_eq!(sent.len(), 2);
            let second = parse(&sent[1]);
            assert_eq!(second.header.next_expected, SequenceNumber::from_raw(2));
            assert_eq!(payloads_of(&second), vec![b"message_02".to_vec()]);
        });
    }

    #[rstest]
    #[case::just_above_budget(1379)]
    #[case::way_above_budget(100_000)]
    fn test_message_too_large_is_rejected(#[case] payload_len: usize) {
        let dir = tempfile::tempdir().unwrap();
        let sent: SentPackets = Default::default();
        let (publisher, log, _buffer) =
            test_publisher(test_config(1400, 64), &dir.path().join("foo.moldlog"), sent.clone());

        paused_rt().block_on(async move {
            let payload = vec![0u8; payload_len];
            assert!(matches!(
                publisher.send_message(&payload).await,
                Err(SubmitError::MessageTooLarge { .. })
            ));

            publisher.flush().await.unwrap();
            assert!(sent.lock().unwrap().is_empty());
            assert_eq!(log.read().unwrap().last_written(), SequenceNumber::ZERO);
        });
    }

    #[test]
    fn test_heartbeat_during_silence() {
        let dir = tempfile::tempdir().unwrap();
        let sent: SentPackets = Default::default();
        let (mut publisher, _log, _buffer) =
            test_publisher(test_config(1400, 64), &dir.path().join("foo.moldlog"), sent.clone());

        paused_rt().block_on(async move {
            publisher.spawn_heartbeat_loop();

            time::sleep(Duration::from_millis(1100)).await;

            let sent = sent.lock().unwrap();
            assert!(!sent.is_empty());
            let packet = parse(&sent[0]);
            assert!(packet.is_heartbeat());
            assert_eq!(packet.header.next_expected, SequenceNumber::from_raw(1));
        });
    }

    #[test]
    fn test_heartbeat_carries_next_unassigned_seq_and_does_not_advance_it() {
        let dir = tempfile::tempdir().unwrap();
        let sent: SentPackets = Default::default();
        let (mut publisher, _log, _buffer) =
            test_publisher(test_config(1400, 64), &dir.path().join("foo.moldlog"), sent.clone());

        paused_rt().block_on(async move {
            publisher.spawn_heartbeat_loop();

            for i in 1..=12u8 {
                publisher.send_message(format!("message{:02}", i).as_bytes()).await.unwrap();
            }
            publisher.flush().await.unwrap();

            time::sleep(Duration::from_millis(1100)).await;

            let sent = sent.lock().unwrap();
            let heartbeats = sent.iter()
                .map(|raw| parse(raw))
                .filter(|p| p.is_heartbeat())
                .collect::<Vec<_>>();
            assert!(!heartbeats.is_empty());
            for heartbeat in &heartbeats {
                assert_eq!(heartbeat.header.next_expected, SequenceNumber::from_raw(13));
            }
            assert_eq!(publisher.next_seq().await, SequenceNumber::from_raw(13));
        });
    }

    #[test]
    fn test_no_heartbeat_while_data_is_flowing() {
        let dir = tempfile::tempdir().unwrap();
        let sent: SentPackets = Default::default();
        let (mut publisher, _log, _buffer) =
            test_publisher(test_config(1400, 64), &dir.path().join("foo.moldlog"), sent.clone());

        paused_rt().block_on(async move {
            publisher.spawn_heartbeat_loop();

            for _ in 0..4 {
                time::sleep(Duration::from_millis(800)).await;
                publisher.send_message(b"tick").await.unwrap();
                publisher.flush().await.unwrap();
            }

            let sent = sent.lock().unwrap();
            assert!(sent.iter().all(|raw| !parse(raw).is_heartbeat()));
        });
    }

    #[test]
    fn test_close_flushes_and_sends_end_of_session() {
        let dir = tempfile::tempdir().unwrap();
        let sent: SentPackets = Default::default();
        let (publisher, _log, _buffer) =
            test_publisher(test_config(1400, 64), &dir.path().join("foo.moldlog"), sent.clone());

        paused_rt().block_on(async move {
            publisher.send_message(b"message01").await.unwrap();
            publisher.close().await.unwrap();

            let sent = sent.lock().unwrap();
            assert_eq!(sent.len(), 2);

            let data = parse(&sent[0]);
            assert_eq!(payloads_of(&data), vec![b"message01".to_vec()]);

            let eos = parse(&sent[1]);
            assert!(eos.is_end_of_session());
            assert_eq!(eos.header.next_expected, SequenceNumber::from_raw(2));
        });
    }

    #[test]
    fn test_restart_against_existing_log_resumes_sequencing() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("foo.moldlog");

        let sent: SentPackets = Default::default();
        let (publisher, _log, _buffer) = test_publisher(test_config(1400, 64), &log_path, sent.clone());
        paused_rt().block_on(async move {
            for i in 1..=12u8 {
                publisher.send_message(format!("message{:02}", i).as_bytes()).await.unwrap();
            }
            publisher.flush().await.unwrap();
        });

        // a new publisher over the same log continues where the old one stopped
        let sent: SentPackets = Default::default();
        let (publisher, _log, _buffer) = test_publisher(test_config(1400, 64), &log_path, sent.clone());
        paused_rt().block_on(async move {
            assert_eq!(publisher.next_seq().await, SequenceNumber::from_raw(13));

            publisher.send_message(b"message13").await.unwrap();
            publisher.flush().await.unwrap();

            let sent = sent.lock().unwrap();
            let packet = parse(&sent[0]);
            assert_eq!(packet.header.next_expected, SequenceNumber::from_raw(13));
            assert_eq!(payloads_of(&packet), vec![b"message13".to_vec()]);
        });
    }

    #[test]
    fn test_failed_stream_rejects_submissions_until_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let sent: SentPackets = Default::default();
        let (publisher, _log, _buffer) =
            test_publisher(test_config(1400, 64), &dir.path().join("foo.moldlog"), sent.clone());

        paused_rt().block_on(async move {
            publisher.inner.write().await.failed = true;

            assert!(matches!(
                publisher.send_message(b"message01").await,
                Err(SubmitError::StreamFailed)
            ));

            publisher.restart().await.unwrap();
            publisher.send_message(b"message01").await.unwrap();
            publisher.flush().await.unwrap();

            assert_eq!(sent.lock().unwrap().len(), 1);
            assert_eq!(publisher.next_seq().await, SequenceNumber::from_raw(2));
        });
    }

    #[test]
    fn test_send_failure_is_transient_and_consumes_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = MockDatagramSink::new();
        sink.expect_send_datagram()
            .returning(|_, _| Err(std::io::Error::from(std::io::ErrorKind::WouldBlock)));
        let (publisher, log, _buffer) = test_publisher_with_sink(
            test_config(1400, 64), &dir.path().join("foo.moldlog"), Arc::new(sink));

        paused_rt().block_on(async move {
            publisher.send_message(b"message01").await.unwrap();
            publisher.flush().await.unwrap();

            // the packet counts as transmitted: the log has it and sequencing moved on
            assert_eq!(publisher.next_seq().await, SequenceNumber::from_raw(2));
            assert_eq!(log.read().unwrap().last_written(), SequenceNumber::from_raw(1));
        });
    }

    #[test]
    fn test_sequences_stay_gap_free_across_many_batches() {
        let dir = tempfile::tempdir().unwrap();
        let sent: SentPackets = Default::default();
        let (publisher, _log, _buffer) =
            test_publisher(test_config(64, 3), &dir.path().join("foo.moldlog"), sent.clone());

        paused_rt().block_on(async move {
            for i in 0..100u32 {
                let payload = format!("m{:04}", i);
                publisher.send_message(payload.as_bytes()).await.unwrap();
            }
            publisher.flush().await.unwrap();

            let sent = sent.lock().unwrap();
            let mut expected_seq = 1u64;
            let mut received = Vec::new();
            for raw in sent.iter() {
                let packet = parse(raw);
                assert!(raw.len() <= 64);
                assert_eq!(packet.header.next_expected, SequenceNumber::from_raw(expected_seq));
                expected_seq += packet.messages.len() as u64;
                received.extend(payloads_of(&packet));
            }
            assert_eq!(expected_seq, 101);
            assert_eq!(received, (0..100u32).map(|i| format!("m{:04}", i).into_bytes()).collect::<Vec<_>>());
        });
    }
}
