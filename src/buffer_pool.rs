use std::sync::Mutex;

use bytes::BytesMut;
use tracing::trace;

/// Pool of reusable packet buffers, sized to the stream's MTU so that assembling a packet
///  does not allocate on the hot path. Checking a buffer back in doubles as the last line
///  of defence for the packet-size invariant: nothing larger than `max_packet_len` may
///  ever have been assembled in it.
pub struct PacketBufferPool {
    max_packet_len: usize,
    max_pooled: usize,
    free: Mutex<Vec<BytesMut>>,
}

impl PacketBufferPool {
    pub fn new(max_packet_len: usize, max_pooled: usize) -> PacketBufferPool {
        PacketBufferPool {
            max_packet_len,
            max_pooled,
            free: Mutex::new(Vec::new()),
        }
    }

    /// An empty buffer with room for one packet. Falls back to a fresh allocation when the
    ///  pool is drained, e.g. while many recovery replies are in flight at once.
    pub fn checkout(&self) -> BytesMut {
        if let Some(buffer) = self.free.lock().unwrap().pop() {
            return buffer;
        }

        trace!("packet buffer pool drained - allocating a new {} byte buffer", self.max_packet_len);
        BytesMut::with_capacity(self.max_packet_len)
    }

    /// Hands a packet buffer back for reuse. Buffers in excess of `max_pooled` are dropped.
    ///
    /// Panics if the buffer held a packet larger than the MTU: such a packet can only come
    ///  from a packing bug, and it may already have been fragmented on the wire.
    pub fn release(&self, mut buffer: BytesMut) {
        assert!(buffer.len() <= self.max_packet_len,
                "a packet of {} bytes was assembled, exceeding the {} byte MTU",
                buffer.len(), self.max_packet_len);

        buffer.clear();

        let mut free = self.free.lock().unwrap();
        if free.len() < self.max_pooled {
            free.push(buffer);
        }
    }
}
