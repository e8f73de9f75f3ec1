//! Pure, stateless MoldUDP64 codec: downstream packet headers, message blocks, heartbeat /
//!  end-of-session sentinels and recovery requests. See the crate documentation for the
//!  wire layout.

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::SubmitError;
use crate::safe_converter::{PrecheckedCast, SafeCast};
use crate::seq::SequenceNumber;
use crate::stream_name::StreamName;

/// stream name + next expected sequence + message count
pub const PACKET_HEADER_LEN: usize = 20;
/// the 2-byte big-endian length prefix in front of every message payload
pub const MESSAGE_PREFIX_LEN: usize = 2;

pub const MESSAGE_COUNT_HEARTBEAT: u16 = 0xFFFF;
pub const MESSAGE_COUNT_END_OF_SESSION: u16 = 0x0000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownstreamHeader {
    pub stream: StreamName,
    pub next_expected: SequenceNumber,
    pub message_count: u16,
}

impl DownstreamHeader {
    pub fn ser(&self, buf: &mut BytesMut) {
        self.stream.ser(buf);
        buf.put_u64(self.next_expected.to_raw());
        buf.put_u16(self.message_count);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<DownstreamHeader> {
        let stream = StreamName::deser(buf)?;
        let next_expected = SequenceNumber::from_raw(buf.try_get_u64()?);
        let message_count = buf.try_get_u16()?;
        Ok(DownstreamHeader {
            stream,
            next_expected,
            message_count,
        })
    }
}

/// A fully parsed downstream packet. Heartbeat and end-of-session packets parse with an
///  empty message list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownstreamPacket {
    pub header: DownstreamHeader,
    pub messages: Vec<Bytes>,
}

impl DownstreamPacket {
    pub fn is_heartbeat(&self) -> bool {
        self.header.message_count == MESSAGE_COUNT_HEARTBEAT
    }

    pub fn is_end_of_session(&self) -> bool {
        self.header.message_count == MESSAGE_COUNT_END_OF_SESSION
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<DownstreamPacket> {
        let header = DownstreamHeader::deser(buf)?;

        let num_messages = match header.message_count {
            MESSAGE_COUNT_HEARTBEAT | MESSAGE_COUNT_END_OF_SESSION => 0,
            n => n.safe_cast(),
        };

        let mut messages = Vec::with_capacity(num_messages);
        for _ in 0..num_messages {
            let message_len: usize = buf.try_get_u16()?.safe_cast();
            if buf.remaining() < message_len {
                bail!("message block is truncated");
            }
            messages.push(buf.copy_to_bytes(message_len));
        }

        if buf.has_remaining() {
            bail!("trailing bytes after the last message block");
        }

        Ok(DownstreamPacket { header, messages })
    }
}

/// A request for the messages `[start, start + count)`, received on the recovery port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveryRequest {
    pub stream: StreamName,
    pub start: SequenceNumber,
    pub count: u16,
}

impl RecoveryRequest {
    pub const SERIALIZED_LEN: usize = 20;

    pub fn ser(&self, buf: &mut BytesMut) {
        self.stream.ser(buf);
        buf.put_u64(self.start.to_raw());
        buf.put_u16(self.count);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<RecoveryRequest> {
        if buf.remaining() != Self::SERIALIZED_LEN {
            bail!("recovery request must be exactly {} bytes", Self::SERIALIZED_LEN);
        }
        let stream = StreamName::deser(buf)?;
        let start = SequenceNumber::from_raw(buf.try_get_u64()?);
        let count = buf.try_get_u16()?;
        Ok(RecoveryRequest { stream, start, count })
    }
}

/// Length-prefixes a payload, yielding the encoded message that is sent, logged and
///  served by recovery. This is the only place where the per-message size limit is
///  enforced.
pub fn encode_message(payload: &[u8], max_message_len: usize) -> Result<Bytes, SubmitError> {
    let max = max_message_len.min(u16::MAX as usize);
    if payload.len() > max {
        return Err(SubmitError::MessageTooLarge {
            len: payload.len(),
            max,
        });
    }

    let mut buf = BytesMut::with_capacity(MESSAGE_PREFIX_LEN + payload.len());
    buf.put_u16(payload.len().prechecked_cast());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Concatenates header and encoded messages into `buf`. The caller guarantees that the
///  total stays within the MTU.
pub fn pack_packet(
    buf: &mut BytesMut,
    stream: StreamName,
    next_expected: SequenceNumber,
    messages: &[Bytes],
) {
    DownstreamHeader {
        stream,
        next_expected,
        message_count: messages.len().prechecked_cast(),
    }
    .ser(buf);

    for message in messages {
        buf.put_slice(message);
    }
}

pub fn pack_heartbeat(buf: &mut BytesMut, stream: StreamName, next_expected: SequenceNumber) {
    DownstreamHeader {
        stream,
        next_expected,
        message_count: MESSAGE_COUNT_HEARTBEAT,
    }
    .ser(buf);
}

pub fn pack_end_of_session(buf: &mut BytesMut, stream: StreamName, next_expected: SequenceNumber) {
    DownstreamHeader {
        stream,
        next_expected,
        message_count: MESSAGE_COUNT_END_OF_SESSION,
    }
    .ser(buf);
}

/// The size a packet would have after appending a message with the given payload length:
///  the per-message cost is the length prefix plus the payload, and the first message
///  additionally pays for the packet header.
pub fn projected_packet_size(current_size: usize, next_payload_len: usize) -> usize {
    if current_size > 0 {
        current_size + MESSAGE_PREFIX_LEN + next_payload_len
    } else {
        PACKET_HEADER_LEN + MESSAGE_PREFIX_LEN + next_payload_len
    }
}
