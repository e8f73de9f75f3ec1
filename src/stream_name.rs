use std::fmt::{Display, Formatter};

use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};

/// The 10-byte ASCII stream identifier embedded in every packet, right-padded with
///  spaces (0x20). Longer caller-supplied identifiers are truncated, non-ASCII bytes
///  are replaced with '?' so the wire representation stays ASCII.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct StreamName([u8; 10]);

impl StreamName {
    pub const SERIALIZED_LEN: usize = 10;

    pub fn new(name: &str) -> StreamName {
        let mut raw = [b' '; 10];
        for (i, &b) in name.as_bytes().iter().take(10).enumerate() {
            raw[i] = if b.is_ascii() { b } else { b'?' };
        }
        StreamName(raw)
    }

    pub fn from_raw(raw: [u8; 10]) -> StreamName {
        StreamName(raw)
    }

    pub fn as_bytes(&self) -> &[u8; 10] {
        &self.0
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<StreamName> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            bail!("buffer too short for a stream name");
        }
        let mut raw = [0u8; 10];
        buf.copy_to_slice(&mut raw);
        Ok(StreamName(raw))
    }
}

impl Display for StreamName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0).trim_end_matches(' '))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::short("foo", *b"foo       ")]
    #[case::empty("", *b"          ")]
    #[case::exact("exactly10!", *b"exactly10!")]
    #[case::truncated("somewhat-too-long", *b"somewhat-t")]
    #[case::numeric("42", *b"42        ")]
    #[case::non_ascii("f\u{00e9}e", *b"f??e      ")]
    fn test_new(#[case] name: &str, #[case] expected: [u8; 10]) {
        assert_eq!(StreamName::new(name).as_bytes(), &expected);
    }

    #[rstest]
    #[case::padded("foo")]
    #[case::full("exactly10!")]
    fn test_ser_deser_round_trip(#[case] name: &str) {
        let original = StreamName::new(name);

        let mut buf = BytesMut::new();
        original.ser(&mut buf);
        assert_eq!(buf.len(), StreamName::SERIALIZED_LEN);

        let mut b: &[u8] = &buf;
        let deser = StreamName::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, original);
    }

    #[test]
    fn test_deser_too_short() {
        let mut b: &[u8] = &[1, 2, 3];
        assert!(StreamName::deser(&mut b).is_err());
    }

    #[test]
    fn test_display_trims_padding() {
        assert_eq!(StreamName::new("foo").to_string(), "foo");
    }
}
