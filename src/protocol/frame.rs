//! Length-prefixed frames.
//!
//! A frame is a 4-byte big-endian payload length followed by the payload
//! (UTF-8 JSON). Empty payloads are legal.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Encoder, LengthDelimitedCodec};

use crate::error::Result;

/// Size of the length prefix.
pub const PREFIX_LEN: usize = 4;

/// Largest payload accepted in one frame.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Codec that writes (and reads) 4-byte big-endian length-prefixed frames.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(PREFIX_LEN)
        .big_endian()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Append one frame for `payload` to `dst`.
pub fn encode(payload: impl Into<Bytes>, dst: &mut BytesMut) -> Result<()> {
    codec().encode(payload.into(), dst)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::codec::Decoder;

    #[test]
    fn test_frame_is_prefix_plus_payload() {
        let mut buf = BytesMut::new();
        encode(r#"{"type":"query"}"#, &mut buf).unwrap();
        assert_eq!(buf.len(), PREFIX_LEN + 16);
        assert_eq!(&buf[..4], &[0, 0, 0, 16]);
        assert_eq!(&buf[4..], br#"{"type":"query"}"#);
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = BytesMut::new();
        encode(Bytes::new(), &mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_prefix_is_big_endian() {
        let mut buf = BytesMut::new();
        encode(vec![b'x'; 0x0102], &mut buf).unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0x01, 0x02]);
        assert_eq!(buf.len(), PREFIX_LEN + 0x0102);
    }

    #[test]
    fn test_frames_concatenate_and_decode() {
        let mut buf = BytesMut::new();
        encode("a", &mut buf).unwrap();
        encode("", &mut buf).unwrap();
        encode("bc", &mut buf).unwrap();
        assert_eq!(buf.len(), 5 + 4 + 6);

        let mut codec = codec();
        let frames: Vec<Vec<u8>> = std::iter::from_fn(|| codec.decode(&mut buf).unwrap())
            .map(|frame| frame.to_vec())
            .collect();
        assert_eq!(frames, vec![b"a".to_vec(), Vec::new(), b"bc".to_vec()]);
    }
}
