//! Framed codec for the control connection.
//!
//! Uses LengthDelimitedCodec for framing + serde_json for serialization.
//! Works over any AsyncRead/AsyncWrite (TCP sockets, in-memory pipes).
//!
//! Decode failures are yielded as items (`Result<T, serde_json::Error>`)
//! rather than codec errors: `FramedRead` latches any codec error and ends
//! the stream on the next poll, and a malformed frame has to leave the
//! connection usable. The framing layer has already consumed the frame at
//! that point, so the stream stays synchronized. Transport I/O failures
//! still surface as codec errors and end the stream.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Codec that frames messages with a 4-byte length prefix and serializes
/// with JSON.
pub struct JsonCodec<T> {
    inner: LengthDelimitedCodec,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .new_codec(),
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = Result<T, serde_json::Error>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes))),
            None => Ok(None),
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(json_size_bytes = json.len(), "Encoding frame");
        self.inner.encode(Bytes::from(json), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::protocol::{CMD_RIP, CMD_SCAN, Envelope};
    use serde_json::json;
    use tokio_util::bytes::BufMut;

    #[test]
    fn codec_roundtrip_envelope() {
        let mut codec = JsonCodec::<Envelope>::new();
        let mut buf = BytesMut::new();

        let env = Envelope::new(CMD_RIP, json!([{"track": 1, "filename": "out.vob"}]));
        codec.encode(env.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap().unwrap();

        assert_eq!(decoded, env);
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_decodes_frames_in_order() {
        let mut codec = JsonCodec::<Envelope>::new();
        let mut buf = BytesMut::new();

        codec.encode(Envelope::empty(CMD_SCAN), &mut buf).unwrap();
        codec
            .encode(Envelope::error("first in, first out"), &mut buf)
            .unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap().cmd, "scan");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap().cmd, "error");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn partial_frame_decodes_to_none() {
        let mut codec = JsonCodec::<Envelope>::new();
        let mut buf = BytesMut::new();
        codec.encode(Envelope::empty(CMD_SCAN), &mut buf).unwrap();

        let partial_len = buf.len() - 3;
        let mut partial = BytesMut::from(&buf[..partial_len]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn malformed_frame_yields_error_value_and_stream_continues() {
        let mut codec = JsonCodec::<Envelope>::new();

        let garbage = b"not a json envelope";
        let mut buf = BytesMut::new();
        buf.put_u32(garbage.len() as u32);
        buf.extend_from_slice(garbage);
        codec.encode(Envelope::empty(CMD_SCAN), &mut buf).unwrap();

        assert!(codec.decode(&mut buf).unwrap().unwrap().is_err());
        let next = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(next.cmd, "scan");
    }
}
