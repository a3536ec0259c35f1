//! The message codec (§4.2) and length-prefixed framing (§4.1).

pub mod compression;
pub(crate) mod decode;
mod encode;

pub use self::compression::CompressionEncoding;
pub use self::decode::Streaming;
pub(crate) use self::decode::MessageSizeLimits;
pub(crate) use self::encode::{encode_client, encode_server};

use bytes::{Buf, BufMut, BytesMut};
use std::ops::{Deref, DerefMut};

/// A `[compressed:1][length:4][payload]` frame carries a payload of at most
/// this size in the length field before it is considered malformed; the
/// effective receive limit is further bounded by the configured
/// `max_receive_message_size`.
pub(crate) const HEADER_SIZE: usize = 5;

/// Encodes/decodes a single message value to/from its wire representation.
///
/// Implementations are produced by an external code generator for a given
/// `.proto` message type (§1 "Out of scope") or, for this crate's own tests,
/// hand-written.
pub trait Codec {
    type Encode: Send + 'static;
    type Decode: Send + 'static;

    type Encoder: Encoder<Item = Self::Encode, Error = crate::Status> + Send + 'static;
    type Decoder: Decoder<Item = Self::Decode, Error = crate::Status> + Send + 'static;

    fn encoder(&mut self) -> Self::Encoder;
    fn decoder(&mut self) -> Self::Decoder;
}

pub trait Encoder {
    type Item;
    type Error;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error>;
}

pub trait Decoder {
    type Item;
    type Error;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error>;
}

/// A cursor into the outgoing frame buffer handed to [`Encoder::encode`].
pub struct EncodeBuf<'a> {
    bytes: &'a mut BytesMut,
}

impl<'a> EncodeBuf<'a> {
    pub(crate) fn new(bytes: &'a mut BytesMut) -> Self {
        Self { bytes }
    }
}

impl Deref for EncodeBuf<'_> {
    type Target = BytesMut;
    fn deref(&self) -> &Self::Target {
        self.bytes
    }
}

impl DerefMut for EncodeBuf<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.bytes
    }
}

unsafe impl BufMut for EncodeBuf<'_> {
    fn remaining_mut(&self) -> usize {
        self.bytes.remaining_mut()
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        self.bytes.advance_mut(cnt)
    }

    fn chunk_mut(&mut self) -> &mut bytes::buf::UninitSlice {
        self.bytes.chunk_mut()
    }
}

/// A cursor into the incoming frame buffer handed to [`Decoder::decode`],
/// windowed to exactly one message's bytes.
pub struct DecodeBuf<'a> {
    bytes: &'a mut BytesMut,
    len: usize,
}

impl<'a> DecodeBuf<'a> {
    pub(crate) fn new(bytes: &'a mut BytesMut, len: usize) -> Self {
        Self { bytes, len }
    }
}

impl Deref for DecodeBuf<'_> {
    type Target = BytesMut;
    fn deref(&self) -> &Self::Target {
        self.bytes
    }
}

impl DerefMut for DecodeBuf<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.bytes
    }
}

impl Buf for DecodeBuf<'_> {
    fn remaining(&self) -> usize {
        self.len
    }

    fn chunk(&self) -> &[u8] {
        let chunk = Buf::chunk(self.bytes);
        if chunk.len() > self.len {
            &chunk[..self.len]
        } else {
            chunk
        }
    }

    fn advance(&mut self, cnt: usize) {
        assert!(cnt <= self.len);
        self.bytes.advance(cnt);
        self.len -= cnt;
    }
}

/// A trivial codec used by this crate's own tests, where the "message" is
/// simply a `Vec<u8>` (real usage binds a protobuf-generated codec via an
/// external code generator, per §1).
#[derive(Clone, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Encode = Vec<u8>;
    type Decode = Vec<u8>;
    type Encoder = BytesCodec;
    type Decoder = BytesCodec;

    fn encoder(&mut self) -> Self::Encoder {
        BytesCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        BytesCodec
    }
}

impl Encoder for BytesCodec {
    type Item = Vec<u8>;
    type Error = crate::Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put_slice(&item);
        Ok(())
    }
}

impl Decoder for BytesCodec {
    type Item = Vec<u8>;
    type Error = crate::Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let len = src.remaining();
        let mut out = vec![0u8; len];
        src.copy_to_slice(&mut out);
        Ok(Some(out))
    }
}
