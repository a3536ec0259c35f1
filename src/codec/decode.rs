use super::compression::{decompress, CompressionEncoding};
use super::{DecodeBuf, Decoder, HEADER_SIZE};
use crate::body::BoxBody;
use crate::metadata::MetadataMap;
use crate::{Code, Status};
use bytes::{Buf, BufMut, BytesMut};
use http_body::Body;
use http_body_util::BodyExt;
use std::{
    fmt,
    pin::Pin,
    task::{ready, Context, Poll},
};
use tokio_stream::Stream;
use tracing::{debug, trace};

const BUFFER_SIZE: usize = 8 * 1024;

/// A maximum message size before frames are rejected with
/// `RESOURCE_EXHAUSTED` (§4.1).
#[derive(Debug, Clone, Copy)]
pub(crate) struct MessageSizeLimits {
    pub(crate) max_receive: Option<usize>,
}

impl Default for MessageSizeLimits {
    fn default() -> Self {
        Self { max_receive: None }
    }
}

/// The decoded message stream for a request or response body.
///
/// Wraps an inner HTTP body plus a [`Decoder`], splitting it into
/// length-prefixed frames (§4.1) and exposing both the message stream and
/// the trailing metadata once it's been fully drained.
pub struct Streaming<T> {
    decoder: Box<dyn Decoder<Item = T, Error = Status> + Send + 'static>,
    body: BoxBody,
    state: State,
    direction: Direction,
    buf: BytesMut,
    trailers: Option<MetadataMap>,
    decompress_buf: BytesMut,
    encoding: Option<CompressionEncoding>,
    limits: MessageSizeLimits,
}

impl<T> Unpin for Streaming<T> {}

#[derive(Debug)]
enum State {
    ReadHeader,
    ReadBody { compression: bool, len: usize },
    Error,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Request,
    Response,
}

impl<T> Streaming<T> {
    pub(crate) fn new_request<D>(
        decoder: D,
        body: BoxBody,
        encoding: Option<CompressionEncoding>,
    ) -> Self
    where
        D: Decoder<Item = T, Error = Status> + Send + 'static,
    {
        Self::new_request_with_limits(decoder, body, encoding, MessageSizeLimits::default())
    }

    pub(crate) fn new_request_with_limits<D>(
        decoder: D,
        body: BoxBody,
        encoding: Option<CompressionEncoding>,
        limits: MessageSizeLimits,
    ) -> Self
    where
        D: Decoder<Item = T, Error = Status> + Send + 'static,
    {
        Self::new(decoder, body, Direction::Request, encoding, limits)
    }

    pub(crate) fn new_response<D>(
        decoder: D,
        body: BoxBody,
        encoding: Option<CompressionEncoding>,
        limits: MessageSizeLimits,
    ) -> Self
    where
        D: Decoder<Item = T, Error = Status> + Send + 'static,
    {
        Self::new(decoder, body, Direction::Response, encoding, limits)
    }

    fn new<D>(
        decoder: D,
        body: BoxBody,
        direction: Direction,
        encoding: Option<CompressionEncoding>,
        limits: MessageSizeLimits,
    ) -> Self
    where
        D: Decoder<Item = T, Error = Status> + Send + 'static,
    {
        Self {
            decoder: Box::new(decoder),
            body,
            state: State::ReadHeader,
            direction,
            buf: BytesMut::with_capacity(BUFFER_SIZE),
            trailers: None,
            decompress_buf: BytesMut::new(),
            encoding,
            limits,
        }
    }

    /// Fetches the next message from this stream.
    pub async fn message(&mut self) -> Result<Option<T>, Status> {
        match std::future::poll_fn(|cx| Pin::new(&mut *self).poll_next(cx)).await {
            Some(Ok(m)) => Ok(Some(m)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Fetches the trailing metadata, draining any unread messages first.
    pub async fn trailers(&mut self) -> Result<Option<MetadataMap>, Status> {
        if let Some(trailers) = self.trailers.take() {
            return Ok(Some(trailers));
        }
        while self.message().await?.is_some() {}
        if let Some(trailers) = self.trailers.take() {
            return Ok(Some(trailers));
        }
        let frame = std::future::poll_fn(|cx| Pin::new(&mut self.body).poll_frame(cx)).await;
        match frame {
            Some(Ok(frame)) => Ok(frame
                .into_trailers()
                .ok()
                .map(MetadataMap::from_headers)),
            Some(Err(status)) => Err(status),
            None => Ok(None),
        }
    }

    fn decode_chunk(&mut self) -> Result<Option<T>, Status> {
        if let State::ReadHeader = self.state {
            if self.buf.remaining() < HEADER_SIZE {
                return Ok(None);
            }

            let is_compressed = match self.buf.get_u8() {
                0 => false,
                1 => {
                    if self.encoding.is_none() {
                        return Err(Status::new(
                            Code::Internal,
                            "protocol error: received message with compressed-flag but no grpc-encoding was specified",
                        ));
                    }
                    true
                }
                f => {
                    trace!("unexpected compression flag: {f}");
                    return Err(Status::new(
                        Code::Internal,
                        format!(
                            "protocol error: received message with invalid compression flag: {f} (valid flags are 0 and 1)"
                        ),
                    ));
                }
            };
            let len = self.buf.get_u32() as usize;

            if let Some(max) = self.limits.max_receive {
                if len > max {
                    self.state = State::Error;
                    return Err(Status::new(
                        Code::ResourceExhausted,
                        format!("message length {len} exceeds max_receive_message_size {max}"),
                    ));
                }
            }

            self.buf.reserve(len);
            self.state = State::ReadBody {
                compression: is_compressed,
                len,
            };
        }

        if let State::ReadBody { len, compression } = &self.state {
            if self.buf.remaining() < *len || self.buf.len() < *len {
                return Ok(None);
            }

            let decoding_result = if *compression {
                self.decompress_buf.clear();
                if let Err(err) = decompress(
                    self.encoding
                        .expect("checked when the compression flag was read"),
                    &mut self.buf,
                    &mut self.decompress_buf,
                    *len,
                ) {
                    return Err(Status::new(
                        Code::Internal,
                        format!("error decompressing message: {err}"),
                    ));
                }
                let decompressed_len = self.decompress_buf.len();
                self.decoder
                    .decode(&mut DecodeBuf::new(&mut self.decompress_buf, decompressed_len))
            } else {
                self.decoder.decode(&mut DecodeBuf::new(&mut self.buf, *len))
            };

            return match decoding_result {
                Ok(Some(msg)) => {
                    self.state = State::ReadHeader;
                    Ok(Some(msg))
                }
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            };
        }

        Ok(None)
    }
}

impl<T> Stream for Streaming<T> {
    type Item = Result<T, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let State::Error = &self.state {
                return Poll::Ready(None);
            }

            if let Some(item) = self.decode_chunk()? {
                return Poll::Ready(Some(Ok(item)));
            }

            let frame = match ready!(Pin::new(&mut self.body).poll_frame(cx)) {
                Some(Ok(frame)) => frame,
                Some(Err(status)) => {
                    self.state = State::Error;
                    debug!("decoder inner stream error: {:?}", status);
                    return Poll::Ready(Some(Err(status)));
                }
                None => {
                    if self.buf.has_remaining() {
                        trace!("unexpected EOF decoding stream");
                        return Poll::Ready(Some(Err(Status::new(
                            Code::Internal,
                            "unexpected EOF decoding stream",
                        ))));
                    }
                    return Poll::Ready(None);
                }
            };

            match frame.into_data() {
                Ok(data) => self.buf.put(data),
                Err(frame) => {
                    if let Ok(trailers) = frame.into_trailers() {
                        if matches!(self.direction, Direction::Response) {
                            if let Some(status) = Status::from_header_map(&trailers) {
                                if status.code() != Code::Ok {
                                    return Poll::Ready(Some(Err(status)));
                                }
                            }
                        }
                        self.trailers = Some(MetadataMap::from_headers(trailers));
                    }
                }
            }
        }
    }
}

impl<T> fmt::Debug for Streaming<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Streaming").finish()
    }
}

#[cfg(test)]
static_assertions::assert_impl_all!(Streaming<()>: Send);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::boxed;
    use crate::codec::BytesCodec;
    use http_body_util::{combinators::BoxBody as UtilBoxBody, BodyExt, StreamBody};
    use bytes::Bytes;

    fn frame_bytes(payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u8(0);
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(payload);
        buf.freeze()
    }

    #[tokio::test]
    async fn decodes_one_frame() {
        let data = frame_bytes(b"hello");
        let stream = tokio_stream::once(Ok::<_, std::convert::Infallible>(
            http_body::Frame::data(data),
        ));
        let body: UtilBoxBody<Bytes, Status> = boxed(StreamBody::new(stream));
        let mut streaming = Streaming::<Vec<u8>>::new_request(BytesCodec.decoder(), body, None);
        use crate::codec::Codec;
        let msg = streaming.message().await.unwrap().unwrap();
        assert_eq!(msg, b"hello");
        assert!(streaming.message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_resource_exhausted() {
        let data = frame_bytes(&vec![0u8; 64]);
        let stream = tokio_stream::once(Ok::<_, std::convert::Infallible>(
            http_body::Frame::data(data),
        ));
        let body: UtilBoxBody<Bytes, Status> = boxed(StreamBody::new(stream));
        use crate::codec::Codec;
        let mut streaming = Streaming::<Vec<u8>>::new_response(
            BytesCodec.decoder(),
            body,
            None,
            MessageSizeLimits { max_receive: Some(8) },
        );
        let err = streaming.message().await.unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);
    }
}
