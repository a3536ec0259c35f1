use super::compression::{compress, CompressionEncoding};
use super::{Encoder, HEADER_SIZE};
use crate::body::BoxBody;
use crate::Status;
use bytes::{BufMut, Bytes, BytesMut};
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_stream::{Stream, StreamExt};

const BUFFER_SIZE: usize = 8 * 1024;

/// Frames a stream of encoded response messages for the server side, per
/// §4.1's `[compressed][length][payload]` layout.
pub(crate) fn encode_server<E, S, T>(
    encoder: E,
    source: S,
    compression: Option<CompressionEncoding>,
) -> BoxBody
where
    E: Encoder<Item = T, Error = Status> + Send + 'static,
    S: Stream<Item = Result<T, Status>> + Send + 'static,
    T: Send + 'static,
{
    let stream = EncodedStream::new(encoder, source, compression).map(|result| match result {
        Ok(bytes) => Ok(Frame::data(bytes)),
        Err(status) => Err(status),
    });
    StreamBody::new(stream).boxed_unsync()
}

/// Frames a single outbound request/message for the client side.
pub(crate) fn encode_client<E, S, T>(
    encoder: E,
    source: S,
    compression: Option<CompressionEncoding>,
) -> BoxBody
where
    E: Encoder<Item = T, Error = Status> + Send + 'static,
    S: Stream<Item = Result<T, Status>> + Send + 'static,
    T: Send + 'static,
{
    encode_server(encoder, source, compression)
}

struct EncodedStream<E, S> {
    encoder: E,
    source: Pin<Box<S>>,
    compression: Option<CompressionEncoding>,
}

impl<E, S> EncodedStream<E, S> {
    fn new(encoder: E, source: S, compression: Option<CompressionEncoding>) -> Self {
        Self {
            encoder,
            source: Box::pin(source),
            compression,
        }
    }
}

impl<E, S, T> Stream for EncodedStream<E, S>
where
    E: Encoder<Item = T, Error = Status>,
    S: Stream<Item = Result<T, Status>>,
{
    type Item = Result<Bytes, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.source.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(item))) => {
                let mut payload = BytesMut::with_capacity(BUFFER_SIZE);
                if let Err(status) = this
                    .encoder
                    .encode(item, &mut super::EncodeBuf::new(&mut payload))
                {
                    return Poll::Ready(Some(Err(status)));
                }

                let (flag, payload) = match this.compression {
                    Some(encoding) => {
                        let mut compressed = BytesMut::new();
                        match compress(encoding, &mut payload, &mut compressed) {
                            Ok(()) => (1u8, compressed),
                            Err(e) => {
                                return Poll::Ready(Some(Err(Status::internal(format!(
                                    "error compressing message: {e}"
                                )))))
                            }
                        }
                    }
                    None => (0u8, payload),
                };

                let mut out = BytesMut::with_capacity(HEADER_SIZE + payload.len());
                out.put_u8(flag);
                out.put_u32(payload.len() as u32);
                out.extend_from_slice(&payload);

                Poll::Ready(Some(Ok(out.freeze())))
            }
            Poll::Ready(Some(Err(status))) => Poll::Ready(Some(Err(status))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
static_assertions::assert_impl_all!(BoxBody: Send);
