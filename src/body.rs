//! The HTTP body types threaded through the transport boundary.
//!
//! `tonic-lite` never exposes the concrete body type from its HTTP/2 library
//! (§1: the transport is an external collaborator); handlers and the codec
//! layer only see `BoxBody`.

use bytes::Bytes;
use http_body::{Body as HttpBody, Frame};
use http_body_util::{combinators::BoxBody as UtilBoxBody, BodyExt, Empty, Full};
use std::pin::Pin;
use std::task::{Context, Poll};

/// A type-erased gRPC body: either request data flowing into the dispatcher
/// or the framed response stream flowing out of it.
pub type BoxBody = UtilBoxBody<Bytes, crate::Status>;

pub fn empty_body() -> BoxBody {
    Empty::new().map_err(|err: std::convert::Infallible| match err {}).boxed_unsync()
}

pub fn boxed<B>(body: B) -> BoxBody
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<crate::BoxError>,
{
    body.map_err(|e| crate::Status::from_error(e.into())).boxed_unsync()
}

/// A concrete, reusable body over a single buffer — used for unary request
/// bodies built without going through the transport layer (e.g. tests).
pub struct Body {
    inner: UtilBoxBody<Bytes, crate::BoxError>,
}

impl Body {
    pub fn empty() -> Self {
        Self {
            inner: Empty::new()
                .map_err(|err: std::convert::Infallible| match err {})
                .boxed_unsync(),
        }
    }

    pub fn from_bytes(bytes: Bytes) -> Self {
        Self {
            inner: Full::new(bytes)
                .map_err(|err: std::convert::Infallible| match err {})
                .boxed_unsync(),
        }
    }

    pub fn new<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<crate::BoxError>,
    {
        Self {
            inner: body.map_err(Into::into).boxed_unsync(),
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = crate::BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }
}
