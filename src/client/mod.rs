//! The client-side per-call dispatcher (the mirror image of
//! [`crate::server::Grpc`]) and the [`GrpcService`] seam a transport
//! implements to be driven by it.

mod grpc;
pub use self::grpc::Grpc;

use std::future::Future;
use std::task::{Context, Poll};

/// What a client [`Grpc`] needs from its transport: poll for capacity, then
/// send one HTTP/2 request and get back one response.
///
/// [`crate::transport::Channel`] implements this, and so does any bare
/// [`tower_service::Service`] with a compatible signature via the blanket
/// impl below — a raw `hyper` client included.
pub trait GrpcService<ReqBody>: Send {
    type ResponseBody: http_body::Body<Data = bytes::Bytes> + Send + 'static;
    type Error: Into<crate::BoxError>;
    type Future: Future<Output = Result<http::Response<Self::ResponseBody>, Self::Error>> + Send;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>>;
    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future;
}

impl<T, ReqBody, ResBody> GrpcService<ReqBody> for T
where
    T: tower_service::Service<http::Request<ReqBody>, Response = http::Response<ResBody>> + Send,
    T::Error: Into<crate::BoxError>,
    T::Future: Send,
    ResBody: http_body::Body<Data = bytes::Bytes> + Send + 'static,
{
    type ResponseBody = ResBody;
    type Error = T::Error;
    type Future = T::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        tower_service::Service::poll_ready(self, cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        tower_service::Service::call(self, request)
    }
}
