//! The service registry and dispatcher (§4.5): maps `/Package.Service/Method`
//! to a handler, builds the per-stream [`Call`]/[`Context`], then hands
//! control to the transport-agnostic `Routes` [`tower_service::Service`].

pub mod service;

mod grpc;
pub use self::grpc::Grpc;

use crate::body::BoxBody;
use crate::call::{Call, Shape};
use crate::context::Context;
use crate::interceptor::{CallInfo, StreamingInterceptor};
use crate::metadata::{MetadataMap, GRPC_CONTENT_TYPE};
use crate::transport::service::parse_grpc_timeout;
use crate::Status;
use http_body::Body;
use std::{
    collections::HashMap,
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
    time::Duration,
};
use tower_service::Service;

/// A handler group that self-reports the path prefix it serves under
/// (`"/package.Service"`), the way a code generator would stamp it onto a
/// generated server stub.
pub trait NamedService {
    const NAME: &'static str;
}

type BoxHandler = Box<
    dyn Fn(http::Request<BoxBody>, Call) -> Pin<Box<dyn Future<Output = http::Response<BoxBody>> + Send>>
        + Send
        + Sync,
>;

/// Collects `(path, handler)` pairs at startup; compiled into a read-only
/// [`Routes`] once building is done, matching §4.5's "read-only after
/// startup, no locks on the dispatch path".
#[derive(Default)]
pub struct Router {
    routes: HashMap<String, (Shape, BoxHandler)>,
    default_timeout: Option<Duration>,
    stream_interceptors: Vec<Arc<dyn StreamingInterceptor>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// A default deadline applied when the caller sends no `grpc-timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Registers a streaming interceptor / stats handler (§4.6, §6
    /// `stream_interceptor`) that observes every call dispatched through this
    /// router, regardless of the per-method message types. Unlike
    /// [`crate::interceptor::UnaryInterceptor`], which is generic over the
    /// decoded request/response and so is configured per-route on that
    /// route's own [`Grpc`] instead, a `StreamingInterceptor` only ever sees
    /// [`CallInfo`] and byte counts, so one registration here covers the
    /// whole service.
    pub fn stream_interceptor(mut self, interceptor: Arc<dyn StreamingInterceptor>) -> Self {
        self.stream_interceptors.push(interceptor);
        self
    }

    /// Registers one method's handler at the given full path
    /// (`/package.Service/Method`) and RPC shape. Generated server stubs are
    /// the intended caller; this is the seam they target.
    pub fn route<F, Fut>(mut self, path: impl Into<String>, shape: Shape, handler: F) -> Self
    where
        F: Fn(http::Request<BoxBody>, Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = http::Response<BoxBody>> + Send + 'static,
    {
        self.routes
            .insert(path.into(), (shape, Box::new(move |req, call| Box::pin(handler(req, call)))));
        self
    }

    pub fn build(self) -> Routes {
        Routes {
            routes: self.routes.into(),
            default_timeout: self.default_timeout,
            stream_interceptors: self.stream_interceptors.into(),
        }
    }
}

/// The compiled dispatcher: a plain [`tower_service::Service`] over
/// HTTP/2 request/response pairs, independent of any particular transport.
#[derive(Clone)]
pub struct Routes {
    routes: std::sync::Arc<HashMap<String, (Shape, BoxHandler)>>,
    default_timeout: Option<Duration>,
    stream_interceptors: std::sync::Arc<[Arc<dyn StreamingInterceptor>]>,
}

impl Routes {
    /// Parses `:path`, validates `content-type`, derives the [`Context`]
    /// from headers, and dispatches to the matching handler (§4.5).
    pub async fn dispatch<B>(&self, request: http::Request<B>) -> http::Response<BoxBody>
    where
        B: Body<Data = bytes::Bytes> + Send + 'static,
        B::Error: Into<crate::BoxError> + Send,
    {
        let path = request.uri().path().to_owned();

        let Some((shape, handler)) = self.routes.get(&path) else {
            tracing::debug!(%path, "no route registered for method");
            return Status::unimplemented(format!("unknown method {path}")).to_http();
        };

        if !content_type_is_grpc(request.headers()) {
            tracing::debug!(%path, "rejecting request with non-grpc content-type");
            let mut response = Status::unknown("content-type must start with application/grpc").to_http();
            *response.status_mut() = http::StatusCode::UNSUPPORTED_MEDIA_TYPE;
            return response;
        }

        let context = context_from_headers(request.headers(), self.default_timeout);
        let call = Call::new(leak_path(path), *shape, context);

        if !self.stream_interceptors.is_empty() {
            let info = CallInfo {
                method: call.method,
                is_client_streaming: shape.client_streams(),
                is_server_streaming: shape.server_streams(),
            };
            for interceptor in self.stream_interceptors.iter() {
                interceptor.new_stream(&info);
            }
        }

        let request = request.map(crate::body::boxed);
        handler(request, call).await
    }
}

impl fmt::Debug for Routes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Routes").field("methods", &self.routes.len()).finish()
    }
}

impl<B> Service<http::Request<B>> for Routes
where
    B: Body<Data = bytes::Bytes> + Send + 'static,
    B::Error: Into<crate::BoxError> + Send,
{
    type Response = http::Response<BoxBody>;
    type Error = std::convert::Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.dispatch(request).await) })
    }
}

fn content_type_is_grpc(headers: &http::HeaderMap) -> bool {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with(GRPC_CONTENT_TYPE))
}

/// Builds the call's root [`Context`] from inbound headers: a `grpc-timeout`
/// deadline (falling back to the server's configured default) plus the
/// caller's metadata (§4.10).
fn context_from_headers(headers: &http::HeaderMap, default_timeout: Option<Duration>) -> Context {
    let header_timeout = parse_grpc_timeout(headers).unwrap_or_else(|e| {
        tracing::trace!("error parsing grpc-timeout header {:?}", e);
        None
    });
    let timeout = header_timeout.or(default_timeout);

    let context = Context::with_metadata(MetadataMap::from_headers(headers.clone()));
    match timeout {
        Some(timeout) => context.with_timeout(timeout),
        None => context,
    }
}

/// Routes are stored once and live for the server's lifetime, so leaking the
/// path string to get a `&'static str` for [`Call::method`] is a bounded,
/// one-time cost per registered method, not per request.
fn leak_path(path: String) -> &'static str {
    Box::leak(path.into_boxed_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::empty_body;

    #[tokio::test]
    async fn unknown_method_is_trailer_only_unimplemented() {
        let routes = Router::new().build();
        let request = http::Request::builder()
            .uri("/foo.Bar/Missing")
            .header(http::header::CONTENT_TYPE, GRPC_CONTENT_TYPE)
            .body(empty_body())
            .unwrap();

        let response = routes.dispatch(request).await;
        let status = Status::from_header_map(response.headers()).unwrap();
        assert_eq!(status.code(), crate::Code::Unimplemented);
    }

    #[tokio::test]
    async fn bad_content_type_is_rejected_with_415() {
        let routes = Router::new()
            .route("/a/B", Shape::Unary, |_req, _call| async {
                Status::ok().to_http()
            })
            .build();

        let request = http::Request::builder()
            .uri("/a/B")
            .header(http::header::CONTENT_TYPE, "text/plain")
            .body(empty_body())
            .unwrap();

        let response = routes.dispatch(request).await;
        assert_eq!(response.status(), http::StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn known_method_dispatches_to_handler() {
        let routes = Router::new()
            .route("/a/B", Shape::Unary, |_req, _call| async {
                Status::ok().to_http()
            })
            .build();

        let request = http::Request::builder()
            .uri("/a/B")
            .header(http::header::CONTENT_TYPE, GRPC_CONTENT_TYPE)
            .body(empty_body())
            .unwrap();

        let response = routes.dispatch(request).await;
        let status = Status::from_header_map(response.headers()).unwrap();
        assert_eq!(status.code(), crate::Code::Ok);
    }
}
