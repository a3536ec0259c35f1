//! End-to-end coverage driving a compiled [`Routes`] straight through
//! [`client::Grpc`], in-process with no real sockets: each scenario covers
//! one RPC shape plus the unknown-method and deadline edge cases.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_core::Stream;
use tower_service::Service as _;

use tonic_lite::call::status_for_cancel;
use tonic_lite::client::Grpc as ClientGrpc;
use tonic_lite::codec::{BytesCodec, Streaming};
use tonic_lite::interceptor::{BoxFuture, CallInfo, Next, UnaryInterceptor};
use tonic_lite::server::service::{ClientStreamingService, ServerStreamingService, StreamingService, UnaryService};
use tonic_lite::server::{Grpc as ServerGrpc, Router, Routes};
use tonic_lite::{Code, Context, Request, Response, Shape, Status};

fn origin() -> http::Uri {
    "http://localhost".parse().unwrap()
}

struct Echo;

impl UnaryService<Vec<u8>> for Echo {
    type Response = Vec<u8>;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Response<Vec<u8>>, Status>> + Send>>;

    fn call(&mut self, request: Request<Vec<u8>>) -> Self::Future {
        Box::pin(async move { Ok(Response::new(request.into_inner())) })
    }
}

struct ListFeatures;

impl ServerStreamingService<Vec<u8>> for ListFeatures {
    type Response = Vec<u8>;
    type ResponseStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, Status>> + Send>>;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Response<Self::ResponseStream>, Status>> + Send>>;

    fn call(&mut self, _request: Request<Vec<u8>>) -> Self::Future {
        Box::pin(async move {
            let features = vec![Ok(b"feature-a".to_vec()), Ok(b"feature-b".to_vec())];
            let stream: Self::ResponseStream = Box::pin(tokio_stream::iter(features));
            Ok(Response::new(stream))
        })
    }
}

struct RecordRoute;

impl ClientStreamingService<Vec<u8>> for RecordRoute {
    type Response = Vec<u8>;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Response<Vec<u8>>, Status>> + Send>>;

    fn call(&mut self, request: Request<Streaming<Vec<u8>>>) -> Self::Future {
        Box::pin(async move {
            let mut points = request.into_inner();
            let mut count: u32 = 0;
            while points.message().await?.is_some() {
                count += 1;
            }
            Ok(Response::new(count.to_be_bytes().to_vec()))
        })
    }
}

/// Each note is one byte of location followed by its body. The reply for a
/// note is the number of prior notes already seen at that same location, so
/// a client sending locations A, B, A sees replies 0, 0, 1.
struct RouteChat;

impl StreamingService<Vec<u8>> for RouteChat {
    type Response = Vec<u8>;
    type ResponseStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, Status>> + Send>>;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Response<Self::ResponseStream>, Status>> + Send>>;

    fn call(&mut self, request: Request<Streaming<Vec<u8>>>) -> Self::Future {
        Box::pin(async move {
            let mut notes = request.into_inner();
            let mut seen: HashMap<u8, u32> = HashMap::new();
            let mut replies = Vec::new();
            while let Some(note) = notes.message().await? {
                let location = *note.first().ok_or_else(|| Status::new(Code::Internal, "note missing location byte"))?;
                let prior = seen.entry(location).or_insert(0);
                replies.push(Ok(vec![*prior as u8]));
                *prior += 1;
            }
            let stream: Self::ResponseStream = Box::pin(tokio_stream::iter(replies));
            Ok(Response::new(stream))
        })
    }
}

/// Races its own deadline against a 200ms sleep; the dispatcher derives the
/// context's deadline from `grpc-timeout` but leaves enforcement to the
/// handler (`Grpc<T>::unary` never races `Context::cancelled` itself).
struct Sleepy;

impl UnaryService<Vec<u8>> for Sleepy {
    type Response = Vec<u8>;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Response<Vec<u8>>, Status>> + Send>>;

    fn call(&mut self, request: Request<Vec<u8>>) -> Self::Future {
        Box::pin(async move {
            let context = request
                .context()
                .cloned()
                .expect("the dispatcher always inserts a context before invoking a handler");
            tokio::select! {
                reason = context.cancelled() => Err(status_for_cancel(reason)),
                _ = tokio::time::sleep(Duration::from_millis(200)) => Ok(Response::new(request.into_inner())),
            }
        })
    }
}

fn build_routes() -> Routes {
    Router::new()
        .route("/test.Echo/Unary", Shape::Unary, |req, call| async move {
            ServerGrpc::new(BytesCodec).unary(Echo, req, call).await
        })
        .route("/test.Echo/ListFeatures", Shape::ServerStream, |req, call| async move {
            ServerGrpc::new(BytesCodec).server_streaming(ListFeatures, req, call).await
        })
        .route("/test.Echo/RecordRoute", Shape::ClientStream, |req, call| async move {
            ServerGrpc::new(BytesCodec).client_streaming(RecordRoute, req, call).await
        })
        .route("/test.Echo/RouteChat", Shape::BidiStream, |req, call| async move {
            ServerGrpc::new(BytesCodec).streaming(RouteChat, req, call).await
        })
        .route("/test.Echo/Sleepy", Shape::Unary, |req, call| async move {
            ServerGrpc::new(BytesCodec).unary(Sleepy, req, call).await
        })
        .build()
}

#[tokio::test]
async fn unary_echo_roundtrips_with_ok_status() {
    let mut client = ClientGrpc::new(build_routes(), origin());

    let response = client
        .unary(Request::new(b"hello".to_vec()), "/test.Echo/Unary".parse().unwrap(), BytesCodec)
        .await
        .expect("an echoed unary call reports grpc-status 0");

    assert_eq!(response.into_inner(), b"hello".to_vec());
}

#[tokio::test]
async fn server_streaming_delivers_messages_in_order_then_ok() {
    let mut client = ClientGrpc::new(build_routes(), origin());

    let response = client
        .server_streaming(Request::new(b"ignored".to_vec()), "/test.Echo/ListFeatures".parse().unwrap(), BytesCodec)
        .await
        .expect("server streaming call succeeds");

    let mut stream = response.into_inner();
    let first = stream.message().await.unwrap().unwrap();
    let second = stream.message().await.unwrap().unwrap();
    let end = stream.message().await.unwrap();

    assert_eq!(first, b"feature-a".to_vec());
    assert_eq!(second, b"feature-b".to_vec());
    assert!(end.is_none(), "the stream ends after exactly two messages");
}

#[tokio::test]
async fn client_streaming_counts_every_sent_point() {
    let mut client = ClientGrpc::new(build_routes(), origin());

    let points = tokio_stream::iter(vec![b"p1".to_vec(), b"p2".to_vec(), b"p3".to_vec()]);
    let response: Response<Vec<u8>> = client
        .client_streaming(Request::new(points), "/test.Echo/RecordRoute".parse().unwrap(), BytesCodec)
        .await
        .expect("client streaming call succeeds once the client half-closes");

    let count = u32::from_be_bytes(response.into_inner().try_into().unwrap());
    assert_eq!(count, 3);
}

#[tokio::test]
async fn bidi_chat_replies_with_prior_notes_seen_at_the_same_location() {
    let mut client = ClientGrpc::new(build_routes(), origin());

    const LOCATION_A: u8 = b'A';
    const LOCATION_B: u8 = b'B';
    let notes = tokio_stream::iter(vec![
        vec![LOCATION_A, b'1'],
        vec![LOCATION_B, b'2'],
        vec![LOCATION_A, b'3'],
    ]);

    let response = client
        .streaming(Request::new(notes), "/test.Echo/RouteChat".parse().unwrap(), BytesCodec)
        .await
        .expect("bidi streaming call succeeds");

    let mut stream = response.into_inner();
    let replies: Vec<u8> = [
        stream.message().await.unwrap().unwrap(),
        stream.message().await.unwrap().unwrap(),
        stream.message().await.unwrap().unwrap(),
    ]
    .into_iter()
    .map(|reply| reply[0])
    .collect();

    assert_eq!(replies, vec![0, 0, 1]);
    assert!(stream.message().await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_method_is_rejected_as_unimplemented() {
    let mut client = ClientGrpc::new(build_routes(), origin());

    let status = client
        .unary(Request::new(b"hello".to_vec()), "/foo.Bar/Missing".parse().unwrap(), BytesCodec)
        .await
        .expect_err("no route is registered for this method");

    assert_eq!(status.code(), Code::Unimplemented);
}

/// Stands in for a generated client stub writing its own `grpc-timeout`
/// header: wraps `Routes` and stamps every outgoing request with a fixed
/// timeout value before handing it to the dispatcher.
#[derive(Clone)]
struct WithGrpcTimeout {
    inner: Routes,
    header_value: &'static str,
}

impl tower_service::Service<http::Request<tonic_lite::body::BoxBody>> for WithGrpcTimeout {
    type Response = http::Response<tonic_lite::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = <Routes as tower_service::Service<http::Request<tonic_lite::body::BoxBody>>>::Future;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: http::Request<tonic_lite::body::BoxBody>) -> Self::Future {
        request
            .headers_mut()
            .insert("grpc-timeout", http::HeaderValue::from_static(self.header_value));
        self.inner.call(request)
    }
}

#[tokio::test]
async fn deadline_exceeded_cancels_a_handler_that_oversleeps_it() {
    let transport = WithGrpcTimeout {
        inner: build_routes(),
        header_value: "50m",
    };
    let mut client = ClientGrpc::new(transport, origin());

    let status = client
        .unary(Request::new(b"hello".to_vec()), "/test.Echo/Sleepy".parse().unwrap(), BytesCodec)
        .await
        .expect_err("the 200ms handler oversleeps the 50ms deadline");

    assert_eq!(status.code(), Code::DeadlineExceeded);
}

/// Counts every call it lets through, proving a registered
/// [`UnaryInterceptor`] actually runs in the live dispatch path rather than
/// sitting unused beside it.
struct CountingUnaryInterceptor(Arc<AtomicUsize>);

impl UnaryInterceptor<Vec<u8>, Vec<u8>> for CountingUnaryInterceptor {
    fn call<'a>(
        &'a self,
        ctx: Context,
        req: Request<Vec<u8>>,
        _info: &'a CallInfo,
        next: Next<Vec<u8>, Vec<u8>>,
    ) -> BoxFuture<'a, Result<(Context, Response<Vec<u8>>), Status>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Box::pin(next.call(ctx, req))
    }
}

#[tokio::test]
async fn unary_interceptor_runs_through_a_live_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let routes = Router::new()
        .route("/test.Echo/Unary", Shape::Unary, {
            let calls = calls.clone();
            move |req, call| {
                let calls = calls.clone();
                async move {
                    ServerGrpc::new(BytesCodec)
                        .unary_interceptor(Arc::new(CountingUnaryInterceptor(calls)))
                        .unary(Echo, req, call)
                        .await
                }
            }
        })
        .build();
    let mut client = ClientGrpc::new(routes, origin());

    let response = client
        .unary(Request::new(b"hello".to_vec()), "/test.Echo/Unary".parse().unwrap(), BytesCodec)
        .await
        .expect("the interceptor passes the call through to the handler");

    assert_eq!(response.into_inner(), b"hello".to_vec());
    assert_eq!(calls.load(Ordering::SeqCst), 1, "the registered interceptor must run exactly once");
}

/// Builds a raw gRPC-framed body with two request messages back to back and
/// dispatches it directly (bypassing `client::Grpc`, which can never itself
/// construct a second message for a unary call): a unary handler must reject
/// it with `INVALID_ARGUMENT` before ever running, not silently drain the
/// extra message as trailers.
fn frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(5 + payload.len());
    framed.push(0u8);
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(payload);
    framed
}

#[tokio::test]
async fn a_second_request_message_on_a_unary_call_is_rejected_before_the_handler_runs() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let routes = Router::new()
        .route("/test.Echo/Unary", Shape::Unary, {
            let invocations = invocations.clone();
            move |req, call| {
                let invocations = invocations.clone();
                async move {
                    struct CountingEcho(Arc<AtomicUsize>);
                    impl UnaryService<Vec<u8>> for CountingEcho {
                        type Response = Vec<u8>;
                        type Future = Pin<Box<dyn std::future::Future<Output = Result<Response<Vec<u8>>, Status>> + Send>>;
                        fn call(&mut self, request: Request<Vec<u8>>) -> Self::Future {
                            self.0.fetch_add(1, Ordering::SeqCst);
                            Box::pin(async move { Ok(Response::new(request.into_inner())) })
                        }
                    }
                    ServerGrpc::new(BytesCodec)
                        .unary(CountingEcho(invocations), req, call)
                        .await
                }
            }
        })
        .build();

    let mut body = frame(b"first");
    body.extend(frame(b"second"));

    let request = http::Request::builder()
        .uri("/test.Echo/Unary")
        .header(http::header::CONTENT_TYPE, "application/grpc")
        .body(tonic_lite::body::Body::from_bytes(bytes::Bytes::from(body)))
        .unwrap();

    let response = routes.dispatch(request).await;
    let status = Status::from_header_map(response.headers()).expect("a grpc-status header is always present");

    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(invocations.load(Ordering::SeqCst), 0, "the handler must never run once a second message is seen");
}
