//! Per-call dispatch on the client side: encodes a typed request, sends it
//! through a [`GrpcService`], and decodes the typed response (§4.5's mirror
//! image, §6 "Required headers on a server-received request").
//!
//! Grounded directly on `tonic`'s `client::grpc::Grpc`, retargeted at this
//! crate's `Codec`/`Status`/`Streaming` types and simplified to carry its
//! configuration directly rather than behind an optional builder feature.

use super::GrpcService;
use crate::body::BoxBody;
use crate::codec::{
    compression::{CompressionEncoding, EnabledCompressionEncodings},
    encode_client, Codec, Decoder, MessageSizeLimits, Streaming,
};
use crate::interceptor::{CallInfo, StreamingInterceptor};
use crate::metadata::{GRPC_CONTENT_TYPE, GRPC_TIMEOUT_HEADER};
use crate::request::RequestTimeout;
use crate::transport::service::encode_grpc_timeout;
use crate::{Code, Request, Response, Status};
use bytes::Bytes;
use http::uri::PathAndQuery;
use http_body::Body;
use std::fmt;
use std::future;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};

/// A gRPC client dispatcher: wraps some inner [`GrpcService`] and
/// encodes/decodes messages via a [`Codec`] supplied per call.
///
/// Each request method takes a [`Request`], a [`PathAndQuery`] (e.g.
/// `/greeter.Greeter/SayHello`), and a [`Codec`]; generated client stubs are
/// the intended caller of these methods directly.
pub struct Grpc<T> {
    inner: T,
    origin: http::Uri,
    accept_compression_encodings: EnabledCompressionEncodings,
    send_compression_encoding: Option<CompressionEncoding>,
    max_receive_message_size: Option<usize>,
    stream_interceptors: Vec<Arc<dyn StreamingInterceptor>>,
}

impl<T> Grpc<T> {
    /// Creates a new gRPC client dispatcher over `inner`, using `origin`'s
    /// scheme and authority for every outgoing request (the path is
    /// replaced per call).
    pub fn new(inner: T, origin: http::Uri) -> Self {
        Self {
            inner,
            origin,
            accept_compression_encodings: EnabledCompressionEncodings::default(),
            send_compression_encoding: None,
            max_receive_message_size: None,
            stream_interceptors: Vec::new(),
        }
    }

    pub fn accept_gzip(mut self) -> Self {
        self.accept_compression_encodings.enable_gzip();
        self
    }

    pub fn send_gzip(mut self) -> Self {
        self.send_compression_encoding = Some(CompressionEncoding::Gzip);
        self
    }

    pub fn max_receive_message_size(mut self, limit: usize) -> Self {
        self.max_receive_message_size = Some(limit);
        self
    }

    /// Registers a streaming interceptor / stats handler that observes
    /// every call this `Grpc` sends, regardless of shape (§4.6). Unlike the
    /// server side, a client call's path isn't a `'static` string the way a
    /// registered route's is, so [`CallInfo::method`] is always empty here;
    /// interceptors that need the method name should capture it themselves
    /// at the call site instead of reading it off `CallInfo`.
    pub fn stream_interceptor(mut self, interceptor: Arc<dyn StreamingInterceptor>) -> Self {
        self.stream_interceptors.push(interceptor);
        self
    }

    fn notify_new_stream(&self, is_client_streaming: bool, is_server_streaming: bool) {
        if self.stream_interceptors.is_empty() {
            return;
        }
        let info = CallInfo {
            method: "",
            is_client_streaming,
            is_server_streaming,
        };
        for interceptor in &self.stream_interceptors {
            interceptor.new_stream(&info);
        }
    }

    /// Polls the inner service until it reports capacity for one more
    /// request.
    pub async fn ready(&mut self) -> Result<(), T::Error>
    where
        T: GrpcService<BoxBody>,
    {
        future::poll_fn(|cx| self.inner.poll_ready(cx)).await
    }

    /// Sends a single unary gRPC request.
    pub async fn unary<M1, M2, C>(
        &mut self,
        request: Request<M1>,
        path: PathAndQuery,
        codec: C,
    ) -> Result<Response<M2>, Status>
    where
        T: GrpcService<BoxBody>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<crate::BoxError>,
        C: Codec<Encode = M1, Decode = M2>,
        M1: Send + 'static,
        M2: Send + 'static,
    {
        let request = request.map(tokio_stream::once);
        let response = self.dispatch(request, path, codec, false, false).await?;
        Self::drain_single_response(response).await
    }

    /// Sends a client-streaming gRPC request.
    pub async fn client_streaming<S, M1, M2, C>(
        &mut self,
        request: Request<S>,
        path: PathAndQuery,
        codec: C,
    ) -> Result<Response<M2>, Status>
    where
        T: GrpcService<BoxBody>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<crate::BoxError>,
        S: Stream<Item = M1> + Send + 'static,
        C: Codec<Encode = M1, Decode = M2>,
        M1: Send + 'static,
        M2: Send + 'static,
    {
        let response = self.dispatch(request, path, codec, true, false).await?;
        Self::drain_single_response(response).await
    }

    async fn drain_single_response<M2>(response: Response<Streaming<M2>>) -> Result<Response<M2>, Status>
    where
        M2: Send + 'static,
    {
        let (mut metadata, mut body, extensions) = response.into_parts();

        let message = body
            .message()
            .await?
            .ok_or_else(|| Status::new(Code::Internal, "missing response message"))?;

        if let Some(trailers) = body.trailers().await? {
            metadata.merge(trailers);
        }

        Ok(Response::from_parts(metadata, message, extensions))
    }

    /// Sends a server-streaming gRPC request.
    pub async fn server_streaming<M1, M2, C>(
        &mut self,
        request: Request<M1>,
        path: PathAndQuery,
        codec: C,
    ) -> Result<Response<Streaming<M2>>, Status>
    where
        T: GrpcService<BoxBody>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<crate::BoxError>,
        C: Codec<Encode = M1, Decode = M2>,
        M1: Send + 'static,
        M2: Send + 'static,
    {
        let request = request.map(tokio_stream::once);
        self.dispatch(request, path, codec, false, true).await
    }

    /// Sends a bidirectional-streaming gRPC request.
    pub async fn streaming<S, M1, M2, C>(
        &mut self,
        request: Request<S>,
        path: PathAndQuery,
        codec: C,
    ) -> Result<Response<Streaming<M2>>, Status>
    where
        T: GrpcService<BoxBody>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<crate::BoxError>,
        S: Stream<Item = M1> + Send + 'static,
        C: Codec<Encode = M1, Decode = M2>,
        M1: Send + 'static,
        M2: Send + 'static,
    {
        self.dispatch(request, path, codec, true, true).await
    }

    /// The common dispatch core every public call method above funnels
    /// through: runs registered stream interceptors, encodes and sends the
    /// request, then decodes the response. `is_client_streaming`/
    /// `is_server_streaming` describe the shape of the call *as the caller
    /// sees it* (e.g. `unary` passes `false, false` even though it's
    /// implemented by sending a one-item stream).
    async fn dispatch<S, M1, M2, C>(
        &mut self,
        request: Request<S>,
        path: PathAndQuery,
        mut codec: C,
        is_client_streaming: bool,
        is_server_streaming: bool,
    ) -> Result<Response<Streaming<M2>>, Status>
    where
        T: GrpcService<BoxBody>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<crate::BoxError>,
        S: Stream<Item = M1> + Send + 'static,
        C: Codec<Encode = M1, Decode = M2>,
        M1: Send + 'static,
        M2: Send + 'static,
    {
        self.notify_new_stream(is_client_streaming, is_server_streaming);

        let send_encoding = self.send_compression_encoding;
        let encoder = codec.encoder();
        let request = request.map(|s| encode_client(encoder, s.map(Ok), send_encoding));

        let mut http_request = request.into_http(self.build_uri(path), http::Method::POST, http::Version::HTTP_2);
        self.decorate_request(&mut http_request);

        let response = self
            .inner
            .call(http_request)
            .await
            .map_err(|e| Status::from_error(e.into()))?;

        let decoder = codec.decoder();
        self.create_response(decoder, response)
    }

    fn create_response<M2>(
        &self,
        decoder: impl Decoder<Item = M2, Error = Status> + Send + 'static,
        response: http::Response<T::ResponseBody>,
    ) -> Result<Response<Streaming<M2>>, Status>
    where
        T: GrpcService<BoxBody>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<crate::BoxError>,
    {
        // A Trailer-Only response carries `grpc-status` on the initial
        // HEADERS frame; an `OK` status there still falls through to build a
        // `Streaming` so callers can drain any (absent) body/trailers
        // uniformly.
        if let Some(status) = Status::from_header_map(response.headers()) {
            if status.code() != Code::Ok {
                return Err(status);
            }
        }

        let encoding = CompressionEncoding::from_encoding_header(response.headers());
        if let Some(enc) = encoding {
            let supported = match enc {
                CompressionEncoding::Gzip => self.accept_compression_encodings.gzip(),
            };
            if !supported {
                return Err(Status::unimplemented(
                    "the server used a grpc-encoding this client does not accept",
                ));
            }
        }

        let limits = MessageSizeLimits {
            max_receive: self.max_receive_message_size,
        };
        let response = response.map(|body| Streaming::new_response(decoder, crate::body::boxed(body), encoding, limits));
        Ok(Response::from_http(response))
    }

    fn build_uri(&self, path: PathAndQuery) -> http::Uri {
        let mut parts = self.origin.clone().into_parts();
        parts.path_and_query = Some(path);
        http::Uri::from_parts(parts).expect("origin plus a method path is always a valid URI")
    }

    fn decorate_request(&self, request: &mut http::Request<BoxBody>) {
        request
            .headers_mut()
            .insert(http::header::TE, http::HeaderValue::from_static("trailers"));
        request.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static(GRPC_CONTENT_TYPE),
        );
        // `MetadataMap` rejects reserved headers outright (§4.10), so a
        // deadline set via `Request::set_timeout` is carried here directly
        // rather than through the metadata round-trip every other header
        // goes through.
        if let Some(timeout) = request.extensions().get::<RequestTimeout>().map(|t| t.0) {
            request
                .headers_mut()
                .insert(GRPC_TIMEOUT_HEADER, encode_grpc_timeout(timeout));
        }
        if let Some(encoding) = self.send_compression_encoding {
            request.headers_mut().insert(
                crate::codec::compression::ENCODING_HEADER_NAME.clone(),
                encoding.into_header_value(),
            );
        }
        if let Some(value) = self.accept_compression_encodings.accept_encoding_header_value() {
            request.headers_mut().insert(
                crate::codec::compression::ACCEPT_ENCODING_HEADER_NAME.clone(),
                value,
            );
        }
    }
}

impl<T: Clone> Clone for Grpc<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            origin: self.origin.clone(),
            accept_compression_encodings: self.accept_compression_encodings,
            send_compression_encoding: self.send_compression_encoding,
            max_receive_message_size: self.max_receive_message_size,
            stream_interceptors: self.stream_interceptors.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Grpc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grpc")
            .field("inner", &self.inner)
            .field("origin", &self.origin)
            .finish()
    }
}
