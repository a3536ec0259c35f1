//! Per-call dispatch: wraps a [`Codec`] and drives the four RPC shapes over
//! an HTTP request/response pair (§4.5, §4.1).
//!
//! Grounded directly on `tonic`'s `server::grpc::Grpc`, retargeted at this
//! crate's `Codec`/`Status`/`Streaming` types.

use super::service::{ClientStreamingService, ServerStreamingService, StreamingService, UnaryService};
use crate::body::BoxBody;
use crate::call::{Call, CallMachine};
use crate::codec::{
    compression::{CompressionEncoding, EnabledCompressionEncodings},
    encode_server, Codec, Streaming,
};
use crate::codec::MessageSizeLimits;
use crate::interceptor::{chain_unary, CallInfo, StreamingInterceptor, UnaryInterceptor};
use crate::{Code, Request, Response, Status};
use futures_core::Stream;
use http_body::Body;
use std::fmt;
use std::sync::Arc;
use tokio_stream::{once, StreamExt};

/// Drives a single gRPC call of a known shape against a user service,
/// handling codec negotiation and framing so the service only sees typed
/// messages.
pub struct Grpc<T>
where
    T: Codec,
{
    codec: T,
    accept_compression_encodings: EnabledCompressionEncodings,
    send_compression_encodings: EnabledCompressionEncodings,
    max_receive_message_size: Option<usize>,
    unary_interceptors: Vec<Arc<dyn UnaryInterceptor<T::Decode, T::Encode>>>,
    stream_interceptors: Vec<Arc<dyn StreamingInterceptor>>,
}

impl<T> Grpc<T>
where
    T: Codec,
{
    pub fn new(codec: T) -> Self {
        Self {
            codec,
            accept_compression_encodings: EnabledCompressionEncodings::default(),
            send_compression_encodings: EnabledCompressionEncodings::default(),
            max_receive_message_size: None,
            unary_interceptors: Vec::new(),
            stream_interceptors: Vec::new(),
        }
    }

    pub fn accept_gzip(mut self) -> Self {
        self.accept_compression_encodings.enable_gzip();
        self
    }

    pub fn send_gzip(mut self) -> Self {
        self.send_compression_encodings.enable_gzip();
        self
    }

    pub fn max_receive_message_size(mut self, limit: usize) -> Self {
        self.max_receive_message_size = Some(limit);
        self
    }

    /// Registers a unary interceptor (§4.6, §6 `unary_interceptor`) run
    /// around every unary call this `Grpc` drives. Composed right-to-left via
    /// [`chain_unary`] in registration order, so the first interceptor
    /// registered is outermost.
    pub fn unary_interceptor(mut self, interceptor: Arc<dyn UnaryInterceptor<T::Decode, T::Encode>>) -> Self {
        self.unary_interceptors.push(interceptor);
        self
    }

    /// Registers a streaming interceptor / stats handler (§4.6, §6
    /// `stream_interceptor`), whose `new_stream` fires once per call driven
    /// by this `Grpc`, regardless of shape.
    pub fn stream_interceptor(mut self, interceptor: Arc<dyn StreamingInterceptor>) -> Self {
        self.stream_interceptors.push(interceptor);
        self
    }

    fn notify_new_stream(&self, call: &Call) {
        if self.stream_interceptors.is_empty() {
            return;
        }
        let info = CallInfo {
            method: call.method,
            is_client_streaming: call.shape.client_streams(),
            is_server_streaming: call.shape.server_streams(),
        };
        for interceptor in &self.stream_interceptors {
            interceptor.new_stream(&info);
        }
    }

    pub async fn unary<S, B>(
        &mut self,
        mut service: S,
        req: http::Request<B>,
        mut call: Call,
    ) -> http::Response<BoxBody>
    where
        S: UnaryService<T::Decode, Response = T::Encode> + Send + 'static,
        S::Future: Send,
        T::Decode: Send + 'static,
        T::Encode: Send + 'static,
        B: Body<Data = bytes::Bytes> + Send + 'static,
        B::Error: Into<crate::BoxError> + Send,
    {
        self.notify_new_stream(&call);

        let encoding = CompressionEncoding::from_accept_encoding_header(
            req.headers(),
            self.send_compression_encodings,
        );

        let context = call.context.clone();
        let mut request = match self.map_request_unary(req, call.machine()).await {
            Ok(r) => r,
            Err(status) => return self.map_response::<tokio_stream::Once<Result<T::Encode, Status>>>(Err(status), encoding),
        };
        request.extensions_mut().insert(context.clone());

        let response = if self.unary_interceptors.is_empty() {
            service.call(request).await
        } else {
            let info = CallInfo {
                method: call.method,
                is_client_streaming: false,
                is_server_streaming: false,
            };
            let service = Arc::new(tokio::sync::Mutex::new(service));
            let handler: Arc<
                dyn Fn(
                        crate::context::Context,
                        Request<T::Decode>,
                    ) -> crate::interceptor::BoxFuture<
                        'static,
                        Result<(crate::context::Context, Response<T::Encode>), Status>,
                    > + Send
                    + Sync,
            > = Arc::new(move |ctx, req| {
                let service = Arc::clone(&service);
                Box::pin(async move {
                    let response = service.lock().await.call(req).await?;
                    Ok((ctx, response))
                })
            });
            let chained = chain_unary(self.unary_interceptors.clone(), info, handler);
            chained(context, request).await.map(|(_, response)| response)
        };

        self.map_response(response.map(|r| r.map(|m| once(Ok(m)))), encoding)
    }

    pub async fn server_streaming<S, B>(
        &mut self,
        mut service: S,
        req: http::Request<B>,
        mut call: Call,
    ) -> http::Response<BoxBody>
    where
        S: ServerStreamingService<T::Decode, Response = T::Encode>,
        S::ResponseStream: Send + 'static,
        B: Body<Data = bytes::Bytes> + Send + 'static,
        B::Error: Into<crate::BoxError> + Send,
    {
        self.notify_new_stream(&call);

        let encoding = CompressionEncoding::from_accept_encoding_header(
            req.headers(),
            self.send_compression_encodings,
        );

        let context = call.context.clone();
        let mut request = match self.map_request_unary(req, call.machine()).await {
            Ok(r) => r,
            Err(status) => return self.map_response::<S::ResponseStream>(Err(status), encoding),
        };
        request.extensions_mut().insert(context);

        let response = service.call(request).await;
        self.map_response(response, encoding)
    }

    pub async fn client_streaming<S, B>(
        &mut self,
        mut service: S,
        req: http::Request<B>,
        call: Call,
    ) -> http::Response<BoxBody>
    where
        S: ClientStreamingService<T::Decode, Response = T::Encode>,
        B: Body<Data = bytes::Bytes> + Send + 'static,
        B::Error: Into<crate::BoxError> + Send,
    {
        self.notify_new_stream(&call);

        let encoding = CompressionEncoding::from_accept_encoding_header(
            req.headers(),
            self.send_compression_encodings,
        );

        let mut request = match self.map_request_streaming(req) {
            Ok(r) => r,
            Err(status) => return self.map_response::<tokio_stream::Once<Result<T::Encode, Status>>>(Err(status), encoding),
        };
        request.extensions_mut().insert(call.context);
        let response = service
            .call(request)
            .await
            .map(|r| r.map(|m| once(Ok(m))));
        self.map_response(response, encoding)
    }

    pub async fn streaming<S, B>(
        &mut self,
        mut service: S,
        req: http::Request<B>,
        call: Call,
    ) -> http::Response<BoxBody>
    where
        S: StreamingService<T::Decode, Response = T::Encode> + Send,
        S::ResponseStream: Send + 'static,
        B: Body<Data = bytes::Bytes> + Send + 'static,
        B::Error: Into<crate::BoxError> + Send,
    {
        self.notify_new_stream(&call);

        let encoding = CompressionEncoding::from_accept_encoding_header(
            req.headers(),
            self.send_compression_encodings,
        );

        let mut request = match self.map_request_streaming(req) {
            Ok(r) => r,
            Err(status) => return self.map_response::<S::ResponseStream>(Err(status), encoding),
        };
        request.extensions_mut().insert(call.context);
        let response = service.call(request).await;
        self.map_response(response, encoding)
    }

    /// Decodes the single request message for a unary or server-streaming
    /// call, then checks for a second one via `machine` before reading
    /// trailers: a unary/server-streaming call carrying more than one
    /// request message is a shape violation, `INVALID_ARGUMENT`, and must
    /// never reach the handler (§4.3).
    async fn map_request_unary<B>(
        &mut self,
        request: http::Request<B>,
        machine: &mut CallMachine,
    ) -> Result<Request<T::Decode>, Status>
    where
        B: Body<Data = bytes::Bytes> + Send + 'static,
        B::Error: Into<crate::BoxError> + Send,
    {
        let request_compression_encoding = if let Some(enc) =
            CompressionEncoding::from_encoding_header(request.headers())
        {
            let supported = match enc {
                CompressionEncoding::Gzip => self.accept_compression_encodings.gzip(),
            };
            if supported {
                Some(enc)
            } else {
                return Err(unsupported_encoding_status(self.accept_compression_encodings));
            }
        } else {
            None
        };

        let (parts, body) = request.into_parts();
        let boxed_body = crate::body::boxed(body);
        let limits = MessageSizeLimits {
            max_receive: self.max_receive_message_size,
        };
        let mut stream = Streaming::new_request_with_limits(
            self.codec.decoder(),
            boxed_body,
            request_compression_encoding,
            limits,
        );

        let message = stream
            .message()
            .await?
            .ok_or_else(|| Status::new(Code::Internal, "missing request message"))?;
        machine.observe_request()?;

        if stream.message().await?.is_some() {
            let status = machine.observe_request().err().unwrap_or_else(|| {
                Status::invalid_argument("unary/server-streaming call received more than one request message")
            });
            return Err(status);
        }

        let mut req = Request::from_http_parts(parts, message);

        if let Some(trailers) = stream.trailers().await? {
            req.metadata_mut().merge(trailers);
        }

        Ok(req)
    }

    fn map_request_streaming<B>(
        &mut self,
        request: http::Request<B>,
    ) -> Result<Request<Streaming<T::Decode>>, Status>
    where
        B: Body<Data = bytes::Bytes> + Send + 'static,
        B::Error: Into<crate::BoxError> + Send,
    {
        let encoding = if let Some(enc) = CompressionEncoding::from_encoding_header(request.headers()) {
            let supported = match enc {
                CompressionEncoding::Gzip => self.accept_compression_encodings.gzip(),
            };
            if supported {
                Some(enc)
            } else {
                return Err(unsupported_encoding_status(self.accept_compression_encodings));
            }
        } else {
            None
        };
        let limits = MessageSizeLimits {
            max_receive: self.max_receive_message_size,
        };
        Ok(Request::from_http(request.map(|body| {
            Streaming::new_request_with_limits(
                self.codec.decoder(),
                crate::body::boxed(body),
                encoding,
                limits,
            )
        })))
    }

    fn map_response<S>(&mut self, response: Result<Response<S>, Status>, encoding: Option<CompressionEncoding>) -> http::Response<BoxBody>
    where
        S: Stream<Item = Result<T::Encode, Status>> + Send + 'static,
    {
        let response = match response {
            Ok(r) => r,
            Err(status) => return status.to_http(),
        };

        let mut http_response = response.into_http();

        http_response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static(crate::metadata::GRPC_CONTENT_TYPE),
        );

        if let Some(accept) = self.accept_compression_encodings.accept_encoding_header_value() {
            http_response.headers_mut().insert(
                crate::codec::compression::ACCEPT_ENCODING_HEADER_NAME.clone(),
                accept,
            );
        }

        if let Some(encoding) = encoding {
            http_response.headers_mut().insert(
                crate::codec::compression::ENCODING_HEADER_NAME.clone(),
                encoding.into_header_value(),
            );
        }

        let (parts, body) = http_response.into_parts();
        let body = encode_server(self.codec.encoder(), body, encoding);
        http::Response::from_parts(parts, body)
    }
}

/// Resolves the spec's Open Question on an unsupported `grpc-encoding`:
/// `UNIMPLEMENTED` with `grpc-accept-encoding` populated (§9).
fn unsupported_encoding_status(accept: EnabledCompressionEncodings) -> Status {
    let status = Status::unimplemented("the requested grpc-encoding is not supported");
    if let Some(value) = accept.accept_encoding_header_value() {
        status.with_extra_header(crate::codec::compression::ACCEPT_ENCODING_HEADER_NAME, value)
    } else {
        status
    }
}

impl<T: Codec + fmt::Debug> fmt::Debug for Grpc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grpc").field("codec", &self.codec).finish()
    }
}
