use crate::metadata::MetadataMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Stashed in a request's extensions by [`Request::set_timeout`]; read back
/// by `client::Grpc::decorate_request` to stamp an outbound `grpc-timeout`
/// header, since [`MetadataMap`] itself refuses to carry reserved headers
/// like `grpc-timeout` (§4.10).
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestTimeout(pub(crate) Duration);

/// A gRPC request: a typed message plus the metadata and extensions that
/// traveled with it (§3 "Context": "inbound metadata").
pub struct Request<T> {
    metadata: MetadataMap,
    message: T,
    extensions: http::Extensions,
    remote_addr: Option<SocketAddr>,
}

impl<T> Request<T> {
    pub fn new(message: T) -> Self {
        Self {
            metadata: MetadataMap::new(),
            message,
            extensions: http::Extensions::new(),
            remote_addr: None,
        }
    }

    pub(crate) fn from_http_parts(parts: http::request::Parts, message: T) -> Self {
        Self {
            metadata: MetadataMap::from_headers(parts.headers),
            message,
            extensions: parts.extensions,
            remote_addr: None,
        }
    }

    pub(crate) fn from_http(http: http::Request<T>) -> Self {
        let (parts, message) = http.into_parts();
        Self::from_http_parts(parts, message)
    }

    pub fn get_ref(&self) -> &T {
        &self.message
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.message
    }

    pub fn into_inner(self) -> T {
        self.message
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// The call's [`crate::context::Context`], when the request reached this
    /// handler through the dispatcher (§4.5), which stashes it in extensions
    /// alongside the typed message.
    pub fn context(&self) -> Option<&crate::context::Context> {
        self.extensions.get::<crate::context::Context>()
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    /// Sets this call's deadline. A client call carries it as an outbound
    /// `grpc-timeout` header (§4.3); a server-dispatched request instead
    /// gets its deadline from the inbound header via its [`Request::context`]
    /// (§4.5).
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.extensions.insert(RequestTimeout(timeout));
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.extensions.get::<RequestTimeout>().map(|t| t.0)
    }

    pub fn extensions(&self) -> &http::Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut http::Extensions {
        &mut self.extensions
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub(crate) fn set_remote_addr(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Request<U> {
        Request {
            metadata: self.metadata,
            message: f(self.message),
            extensions: self.extensions,
            remote_addr: self.remote_addr,
        }
    }

    /// Builds the outbound HTTP/2 request for a client call: the typed
    /// message as the body, this request's metadata written as headers.
    pub(crate) fn into_http(
        self,
        uri: http::Uri,
        method: http::Method,
        version: http::Version,
    ) -> http::Request<T> {
        let mut request = http::Request::new(self.message);
        *request.uri_mut() = uri;
        *request.method_mut() = method;
        *request.version_mut() = version;
        *request.extensions_mut() = self.extensions;
        self.metadata.extend_into_headers(request.headers_mut());
        request
    }
}

impl<T: fmt::Debug> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("metadata", &self.metadata)
            .field("message", &self.message)
            .finish()
    }
}
