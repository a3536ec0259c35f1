use crate::body::BoxBody;
use crate::metadata::MetadataMap;
use std::fmt;

/// A gRPC response: a typed message plus outbound metadata (trailers are
/// handled separately by the [`crate::call::StreamHandle`], not here — this
/// type is what a unary handler returns).
pub struct Response<T> {
    metadata: MetadataMap,
    message: T,
    extensions: http::Extensions,
}

impl<T> Response<T> {
    pub fn new(message: T) -> Self {
        Self {
            metadata: MetadataMap::new(),
            message,
            extensions: http::Extensions::new(),
        }
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

    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    pub fn extensions_mut(&mut self) -> &mut http::Extensions {
        &mut self.extensions
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            metadata: self.metadata,
            message: f(self.message),
            extensions: self.extensions,
        }
    }

    pub(crate) fn into_http(self) -> http::Response<T> {
        let mut response = http::Response::new(self.message);
        *response.extensions_mut() = self.extensions;
        self.metadata.extend_into_headers(response.headers_mut());
        response
    }

    /// Builds a `Response` from an inbound HTTP/2 response on the client
    /// side, parsing headers into metadata the way [`Request::from_http`]
    /// does on the server side.
    pub(crate) fn from_http(response: http::Response<T>) -> Self {
        let (parts, message) = response.into_parts();
        Self {
            metadata: MetadataMap::from_headers(parts.headers),
            message,
            extensions: parts.extensions,
        }
    }

    pub(crate) fn into_parts(self) -> (MetadataMap, T, http::Extensions) {
        (self.metadata, self.message, self.extensions)
    }

    pub(crate) fn from_parts(metadata: MetadataMap, message: T, extensions: http::Extensions) -> Self {
        Self {
            metadata,
            message,
            extensions,
        }
    }
}

impl Response<BoxBody> {
    pub(crate) fn trailer_only(status: &crate::Status) -> http::Response<BoxBody> {
        status.to_http()
    }
}

impl<T: fmt::Debug> fmt::Debug for Response<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("metadata", &self.metadata)
            .field("message", &self.message)
            .finish()
    }
}
