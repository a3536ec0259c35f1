use crate::metadata::MetadataMap;
use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

const ENCODING_SET: &percent_encoding::AsciiSet = &percent_encoding::CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'?')
    .add(b'{')
    .add(b'}');

pub(crate) const GRPC_STATUS_HEADER: &str = "grpc-status";
pub(crate) const GRPC_MESSAGE_HEADER: &str = "grpc-message";
pub(crate) const GRPC_STATUS_DETAILS_HEADER: &str = "grpc-status-details-bin";

/// The result of a completed RPC call, carried in the trailers of a gRPC
/// response.
///
/// Values can be created with [`Status::new`] or one of the specialized
/// constructors below.
///
/// ```
/// use tonic_lite::{Status, Code};
/// let status = Status::invalid_argument("name is invalid");
/// assert_eq!(status.code(), Code::InvalidArgument);
/// ```
#[derive(Clone)]
pub struct Status(Box<StatusInner>);

#[derive(Clone)]
struct StatusInner {
    code: Code,
    message: Cow<'static, str>,
    details: Bytes,
    metadata: MetadataMap,
    /// Framework-reserved headers (e.g. `grpc-accept-encoding` on an
    /// UNIMPLEMENTED-encoding error) that bypass the user metadata's
    /// reserved-key guard.
    extra_headers: Vec<(http::HeaderName, http::HeaderValue)>,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

/// The canonical gRPC status codes, matching
/// <https://github.com/grpc/grpc/blob/master/doc/statuscodes.md>.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Maps a raw `grpc-status` integer to its `Code`, defaulting to
    /// `Unknown` for out-of-range values.
    pub fn from_i32(i: i32) -> Self {
        match i {
            0 => Code::Ok,
            1 => Code::Cancelled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => Code::Unknown,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Code::Ok => "The operation completed successfully",
            Code::Cancelled => "The operation was cancelled",
            Code::Unknown => "Unknown error",
            Code::InvalidArgument => "Client specified an invalid argument",
            Code::DeadlineExceeded => "Deadline expired before operation could complete",
            Code::NotFound => "Some requested entity was not found",
            Code::AlreadyExists => "Some entity that we attempted to create already exists",
            Code::PermissionDenied => {
                "The caller does not have permission to execute the specified operation"
            }
            Code::ResourceExhausted => "Some resource has been exhausted",
            Code::FailedPrecondition => {
                "The system is not in a state required for the operation's execution"
            }
            Code::Aborted => "The operation was aborted",
            Code::OutOfRange => "Operation was attempted past the valid range",
            Code::Unimplemented => "Operation is not implemented or not supported",
            Code::Internal => "Internal error",
            Code::Unavailable => "The service is currently unavailable",
            Code::DataLoss => "Unrecoverable data loss or corruption",
            Code::Unauthenticated => "The request does not have valid authentication credentials",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Status {
    pub fn new(code: Code, message: impl Into<Cow<'static, str>>) -> Self {
        Status(Box::new(StatusInner {
            code,
            message: message.into(),
            details: Bytes::new(),
            metadata: MetadataMap::new(),
            extra_headers: Vec::new(),
            source: None,
        }))
    }

    /// Attaches a framework-managed header to this status's trailers,
    /// bypassing the reserved-key guard on [`MetadataMap::append`].
    pub(crate) fn with_extra_header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.0.extra_headers.push((name, value));
        self
    }

    pub fn ok() -> Self {
        Status::new(Code::Ok, "")
    }

    pub fn code(&self) -> Code {
        self.0.code
    }

    pub fn message(&self) -> &str {
        &self.0.message
    }

    pub fn details(&self) -> &[u8] {
        &self.0.details
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.0.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.0.metadata
    }

    pub fn with_details(mut self, details: Bytes) -> Self {
        self.0.details = details;
        self
    }

    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.0.metadata = metadata;
        self
    }

    /// Attaches the originating error, surfaced only in `Debug` output; the
    /// wire representation never leaks it (§7, "redacted message").
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.0.source = Some(Arc::new(source));
        self
    }

    /// Builds a status from an arbitrary boxed error for the `UNKNOWN`
    /// catch-all case (§7: "a handler that throws... results in `UNKNOWN`
    /// with a redacted message").
    pub fn from_error(err: crate::BoxError) -> Self {
        match err.downcast::<Status>() {
            Ok(status) => *status,
            Err(err) => Status::new(Code::Unknown, "internal error").with_opaque_source(err),
        }
    }

    fn with_opaque_source(mut self, err: crate::BoxError) -> Self {
        // BoxError isn't necessarily Send+Sync+'static+Error in a way we can
        // store directly without an extra bound; wrap it minimally.
        struct Opaque(crate::BoxError);
        impl fmt::Debug for Opaque {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&self.0, f)
            }
        }
        impl fmt::Display for Opaque {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
        impl std::error::Error for Opaque {}
        // Safety of Send/Sync: BoxError already requires Send + Sync + 'static.
        let opaque = Opaque(err);
        self.0.source = Some(Arc::new(opaque));
        self
    }

    /// Parses a trailer/header map for `grpc-status`/`grpc-message`/details,
    /// returning `None` if no `grpc-status` is present.
    pub fn from_header_map(headers: &http::HeaderMap) -> Option<Self> {
        let code = Code::from_i32(
            headers
                .get(GRPC_STATUS_HEADER)?
                .to_str()
                .ok()?
                .parse::<i32>()
                .ok()?,
        );
        let message = headers
            .get(GRPC_MESSAGE_HEADER)
            .map(|v| percent_decode(v.as_bytes()))
            .unwrap_or_default();
        let details = headers
            .get(GRPC_STATUS_DETAILS_HEADER)
            .and_then(|v| base64_decode(v.as_bytes()))
            .unwrap_or_default();

        Some(Status(Box::new(StatusInner {
            code,
            message: Cow::Owned(message),
            details: Bytes::from(details),
            metadata: MetadataMap::from_headers(headers.clone()),
            extra_headers: Vec::new(),
            source: None,
        })))
    }

    /// Writes this status as gRPC trailers (`grpc-status`, optional
    /// `grpc-message`, optional details, plus accumulated user metadata).
    pub fn to_header_map(&self) -> Result<http::HeaderMap, InvalidStatusHeader> {
        let mut headers = http::HeaderMap::with_capacity(self.0.metadata.len() + 2);
        headers.insert(
            http::HeaderName::from_static(GRPC_STATUS_HEADER),
            http::HeaderValue::from(self.0.code as i32),
        );
        if !self.0.message.is_empty() {
            let value = percent_encoding::percent_encode(self.0.message.as_bytes(), ENCODING_SET)
                .to_string();
            headers.insert(
                http::HeaderName::from_static(GRPC_MESSAGE_HEADER),
                http::HeaderValue::from_str(&value).map_err(|_| InvalidStatusHeader(()))?,
            );
        }
        if !self.0.details.is_empty() {
            let value =
                base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &self.0.details);
            headers.insert(
                http::HeaderName::from_static(GRPC_STATUS_DETAILS_HEADER),
                http::HeaderValue::from_str(&value).map_err(|_| InvalidStatusHeader(()))?,
            );
        }
        self.0.metadata.extend_into_headers(&mut headers);
        for (name, value) in &self.0.extra_headers {
            headers.insert(name.clone(), value.clone());
        }
        Ok(headers)
    }

    /// Renders this status as a Trailer-Only HTTP/2 response: one HEADERS
    /// frame carrying both the HTTP status and the gRPC trailer fields, with
    /// END_STREAM set by the caller.
    pub fn to_http(&self) -> http::Response<crate::body::BoxBody> {
        let mut response = http::Response::new(crate::body::empty_body());
        *response.status_mut() = http::StatusCode::OK;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static(crate::metadata::GRPC_CONTENT_TYPE),
        );
        if let Ok(trailers) = self.to_header_map() {
            for (k, v) in trailers.iter() {
                response.headers_mut().insert(k, v.clone());
            }
        }
        response
    }

    pub fn cancelled(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::Cancelled, message)
    }
    pub fn unknown(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::Unknown, message)
    }
    pub fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::InvalidArgument, message)
    }
    pub fn deadline_exceeded(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::DeadlineExceeded, message)
    }
    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::NotFound, message)
    }
    pub fn already_exists(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::AlreadyExists, message)
    }
    pub fn permission_denied(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::PermissionDenied, message)
    }
    pub fn resource_exhausted(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::ResourceExhausted, message)
    }
    pub fn failed_precondition(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::FailedPrecondition, message)
    }
    pub fn aborted(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::Aborted, message)
    }
    pub fn out_of_range(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::OutOfRange, message)
    }
    pub fn unimplemented(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::Unimplemented, message)
    }
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::Internal, message)
    }
    pub fn unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::Unavailable, message)
    }
    pub fn data_loss(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::DataLoss, message)
    }
    pub fn unauthenticated(message: impl Into<Cow<'static, str>>) -> Self {
        Status::new(Code::Unauthenticated, message)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid status header value")]
pub struct InvalidStatusHeader(());

fn percent_decode(bytes: &[u8]) -> String {
    percent_encoding::percent_decode(bytes)
        .decode_utf8_lossy()
        .into_owned()
}

fn base64_decode(bytes: &[u8]) -> Option<Vec<u8>> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, bytes).ok()
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("Status");
        builder
            .field("code", &self.0.code)
            .field("message", &self.0.message);
        if !self.0.details.is_empty() {
            builder.field("details", &self.0.details);
        }
        if !self.0.metadata.is_empty() {
            builder.field("metadata", &self.0.metadata);
        }
        if let Some(source) = &self.0.source {
            builder.field("source", source);
        }
        builder.finish()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status: {:?}, message: {:?}", self.0.code, self.0.message)
    }
}

impl std::error::Error for Status {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source.as_ref().map(|s| s.as_ref() as _)
    }
}

/// Surfaces a transport-level disconnect as the closest matching `Status`,
/// per the error taxonomy in §7.
pub(crate) fn map_error(err: crate::BoxError) -> Status {
    if let Some(status) = err.downcast_ref::<Status>() {
        return status.clone();
    }
    Status::unavailable(format!("transport error: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_header_map() {
        let status = Status::invalid_argument("bad input").with_details(Bytes::from_static(b"x"));
        let headers = status.to_header_map().unwrap();
        let parsed = Status::from_header_map(&headers).unwrap();
        assert_eq!(parsed.code(), Code::InvalidArgument);
        assert_eq!(parsed.message(), "bad input");
        assert_eq!(parsed.details(), b"x");
    }

    #[test]
    fn ok_status_has_no_message_header() {
        let headers = Status::ok().to_header_map().unwrap();
        assert!(!headers.contains_key(GRPC_MESSAGE_HEADER));
        assert_eq!(headers.get(GRPC_STATUS_HEADER).unwrap(), "0");
    }

    #[test]
    fn from_i32_defaults_to_unknown() {
        assert_eq!(Code::from_i32(999), Code::Unknown);
    }
}
