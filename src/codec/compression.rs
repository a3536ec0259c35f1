//! Per-stream compression negotiation (§4.2).

use bytes::BytesMut;
use std::fmt;

pub(crate) const ENCODING_HEADER: &str = crate::metadata::GRPC_ENCODING_HEADER;
pub(crate) const ACCEPT_ENCODING_HEADER: &str = crate::metadata::GRPC_ACCEPT_ENCODING_HEADER;

pub(crate) static ENCODING_HEADER_NAME: http::HeaderName =
    http::HeaderName::from_static(crate::metadata::GRPC_ENCODING_HEADER);
pub(crate) static ACCEPT_ENCODING_HEADER_NAME: http::HeaderName =
    http::HeaderName::from_static(crate::metadata::GRPC_ACCEPT_ENCODING_HEADER);

/// A compression scheme applied to individual message payloads, negotiated
/// independently of HTTP/2-level compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionEncoding {
    Gzip,
}

impl CompressionEncoding {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "gzip" => Some(CompressionEncoding::Gzip),
            _ => None,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            CompressionEncoding::Gzip => "gzip",
        }
    }

    pub(crate) fn into_header_value(self) -> http::HeaderValue {
        http::HeaderValue::from_static(self.name())
    }

    /// Reads `grpc-encoding` off a request/response's headers.
    pub(crate) fn from_encoding_header(headers: &http::HeaderMap) -> Option<Self> {
        headers
            .get(ENCODING_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::from_name)
    }

    /// Picks the best encoding this side supports out of a peer's
    /// `grpc-accept-encoding` CSV list, per §4.2's negotiation rule.
    pub(crate) fn from_accept_encoding_header(
        headers: &http::HeaderMap,
        enabled: EnabledCompressionEncodings,
    ) -> Option<Self> {
        let csv = headers.get(ACCEPT_ENCODING_HEADER)?.to_str().ok()?;
        csv.split(',')
            .map(str::trim)
            .find_map(Self::from_name)
            .filter(|enc| enabled.is_enabled(*enc))
    }
}

impl fmt::Display for CompressionEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The set of encodings a side is configured to use, as a tiny bitset so it
/// is cheap to copy around `Grpc<T>` configs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnabledCompressionEncodings {
    pub(crate) gzip: bool,
}

impl EnabledCompressionEncodings {
    pub fn enable_gzip(&mut self) {
        self.gzip = true;
    }

    pub fn gzip(&self) -> bool {
        self.gzip
    }

    pub(crate) fn is_enabled(&self, encoding: CompressionEncoding) -> bool {
        match encoding {
            CompressionEncoding::Gzip => self.gzip,
        }
    }

    /// The CSV value advertised in `grpc-accept-encoding`.
    pub(crate) fn accept_encoding_header_value(&self) -> Option<http::HeaderValue> {
        if self.gzip {
            Some(http::HeaderValue::from_static("gzip"))
        } else {
            None
        }
    }
}

#[cfg(feature = "gzip")]
pub(crate) fn compress(
    encoding: CompressionEncoding,
    src: &mut BytesMut,
    dst: &mut BytesMut,
) -> std::io::Result<()> {
    use std::io::Write;
    match encoding {
        CompressionEncoding::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(dst.writer(), flate2::Compression::default());
            encoder.write_all(src)?;
            encoder.finish()?;
        }
    }
    Ok(())
}

#[cfg(not(feature = "gzip"))]
pub(crate) fn compress(
    _encoding: CompressionEncoding,
    _src: &mut BytesMut,
    _dst: &mut BytesMut,
) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "compression support not enabled",
    ))
}

#[cfg(feature = "gzip")]
pub(crate) fn decompress(
    encoding: CompressionEncoding,
    src: &mut BytesMut,
    dst: &mut BytesMut,
    len: usize,
) -> std::io::Result<()> {
    use std::io::Read;
    let mut out = Vec::new();
    match encoding {
        CompressionEncoding::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(&src[..len]);
            decoder.read_to_end(&mut out)?;
        }
    }
    dst.extend_from_slice(&out);
    bytes::Buf::advance(src, len);
    Ok(())
}

#[cfg(not(feature = "gzip"))]
pub(crate) fn decompress(
    _encoding: CompressionEncoding,
    _src: &mut BytesMut,
    _dst: &mut BytesMut,
    _len: usize,
) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "compression support not enabled",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_enabled_encoding_from_accept_header() {
        let mut headers = http::HeaderMap::new();
        headers.insert(ACCEPT_ENCODING_HEADER, http::HeaderValue::from_static("gzip,identity"));
        let mut enabled = EnabledCompressionEncodings::default();
        enabled.enable_gzip();
        let picked = CompressionEncoding::from_accept_encoding_header(&headers, enabled);
        assert_eq!(picked, Some(CompressionEncoding::Gzip));
    }

    #[test]
    fn unsupported_encoding_is_not_picked() {
        let mut headers = http::HeaderMap::new();
        headers.insert(ACCEPT_ENCODING_HEADER, http::HeaderValue::from_static("gzip"));
        let enabled = EnabledCompressionEncodings::default();
        let picked = CompressionEncoding::from_accept_encoding_header(&headers, enabled);
        assert_eq!(picked, None);
    }
}
