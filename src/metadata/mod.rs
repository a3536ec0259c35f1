//! The ordered multimap carried alongside every request, response, and
//! trailer (§3 "Metadata").
//!
//! Keys are lowercase ASCII `http::HeaderName`s. A key ending in `-bin` is
//! treated as binary and its value is base64-encoded on the wire; every
//! other key is plain ASCII. Reserved pseudo/grpc headers are tracked
//! separately by the call machinery and are not exposed through this map.

mod encoding;
mod errors;

pub use self::errors::{InvalidMetadataKey, InvalidMetadataValue};

use http::{HeaderMap, HeaderName, HeaderValue};
use std::fmt;

pub(crate) const GRPC_CONTENT_TYPE: &str = "application/grpc";
pub(crate) const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";
pub(crate) const GRPC_ENCODING_HEADER: &str = "grpc-encoding";
pub(crate) const GRPC_ACCEPT_ENCODING_HEADER: &str = "grpc-accept-encoding";

/// Header names the framework manages and that never appear in a user's
/// [`MetadataMap`] (§3 "Reserved names").
pub(crate) const RESERVED_HEADERS: &[&str] = &[
    "grpc-status",
    "grpc-message",
    "grpc-status-details-bin",
    "grpc-encoding",
    "grpc-accept-encoding",
    "grpc-timeout",
    "content-type",
    "te",
    "user-agent",
];

pub(crate) fn is_reserved(name: &str) -> bool {
    name.starts_with(':') || RESERVED_HEADERS.iter().any(|r| r.eq_ignore_ascii_case(name))
}

/// An ordered multimap of metadata key/value pairs.
///
/// Duplicates preserve insertion order. Binary values (keys ending in
/// `-bin`) are stored and returned decoded; this type handles the
/// base64 encode/decode transparently at the HTTP boundary.
#[derive(Clone, Default)]
pub struct MetadataMap {
    headers: HeaderMap,
}

impl MetadataMap {
    pub fn new() -> Self {
        Self {
            headers: HeaderMap::new(),
        }
    }

    pub(crate) fn from_headers(headers: HeaderMap) -> Self {
        let mut out = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers.iter() {
            if is_reserved(name.as_str()) {
                continue;
            }
            out.append(name.clone(), value.clone());
        }
        Self { headers: out }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Returns the first value for `key`, decoding `-bin` keys from base64.
    pub fn get(&self, key: &str) -> Option<MetadataValue<'_>> {
        self.headers.get(key).map(|v| MetadataValue { raw: v, key })
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = MetadataValue<'a>> + 'a {
        self.headers
            .get_all(key)
            .iter()
            .map(move |v| MetadataValue { raw: v, key })
    }

    /// Inserts a new ASCII value, appending rather than overwriting per the
    /// "duplicates preserve insertion order" invariant (§3).
    pub fn append(
        &mut self,
        key: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Result<(), InvalidMetadataKey> {
        let key = key.as_ref().to_ascii_lowercase();
        if is_reserved(&key) {
            return Err(InvalidMetadataKey::reserved(key));
        }
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| InvalidMetadataKey::malformed(key.clone()))?;
        let encoded = if key.ends_with("-bin") {
            encoding::encode_bin(value.into().as_bytes())
        } else {
            value.into()
        };
        let hv = HeaderValue::from_str(&encoded)
            .map_err(|_| InvalidMetadataKey::malformed(key))?;
        self.headers.append(name, hv);
        Ok(())
    }

    pub fn append_bin(
        &mut self,
        key: impl AsRef<str>,
        value: impl AsRef<[u8]>,
    ) -> Result<(), InvalidMetadataKey> {
        let key = key.as_ref().to_ascii_lowercase();
        if !key.ends_with("-bin") {
            return Err(InvalidMetadataKey::malformed(key));
        }
        self.append(key, encoding::encode_bin(value.as_ref()))
    }

    pub fn remove(&mut self, key: &str) {
        self.headers.remove(key);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, MetadataValue<'_>)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.as_str(), MetadataValue { raw: v, key: k.as_str() }))
    }

    pub(crate) fn merge(&mut self, other: MetadataMap) {
        for (name, value) in other.headers.iter() {
            self.headers.append(name.clone(), value.clone());
        }
    }

    pub(crate) fn extend_into_headers(&self, headers: &mut HeaderMap) {
        for (k, v) in self.headers.iter() {
            headers.append(k.clone(), v.clone());
        }
    }

    pub(crate) fn into_headers(self) -> HeaderMap {
        self.headers
    }

    pub(crate) fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

impl fmt::Debug for MetadataMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(k, v)| (k, v.as_str_lossy())))
            .finish()
    }
}

/// A single metadata value, decoded from its wire form on access.
pub struct MetadataValue<'a> {
    raw: &'a HeaderValue,
    key: &'a str,
}

impl<'a> MetadataValue<'a> {
    pub fn is_binary(&self) -> bool {
        self.key.ends_with("-bin")
    }

    /// Returns the ASCII text of this value. Panics is avoided by returning
    /// `None` when the value isn't valid ASCII text (binary values should be
    /// read with [`MetadataValue::to_bytes`]).
    pub fn as_str(&self) -> Option<&str> {
        if self.is_binary() {
            None
        } else {
            self.raw.to_str().ok()
        }
    }

    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.raw.as_bytes())
    }

    /// Decodes a binary (`-bin`) value from its base64 wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, InvalidMetadataValue> {
        if self.is_binary() {
            encoding::decode_bin(self.raw.as_bytes()).ok_or(InvalidMetadataValue(()))
        } else {
            Ok(self.raw.as_bytes().to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_round_trip_preserves_order() {
        let mut map = MetadataMap::new();
        map.append("x-a", "1").unwrap();
        map.append("x-a", "2").unwrap();
        let values: Vec<_> = map.get_all("x-a").map(|v| v.as_str().unwrap().to_string()).collect();
        assert_eq!(values, vec!["1", "2"]);
    }

    #[test]
    fn binary_round_trips_through_base64() {
        let mut map = MetadataMap::new();
        map.append_bin("x-trace-bin", b"\x00\x01\xffhello").unwrap();
        let value = map.get("x-trace-bin").unwrap();
        assert!(value.is_binary());
        assert_eq!(value.to_bytes().unwrap(), b"\x00\x01\xffhello");
    }

    #[test]
    fn reserved_keys_are_rejected() {
        let mut map = MetadataMap::new();
        let err = map.append("grpc-status", "0").unwrap_err();
        assert!(matches!(err, InvalidMetadataKey::Reserved(_)));
    }

    #[test]
    fn from_headers_filters_reserved() {
        let mut raw = HeaderMap::new();
        raw.insert("grpc-status", HeaderValue::from_static("0"));
        raw.insert("x-user", HeaderValue::from_static("hi"));
        let map = MetadataMap::from_headers(raw);
        assert!(map.get("grpc-status").is_none());
        assert_eq!(map.get("x-user").unwrap().as_str().unwrap(), "hi");
    }
}
