use std::fmt;

/// A metadata key was malformed or attempted to shadow a reserved,
/// framework-managed header (§3: "Reserved-key collisions surface as
/// `INTERNAL`").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidMetadataKey {
    Reserved(String),
    Malformed(String),
}

impl InvalidMetadataKey {
    pub(crate) fn reserved(key: String) -> Self {
        InvalidMetadataKey::Reserved(key)
    }
    pub(crate) fn malformed(key: String) -> Self {
        InvalidMetadataKey::Malformed(key)
    }
}

impl fmt::Display for InvalidMetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidMetadataKey::Reserved(k) => {
                write!(f, "metadata key `{k}` is reserved by the framework")
            }
            InvalidMetadataKey::Malformed(k) => write!(f, "metadata key `{k}` is malformed"),
        }
    }
}

impl std::error::Error for InvalidMetadataKey {}

impl From<InvalidMetadataKey> for crate::Status {
    fn from(err: InvalidMetadataKey) -> Self {
        crate::Status::internal(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidMetadataValue(pub(crate) ());

impl fmt::Display for InvalidMetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid metadata value")
    }
}

impl std::error::Error for InvalidMetadataValue {}
