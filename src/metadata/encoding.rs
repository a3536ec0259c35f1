use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;

pub(super) fn encode_bin(bytes: &[u8]) -> String {
    STANDARD_NO_PAD.encode(bytes)
}

pub(super) fn decode_bin(bytes: &[u8]) -> Option<Vec<u8>> {
    // Accept both padded and unpadded base64, as peers disagree in practice.
    STANDARD_NO_PAD
        .decode(bytes)
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(bytes))
        .ok()
}
