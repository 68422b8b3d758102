//! SASL PLAIN (RFC 4616) payload encoding for `AUTHENTICATE`.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

/// Longest argument a single `AUTHENTICATE` line may carry.
pub const CHUNK_SIZE: usize = 400;

pub const MECHANISM: &str = "PLAIN";

/// `base64(authzid NUL authcid NUL password)`, authorizing as ourselves.
pub fn encode_plain(username: &str, password: &str) -> String {
    let payload = format!("{username}\0{username}\0{password}");
    BASE64.encode(payload.as_bytes())
}

/// Split an encoded payload into `AUTHENTICATE` arguments.
///
/// A payload whose last chunk is exactly [`CHUNK_SIZE`] long (or an empty
/// payload) is terminated with `+` so the server knows it is complete.
pub fn chunk_payload(encoded: &str) -> Vec<String> {
    let mut chunks: Vec<String> = encoded
        .as_bytes()
        .chunks(CHUNK_SIZE)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect();
    if chunks.last().is_none_or(|last| last.len() == CHUNK_SIZE) {
        chunks.push("+".to_string());
    }
    chunks
}

/// Whether a CAP `sasl=` value lets us use PLAIN. No value means the
/// server did not list mechanisms, so we try anyway.
pub fn offers_plain(cap_value: Option<&str>) -> bool {
    match cap_value {
        None | Some("") => true,
        Some(mechs) => mechs
            .split(',')
            .any(|m| m.eq_ignore_ascii_case(MECHANISM)),
    }
}
