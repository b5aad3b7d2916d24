//! Content digests for example fragments.
//!
//! The digest is recorded alongside each stored Example for audit and for
//! cheap comparison in reports. Idempotence decisions still compare the
//! fragment bytes themselves.
//!
//! - algorithm: SHA-256
//! - input: the UTF-8 bytes of `sourceText` as submitted
//! - output: `"sha256:<64 lowercase hex digits>"`

use std::fmt::Write as _;

use sha2::{Digest, Sha256};

/// Prefix used in serialized content digests.
pub const CONTENT_DIGEST_PREFIX: &str = "sha256:";

/// Digest a source fragment.
pub fn content_digest(source_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_text.as_bytes());
    let bytes: [u8; 32] = hasher.finalize().into();

    let mut out = String::with_capacity(CONTENT_DIGEST_PREFIX.len() + 64);
    out.push_str(CONTENT_DIGEST_PREFIX);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
