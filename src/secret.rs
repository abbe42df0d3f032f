//! Turning user-supplied secret text into key bytes.
//!
//! Secrets reach this crate in whatever shape the account store kept them:
//! plain Base32, Base32 with spaces or dashes, an `otpauth://` URI, or a
//! `value|extra` compound. Nothing here is cached; every token computation
//! goes through [`prepare`] again.
//!
//! # Examples
//!
//! - Pull the secret out of a provisioning URI
//! ```
//! use totp_sync::secret;
//!
//! let raw = "otpauth://totp/ACME:alice?secret=jbsw-y3dp-ehpk-3pxp&issuer=ACME";
//! assert_eq!(secret::extract(raw), "jbsw-y3dp-ehpk-3pxp");
//! assert_eq!(secret::normalize(&secret::extract(raw)), "JBSWY3DPEHPK3PXP");
//! ```
//!
//! - Normalization pads to a whole number of Base32 blocks
//! ```
//! use totp_sync::secret;
//!
//! assert_eq!(secret::normalize("abc 234"), "ABC234==");
//! ```

use std::borrow::Cow;

use base32::Alphabet;
use thiserror::Error;
use zeroize::Zeroizing;

const OTPAUTH_SCHEME: &str = "otpauth://";
const SECRET_QUERY: &str = "secret";
const COMPOUND_DELIMITER: char = '|';

/// Different ways secret parsing failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecretParseError {
    /// Nothing to decode.
    #[error("Secret is empty.")]
    Empty,
    /// Normalized text contains characters outside `[A-Z2-7=]`.
    #[error("Secret contains characters outside the base32 alphabet.")]
    Alphabet,
    /// Invalid base32 input.
    #[error("Could not decode base32 secret.")]
    ParseBase32,
}

/// Pick the secret out of the stored text.
///
/// The part before the first `|` is kept, and if what remains is an
/// `otpauth://` URI its `secret` query parameter is used. A URI that does not
/// parse, or has no usable `secret`, is returned whole and left for the
/// alphabet check to reject.
pub fn extract(raw: &str) -> Cow<'_, str> {
    let mut clean = raw.trim();
    if let Some((head, _)) = clean.split_once(COMPOUND_DELIMITER) {
        clean = head;
    }

    if clean.starts_with(OTPAUTH_SCHEME) {
        if let Ok(uri) = url::Url::parse(clean) {
            let secret = uri
                .query_pairs()
                .find(|(key, value)| key == SECRET_QUERY && !value.is_empty())
                .map(|(_, value)| value.into_owned());
            if let Some(secret) = secret {
                return Cow::Owned(secret);
            }
        }
    }

    Cow::Borrowed(clean)
}

/// Canonicalize Base32 text: drop whitespace and dashes, uppercase, and pad
/// with `=` to a multiple of 8 characters.
///
/// Total and idempotent. Garbage in still yields a padded string; validity is
/// decided by [`is_strict_base32`].
pub fn normalize(raw: &str) -> String {
    let mut s: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect();
    let pad = (8 - s.chars().count() % 8) % 8;
    s.extend(std::iter::repeat('=').take(pad));
    s
}

/// `true` when `s` is non-empty and only made of `A-Z`, `2-7` and `=`.
pub fn is_strict_base32(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b) || b == b'=')
}

/// Decode a normalized secret into key bytes.
///
/// The returned buffer is wiped when dropped.
pub fn decode(normalized: &str) -> Result<Zeroizing<Vec<u8>>, SecretParseError> {
    if !is_strict_base32(normalized) {
        return Err(SecretParseError::Alphabet);
    }
    let unpadded = normalized.trim_end_matches('=');
    match base32::decode(Alphabet::Rfc4648 { padding: false }, unpadded) {
        Some(bytes) => Ok(Zeroizing::new(bytes)),
        None => Err(SecretParseError::ParseBase32),
    }
}

/// Full pipeline from stored text to key bytes: extract, normalize, check, decode.
pub fn prepare(raw: &str) -> Result<Zeroizing<Vec<u8>>, SecretParseError> {
    if raw.is_empty() {
        return Err(SecretParseError::Empty);
    }
    let normalized = Zeroizing::new(normalize(&extract(raw)));
    decode(&normalized)
}
