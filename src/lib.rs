//! This library computes TOTP display codes against a network-corrected clock. Codes follow [rfc-6238](https://tools.ietf.org/html/rfc6238), the clock offset is estimated from plain HTTP time providers, and a producer yields the previous, current and next codes around the corrected time
//!
//! Code generation never fails: an empty or malformed secret yields a sentinel [`Token`] and the clock falls back to local time when no provider answers.
//!
//! # Examples
//!
//! ```rust
//! use totp_sync::TotpEngine;
//!
//! let engine = TotpEngine::default();
//! let result = engine.generate("JBSWY3DPEHPK3PXP", 59_000);
//! assert_eq!(result.display(), "996554");
//! assert_eq!(result.remaining, 1);
//!
//! assert_eq!(engine.generate("", 59_000).display(), "------");
//! assert_eq!(engine.generate("not base32!", 59_000).display(), "ERROR");
//! ```
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use totp_sync::{SyncConfig, SyncContext, WindowCodeProducer};
//!
//! # async fn run() -> Result<(), totp_sync::ConfigError> {
//! let ctx = Arc::new(SyncContext::from_config(&SyncConfig::default())?);
//! ctx.sync().await;
//! let producer = WindowCodeProducer::new(ctx);
//! let codes = producer.window("JBSWY3DPEHPK3PXP");
//! println!("{} {} {}", codes.previous.display(), codes.current.display(), codes.next.display());
//! # Ok(())
//! # }
//! ```

pub mod clock;
mod error;
pub mod probe;
mod rfc;
pub mod secret;
pub mod sync;
pub mod window;

pub use clock::{Clock, SystemClock};
pub use error::{ConfigError, ProbeError};
pub use rfc::{Rfc6238Error, MAX_STEP};
pub use secret::SecretParseError;
pub use sync::{ClockState, ProbeSample, ProviderConfig, SyncConfig, SyncContext, SyncOutcome};
pub use window::{Tick, Ticker, TickerHandle, TimeSource, WindowCodeProducer, WindowCodes};

#[cfg(feature = "serde_support")]
use serde::{Deserialize, Serialize};

use core::fmt;

use hmac::Mac;

type HmacSha1 = hmac::Hmac<sha1::Sha1>;
type HmacSha256 = hmac::Hmac<sha2::Sha256>;
type HmacSha512 = hmac::Hmac<sha2::Sha512>;

/// Rendering of [`Token::Empty`].
pub const EMPTY_DISPLAY: &str = "------";
/// Rendering of [`Token::Malformed`].
pub const MALFORMED_DISPLAY: &str = "ERROR";

/// Algorithm enum holds the three standards algorithms for TOTP as per the [reference implementation](https://tools.ietf.org/html/rfc6238#appendix-A)
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub enum Algorithm {
    #[default]
    SHA1,
    SHA256,
    SHA512,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::SHA1 => f.write_str("SHA1"),
            Algorithm::SHA256 => f.write_str("SHA256"),
            Algorithm::SHA512 => f.write_str("SHA512"),
        }
    }
}

impl Algorithm {
    fn hash<D>(mut digest: D, data: &[u8]) -> Vec<u8>
    where
        D: Mac,
    {
        digest.update(data);
        digest.finalize().into_bytes().to_vec()
    }

    fn sign(&self, key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
        Some(match self {
            Algorithm::SHA1 => Algorithm::hash(HmacSha1::new_from_slice(key).ok()?, data),
            Algorithm::SHA256 => Algorithm::hash(HmacSha256::new_from_slice(key).ok()?, data),
            Algorithm::SHA512 => Algorithm::hash(HmacSha512::new_from_slice(key).ok()?, data),
        })
    }
}

/// What a code slot shows.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub enum Token {
    /// A zero-padded numeric code.
    Code(String),
    /// No secret was supplied.
    Empty,
    /// The secret could not be turned into a key.
    Malformed,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Code(code) => f.write_str(code),
            Token::Empty => f.write_str(EMPTY_DISPLAY),
            Token::Malformed => f.write_str(MALFORMED_DISPLAY),
        }
    }
}

/// One computed code with its timing. Built fresh for every call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct TokenResult {
    pub token: Token,
    /// Step length in seconds.
    pub period: u64,
    /// Seconds left in the current step, `0` for sentinels.
    pub remaining: u64,
}

impl TokenResult {
    fn sentinel(token: Token, period: u64) -> Self {
        Self {
            token,
            period,
            remaining: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.token, Token::Code(_))
    }

    /// The code, or `"------"` / `"ERROR"`.
    pub fn display(&self) -> String {
        self.token.to_string()
    }
}

/// TotpEngine holds the parameters used to turn a secret and a timestamp into a code. It keeps no key material between calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotpEngine {
    /// SHA-1 is the most widespread algorithm used, and for totp pursposes, SHA-1 hash collisions are [not a problem](https://tools.ietf.org/html/rfc4226#appendix-B.2) as HMAC-SHA-1 is not impacted
    algorithm: Algorithm,
    /// The number of digits composing the auth code. Per [rfc-4226](https://tools.ietf.org/html/rfc4226#section-5.3), this can oscilate between 6 and 8 digits
    digits: usize,
    /// Duration in seconds of a step. The recommended value per [rfc-6238](https://tools.ietf.org/html/rfc6238#section-5.2) is 30 seconds
    step: u64,
}

impl Default for TotpEngine {
    fn default() -> Self {
        TotpEngine {
            algorithm: Algorithm::SHA1,
            digits: 6,
            step: 30,
        }
    }
}

impl TotpEngine {
    /// Will create a new engine with given algorithm, digits and step
    ///
    /// # Errors
    ///
    /// Will return an error if `digits` is lower than 6 or higher than 8, or `step` is zero or longer than [`MAX_STEP`]
    pub fn new(algorithm: Algorithm, digits: usize, step: u64) -> Result<Self, Rfc6238Error> {
        rfc::assert_digits(digits)?;
        rfc::assert_step(step)?;
        Ok(TotpEngine {
            algorithm,
            digits,
            step,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn digits(&self) -> usize {
        self.digits
    }

    /// Step length in seconds.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Step length in milliseconds.
    pub fn step_ms(&self) -> i64 {
        self.step as i64 * 1000
    }

    /// The moving factor for a timestamp in milliseconds, floored towards negative infinity
    pub fn counter(&self, timestamp_ms: i64) -> i64 {
        timestamp_ms.div_euclid(self.step_ms())
    }

    /// Seconds left before the code at `timestamp_ms` changes, between 1 and `step`
    pub fn remaining(&self, timestamp_ms: i64) -> u64 {
        let secs = timestamp_ms.div_euclid(1000);
        self.step - secs.rem_euclid(self.step as i64) as u64
    }

    /// Returns the timestamp of the first millisecond for the next step
    /// given the provided timestamp in milliseconds
    pub fn next_step_ms(&self, timestamp_ms: i64) -> i64 {
        self.counter(timestamp_ms)
            .saturating_add(1)
            .saturating_mul(self.step_ms())
    }

    /// Will generate a code for `secret_raw` at the provided timestamp in milliseconds
    ///
    /// Never fails: an empty secret gives [`Token::Empty`] and anything that does not decode to a key gives [`Token::Malformed`]
    pub fn generate(&self, secret_raw: &str, timestamp_ms: i64) -> TokenResult {
        let key = match secret::prepare(secret_raw) {
            Ok(key) => key,
            Err(SecretParseError::Empty) => return TokenResult::sentinel(Token::Empty, self.step),
            Err(_) => return TokenResult::sentinel(Token::Malformed, self.step),
        };

        match self.truncate(&key, self.counter(timestamp_ms)) {
            Some(code) => TokenResult {
                token: Token::Code(code),
                period: self.step,
                remaining: self.remaining(timestamp_ms),
            },
            None => TokenResult::sentinel(Token::Malformed, self.step),
        }
    }

    fn truncate(&self, key: &[u8], counter: i64) -> Option<String> {
        let result = self.algorithm.sign(key, &counter.to_be_bytes())?;
        let offset = (result.last()? & 15) as usize;
        let word: [u8; 4] = result.get(offset..offset + 4)?.try_into().ok()?;
        let result = u32::from_be_bytes(word) & 0x7fff_ffff;
        Some(format!(
            "{1:00$}",
            self.digits,
            result % 10_u32.pow(self.digits as u32)
        ))
    }
}
