//! API credential management
//!
//! Exchange keys loaded from the environment. Raw values never reach log
//! output: both formatting traits render a short tail fingerprint, enough
//! to tell two keys apart without exposing either.

use std::fmt;

/// Shortest credential length that still gets a visible fingerprint;
/// anything shorter renders as the bare redaction marker.
const FINGERPRINT_MIN_LEN: usize = 12;

/// An API credential whose raw value must never appear in logs.
///
/// `Debug` and `Display` both render [`fingerprint`](Secret::fingerprint).
/// The raw value is only reachable through [`reveal`](Secret::reveal),
/// for signing and auth headers at the REST boundary.
#[derive(Clone, Default)]
pub struct Secret(String);

impl Secret {
    /// Read a credential from the named environment variable, trimming
    /// whitespace. A missing variable yields an unset secret.
    pub fn from_env(var: &str) -> Self {
        Secret(
            std::env::var(var)
                .unwrap_or_default()
                .trim()
                .to_string(),
        )
    }

    /// The raw value. Never log what this returns.
    pub fn reveal(&self) -> &str {
        &self.0
    }

    pub fn is_set(&self) -> bool {
        !self.0.is_empty()
    }

    /// Log-safe rendering: the last four characters behind a redaction
    /// marker, or the marker alone for unset or short values.
    pub fn fingerprint(&self) -> String {
        if self.0.len() < FINGERPRINT_MIN_LEN {
            return "[redacted]".to_string();
        }
        format!("[redacted]{}", &self.0[self.0.len() - 4..])
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", self.fingerprint())
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

/// Exchange API credentials.
///
/// Both values are [`Secret`]s, so logging a `Credentials` (or anything
/// holding one) leaks fingerprints at most. Signed operations and the
/// user-data stream need both to be set.
#[derive(Clone, Debug)]
pub struct Credentials {
    /// API key, sent as the `X-MBX-APIKEY` header
    pub api_key: Secret,
    /// Private HMAC signing key
    pub api_secret: Secret,
}

impl Credentials {
    /// Load from `BINANCE_API_KEY` / `BINANCE_API_SECRET`.
    ///
    /// Missing variables yield unset secrets; signed calls then fail with
    /// a configuration error at the call site instead of at startup, so
    /// market-data-only runs remain possible.
    pub fn from_env() -> Self {
        Self {
            api_key: Secret::from_env("BINANCE_API_KEY"),
            api_secret: Secret::from_env("BINANCE_API_SECRET"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_set() && self.api_secret.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_shows_tail_only() {
        let s = Secret("abcdefghijklmnop".to_string());
        assert_eq!(s.fingerprint(), "[redacted]mnop");
        assert_eq!(format!("{:?}", s), "Secret([redacted]mnop)");
        assert_eq!(format!("{}", s), "[redacted]mnop");
    }

    #[test]
    fn test_short_or_unset_secret_fully_redacted() {
        assert_eq!(Secret("short".to_string()).fingerprint(), "[redacted]");
        let unset = Secret::default();
        assert_eq!(unset.fingerprint(), "[redacted]");
        assert!(!unset.is_set());
    }

    #[test]
    fn test_credentials_configured_requires_both() {
        let creds = Credentials {
            api_key: Secret("k".repeat(16)),
            api_secret: Secret::default(),
        };
        assert!(!creds.is_configured());

        let creds = Credentials {
            api_key: Secret("k".repeat(16)),
            api_secret: Secret("s".repeat(16)),
        };
        assert!(creds.is_configured());
    }
}
