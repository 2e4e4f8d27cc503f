//! Webhook signature verification.
//!
//! Inbound webhooks carry a timestamp header and an HMAC-SHA256 signature
//! header of the form `v1=<hex>`. The signed message is
//! `v1:{timestamp}:{raw body bytes}` — the exact bytes received on the wire,
//! never a re-serialized form of a parsed body. Timestamp checks run before
//! any signature computation so a stale or malformed request never costs an
//! HMAC.

use std::fmt;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature scheme version tag. Appears in both the signed message
/// (`v1:{ts}:{body}`) and the header prefix (`v1=<hex>`).
const SIGNATURE_VERSION: &str = "v1";

/// Header prefix: version tag plus delimiter.
const SIGNATURE_PREFIX: &str = "v1=";

/// Default freshness window in seconds (replay-attack bound).
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Why a webhook was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Signature or timestamp header absent or empty.
    MissingHeader,
    /// Timestamp header is not an integer.
    MalformedTimestamp,
    /// Timestamp outside the freshness window.
    StaleTimestamp { age_secs: i64 },
    /// Signature header lacks the `v1=` prefix or is not a 64-char hex digest.
    MalformedSignature,
    /// Computed signature does not match the provided one.
    SignatureMismatch,
}

impl VerifyError {
    /// Stable reason code for logging and HTTP error bodies.
    pub fn reason(&self) -> &'static str {
        match self {
            VerifyError::MissingHeader => "missing_header",
            VerifyError::MalformedTimestamp => "malformed_timestamp",
            VerifyError::StaleTimestamp { .. } => "stale_timestamp",
            VerifyError::MalformedSignature => "malformed_signature",
            VerifyError::SignatureMismatch => "signature_mismatch",
        }
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::MissingHeader => write!(f, "signature or timestamp header missing"),
            VerifyError::MalformedTimestamp => write!(f, "timestamp is not an integer"),
            VerifyError::StaleTimestamp { age_secs } => {
                write!(f, "timestamp outside freshness window ({}s old)", age_secs)
            }
            VerifyError::MalformedSignature => {
                write!(f, "signature does not match 'v1=<hex>' format")
            }
            VerifyError::SignatureMismatch => write!(f, "signature mismatch"),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Verifies webhook signatures against a shared secret.
///
/// Stateless apart from the immutable secret and tolerance; safe to share
/// across concurrent requests.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    /// Creates a verifier with the default 300-second freshness window.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self::with_tolerance(secret, DEFAULT_TOLERANCE_SECS)
    }

    /// Creates a verifier with a custom freshness window.
    pub fn with_tolerance(secret: impl Into<Vec<u8>>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Verifies a webhook against the current clock.
    ///
    /// Returns the verified timestamp (Unix seconds) on success.
    ///
    /// Checks run in order, short-circuiting on the first failure:
    /// 1. Both headers present and non-empty
    /// 2. Timestamp parses as an integer
    /// 3. `|now - timestamp| <= tolerance`
    /// 4. Signature header matches `v1=<64 hex chars>`
    /// 5. HMAC-SHA256 over `v1:{timestamp}:{body}` matches, compared in
    ///    constant time
    pub fn verify(
        &self,
        body: &[u8],
        signature_header: &str,
        timestamp_header: &str,
    ) -> Result<i64, VerifyError> {
        self.verify_at(body, signature_header, timestamp_header, Utc::now().timestamp())
    }

    /// Same as [`verify`](Self::verify) with an explicit clock, for boundary
    /// testing.
    pub fn verify_at(
        &self,
        body: &[u8],
        signature_header: &str,
        timestamp_header: &str,
        now: i64,
    ) -> Result<i64, VerifyError> {
        if signature_header.is_empty() || timestamp_header.is_empty() {
            return Err(VerifyError::MissingHeader);
        }

        let timestamp: i64 = timestamp_header
            .trim()
            .parse()
            .map_err(|_| VerifyError::MalformedTimestamp)?;

        // The timestamp is attacker-controlled and may sit at the i64
        // extremes, where a plain subtraction or abs() overflows. Saturate:
        // an unrepresentable age is stale by any tolerance.
        let age_secs = now
            .checked_sub(timestamp)
            .map_or(i64::MAX, |delta| delta.checked_abs().unwrap_or(i64::MAX));
        if age_secs > self.tolerance_secs {
            return Err(VerifyError::StaleTimestamp { age_secs });
        }

        let provided = signature_header
            .strip_prefix(SIGNATURE_PREFIX)
            .ok_or(VerifyError::MalformedSignature)?;
        if provided.len() != 64 || !provided.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(VerifyError::MalformedSignature);
        }

        let expected = compute_digest(body, timestamp, &self.secret);

        if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
            return Err(VerifyError::SignatureMismatch);
        }

        Ok(timestamp)
    }
}

/// Computes the full signature header value (`v1=<hex>`) for a body and
/// timestamp. Used by outbound signing and by tests to build reference
/// signatures.
pub fn sign(body: &[u8], timestamp: i64, secret: &[u8]) -> String {
    format!("{}={}", SIGNATURE_VERSION, compute_digest(body, timestamp, secret))
}

/// HMAC-SHA256 hex digest of `v1:{timestamp}:{body}`.
fn compute_digest(body: &[u8], timestamp: i64, secret: &[u8]) -> String {
    // HMAC-SHA256 accepts keys of any length, so this cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(format!("{}:{}:", SIGNATURE_VERSION, timestamp).as_bytes());
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time byte comparison.
///
/// Length check first, then a branch-free XOR fold whose running time is
/// independent of where the first mismatch occurs. A naive equality here
/// would leak the position of the first differing byte and let an attacker
/// recover the secret digest byte-by-byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
