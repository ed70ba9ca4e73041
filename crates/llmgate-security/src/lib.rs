//! Security engines for LLMGate
//!
//! This crate provides the CPU-bound security components on the request
//! path: regex-based PII detection with redaction and tokenization, a
//! prompt-injection detector, the bearer-token service, and the RBAC/ABAC
//! authorization policy.

use sha2::{Digest, Sha256};

pub mod authz;
pub mod injection;
pub mod pii;
pub mod token;

pub use authz::{AuthzDecision, AuthzPolicy, ResourceAttributes};
pub use injection::{InjectionEngine, InjectionReport};
pub use pii::{PiiEngine, PiiMatch, PiiReport, Redactor, Tokenizer};
pub use token::{AuthFailure, SignatureVerifier, TokenClaims, TokenService};

/// Number of hex characters kept from a SHA-256 digest for fingerprints.
const FINGERPRINT_LEN: usize = 16;

/// Compute a short, non-reversible fingerprint of arbitrary text.
///
/// Used for prompt/response fingerprints in events and for principal
/// hashes in audit records, so raw content never reaches a sink.
#[must_use]
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..FINGERPRINT_LEN].to_string()
}
