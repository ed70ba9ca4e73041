//! Bearer-token verification and HMAC payload signatures.
//!
//! Tokens are signed JSON claims using HS256 with a shared secret. The
//! service distinguishes expired tokens from every other failure mode so
//! the gateway can surface `AUTH_EXPIRED` vs the fixed `AUTH_INVALID`
//! (which deliberately never says which check failed). The secret is
//! supplied via configuration and never logged.

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use llmgate_core::{Permission, Principal, Role};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub role: Role,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    pub iat: i64,
    pub exp: i64,
    /// Token identifier for traceability.
    #[serde(default)]
    pub jti: String,
}

/// Authentication failure, split only as far as the error contract allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
}

/// Verifies (and mints) HS256 bearer tokens.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenService {
    /// Create a service around a shared secret.
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Verify a bearer token and derive the [`Principal`].
    ///
    /// The principal's permission set is the union of the token-carried
    /// permissions and the role's default grant, so the role→permission
    /// closure always holds.
    pub fn verify(&self, token: &str) -> Result<Principal, AuthFailure> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<TokenClaims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthFailure::Expired,
                _ => AuthFailure::Invalid,
            }
        })?;

        let claims = data.claims;
        let mut permissions: HashSet<Permission> = claims.permissions.iter().copied().collect();
        permissions.extend(claims.role.default_permissions());

        let expires_at: DateTime<Utc> = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or(AuthFailure::Invalid)?;

        Ok(Principal {
            subject: claims.sub,
            role: claims.role,
            permissions,
            expires_at,
        })
    }

    /// Mint a token for a subject. Used by tests and by operators
    /// bootstrapping service credentials.
    pub fn issue(
        &self,
        subject: &str,
        role: Role,
        permissions: &[Permission],
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: subject.to_string(),
            role,
            permissions: permissions.to_vec(),
            iat: now.timestamp(),
            exp: (now
                + chrono::Duration::from_std(self.ttl)
                    .unwrap_or_else(|_| chrono::Duration::zero()))
            .timestamp(),
            jti: Uuid::new_v4().simple().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    /// Mint a token with an explicit expiry offset (may be negative).
    /// Test and tooling aid.
    pub fn issue_with_expiry(
        &self,
        subject: &str,
        role: Role,
        permissions: &[Permission],
        expires_in: chrono::Duration,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: subject.to_string(),
            role,
            permissions: permissions.to_vec(),
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
            jti: Uuid::new_v4().simple().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }
}

/// Verifies HMAC-SHA256 signatures over raw payload bytes.
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl SignatureVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Hex-encoded HMAC-SHA256 of the payload.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time verification of a hex-encoded signature.
    pub fn verify(&self, payload: &[u8], signature_hex: &str) -> bool {
        let Ok(signature) = hex::decode(signature_hex) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(payload);
        mac.verify_slice(&signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new("test-secret", Duration::from_secs(900))
    }

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let token = service()
            .issue("svc-orders", Role::Service, &[Permission::Execute])
            .unwrap();
        let principal = service().verify(&token).unwrap();
        assert_eq!(principal.subject, "svc-orders");
        assert_eq!(principal.role, Role::Service);
        assert!(principal.has_permission(Permission::Execute));
        assert!(principal.expires_at > Utc::now());
    }

    #[test]
    fn test_role_closure_merged_into_permissions() {
        // Token carries no explicit permissions; the role grant applies.
        let token = service().issue("svc", Role::Service, &[]).unwrap();
        let principal = service().verify(&token).unwrap();
        assert!(principal.has_permission(Permission::Read));
        assert!(principal.has_permission(Permission::Execute));
        assert!(!principal.has_permission(Permission::PiiAccess));
    }

    #[test]
    fn test_extra_permissions_preserved() {
        let token = service()
            .issue("svc", Role::Service, &[Permission::PiiAccess])
            .unwrap();
        let principal = service().verify(&token).unwrap();
        assert!(principal.has_permission(Permission::PiiAccess));
    }

    #[test]
    fn test_expired_token_distinct_failure() {
        let token = service()
            .issue_with_expiry("svc", Role::Service, &[], chrono::Duration::seconds(-1))
            .unwrap();
        assert_eq!(service().verify(&token).unwrap_err(), AuthFailure::Expired);
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = service().issue("svc", Role::Service, &[]).unwrap();
        let other = TokenService::new("different-secret", Duration::from_secs(900));
        assert_eq!(other.verify(&token).unwrap_err(), AuthFailure::Invalid);
    }

    #[test]
    fn test_garbage_token_is_invalid() {
        assert_eq!(
            service().verify("not-a-token").unwrap_err(),
            AuthFailure::Invalid
        );
        assert_eq!(service().verify("").unwrap_err(), AuthFailure::Invalid);
    }

    #[test]
    fn test_tampered_token_is_invalid() {
        let token = service().issue("svc", Role::Service, &[]).unwrap();
        let mut tampered = token.clone();
        // Flip a character in the payload segment.
        let mid = token.len() / 2;
        tampered.replace_range(mid..mid + 1, if &token[mid..mid + 1] == "a" { "b" } else { "a" });
        assert_eq!(service().verify(&tampered).unwrap_err(), AuthFailure::Invalid);
    }

    #[test]
    fn test_signature_roundtrip() {
        let verifier = SignatureVerifier::new("hmac-secret");
        let payload = br#"{"model":"gpt-4","prompt":"hello"}"#;
        let signature = verifier.sign(payload);
        assert!(verifier.verify(payload, &signature));
    }

    #[test]
    fn test_signature_rejects_tampered_payload() {
        let verifier = SignatureVerifier::new("hmac-secret");
        let signature = verifier.sign(b"original");
        assert!(!verifier.verify(b"tampered", &signature));
    }

    #[test]
    fn test_signature_rejects_malformed_hex() {
        let verifier = SignatureVerifier::new("hmac-secret");
        assert!(!verifier.verify(b"payload", "zz-not-hex"));
    }
}
