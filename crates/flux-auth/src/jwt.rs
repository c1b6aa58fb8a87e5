use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{AuthError, Result};

const MIN_SECRET_LENGTH: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Stdlib-equivalent HS256 JWT issuance/verification, grounded on
/// `original_source/openclaw/jwt_auth.py`'s `JWTManager`. Rust gets
/// `hmac`+`sha2`+`base64` from the workspace stack instead of the
/// original's hand-rolled HMAC, but the wire format (compact
/// `header.payload.signature`, base64url no padding) is unchanged.
pub struct JwtManager {
    secret: Vec<u8>,
}

impl JwtManager {
    pub fn new(secret: &str) -> Result<Self> {
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(AuthError::SecretTooShort(MIN_SECRET_LENGTH));
        }
        Ok(Self {
            secret: secret.as_bytes().to_vec(),
        })
    }

    pub fn create_access_token(&self, user_id: &str, username: &str, role: &str, ttl_secs: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let header = Header {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        };
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            role: role.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };

        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let signing_input = format!("{header_b64}.{payload_b64}");
        let signature_b64 = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes()));

        format!("{signing_input}.{signature_b64}")
    }

    pub fn create_refresh_token(&self) -> String {
        let bytes: [u8; 32] = rand::random();
        hex::encode(bytes)
    }

    /// Returns the decoded claims on success; `None` on any format,
    /// signature, algorithm, or expiry failure — mirrors the Python
    /// original's blanket "return None on anything wrong" behavior so
    /// callers can't distinguish failure reasons from the return value
    /// alone (that distinction lives in audit logging instead).
    pub fn verify(&self, token: &str) -> Option<Claims> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return None;
        }
        let (header_b64, payload_b64, signature_b64) = (parts[0], parts[1], parts[2]);

        let signing_input = format!("{header_b64}.{payload_b64}");
        let provided_sig = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&provided_sig).ok()?;

        let header_bytes = URL_SAFE_NO_PAD.decode(header_b64).ok()?;
        let header: Header = serde_json::from_slice(&header_bytes).ok()?;
        if header.alg != "HS256" {
            return None;
        }

        let payload_bytes = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
        let claims: Claims = serde_json::from_slice(&payload_bytes).ok()?;

        if claims.exp < chrono::Utc::now().timestamp() {
            return None;
        }

        Some(claims)
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JwtManager {
        JwtManager::new("a-sufficiently-long-test-signing-secret-value").unwrap()
    }

    #[test]
    fn round_trips_valid_token() {
        let mgr = manager();
        let token = mgr.create_access_token("u1", "alice", "admin", 3600);
        let claims = mgr.verify(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn rejects_tampered_signature() {
        let mgr = manager();
        let mut token = mgr.create_access_token("u1", "alice", "user", 3600);
        token.push('x');
        assert!(mgr.verify(&token).is_none());
    }

    #[test]
    fn rejects_expired_token() {
        let mgr = manager();
        let token = mgr.create_access_token("u1", "alice", "user", -10);
        assert!(mgr.verify(&token).is_none());
    }

    #[test]
    fn rejects_non_hs256_alg() {
        let mgr = manager();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"u1","username":"x","role":"user","iat":0,"exp":9999999999}"#);
        let forged = format!("{header}.{payload}.");
        assert!(mgr.verify(&forged).is_none());
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(JwtManager::new("too-short").is_err());
    }
}
