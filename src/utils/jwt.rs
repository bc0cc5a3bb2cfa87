//! JWT issuance/verification. Tenant context is just the subject claim —
//! this crate has no role/permission system to enforce.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::utils::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The tenant's `user_id`.
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

pub struct JwtUtil {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_seconds: i64,
}

impl JwtUtil {
    pub fn new(secret: &str, expiry_seconds: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_seconds,
        }
    }

    pub fn issue_token(&self, user_id: &str) -> Result<String, ApiError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims { sub: user_id.to_string(), iat: now, exp: now + self.expiry_seconds };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::internal_error(format!("failed to issue token: {e}")))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| ApiError::unauthorized(format!("invalid token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_subject_claim() {
        let jwt = JwtUtil::new("test-secret", 3600);
        let token = jwt.issue_token("user-42").unwrap();
        let claims = jwt.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "user-42");
    }

    #[test]
    fn rejects_token_signed_with_different_secret() {
        let signer = JwtUtil::new("secret-a", 3600);
        let verifier = JwtUtil::new("secret-b", 3600);
        let token = signer.issue_token("user-1").unwrap();
        assert!(verifier.verify_token(&token).is_err());
    }
}
