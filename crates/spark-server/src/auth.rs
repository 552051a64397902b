//! Bearer credential verification for the upgrade request.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use spark_core::{AuthError, CredentialVerifier, UserId};
use tracing::debug;

/// Claims carried by an access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

/// HS256 verifier backed by a shared secret.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.leeway = 0;
        Self {
            decoding_key: DecodingKey::from_secret(bytes),
            encoding_key: EncodingKey::from_secret(bytes),
            validation,
        }
    }

    pub fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!(error = ?e, "JWT validation failed");
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;
        if data.claims.user_id.is_empty() {
            return Err(AuthError::Invalid("empty userId claim".into()));
        }
        Ok(data.claims)
    }

    /// Sign a token for `user_id` valid for `ttl`.
    pub fn issue(&self, user_id: &UserId, email: Option<&str>, ttl: Duration) -> Result<String, AuthError> {
        let claims = Claims {
            user_id: user_id.as_str().to_owned(),
            email: email.map(str::to_owned),
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Invalid(e.to_string()))
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        self.decode_claims(token).map(|claims| UserId::from_raw(claims.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier(secret: &str) -> JwtVerifier {
        JwtVerifier::new(&SecretString::from(secret.to_owned()))
    }

    #[test]
    fn issued_token_verifies() {
        let v = verifier("s3cret");
        let token = v
            .issue(&UserId::from_raw("user-1"), Some("a@b.c"), Duration::hours(1))
            .unwrap();
        assert_eq!(v.verify(&token).unwrap().as_str(), "user-1");
        assert_eq!(v.decode_claims(&token).unwrap().email.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn empty_token_is_missing() {
        assert_eq!(verifier("s").verify(""), Err(AuthError::Missing));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = verifier("one")
            .issue(&UserId::from_raw("u"), None, Duration::hours(1))
            .unwrap();
        assert!(matches!(verifier("two").verify(&token), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn expired_token_is_expired() {
        let v = verifier("s");
        let token = v
            .issue(&UserId::from_raw("u"), None, Duration::hours(-1))
            .unwrap();
        assert_eq!(v.verify(&token), Err(AuthError::Expired));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(verifier("s").verify("not.a.jwt"), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn claims_use_camel_case_user_id() {
        let claims = Claims {
            user_id: "u".into(),
            email: None,
            exp: 1,
        };
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["userId"], "u");
        assert!(json.get("email").is_none());
    }
}
