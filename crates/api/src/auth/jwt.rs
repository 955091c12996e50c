//! RS256 JWT verification and signing.
//!
//! The server only verifies: it holds the public key and rejects anything
//! not signed with RS256 by the matching private key, or missing `exp`/
//! `iat`, or whose `sub` is not a UUID. Signing lives here too so the `jwt`
//! CLI subcommand and the tests mint tokens through the same code path.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use lookout_core::{Error, Kind, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Registered claims carried by every access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id as a UUID string.
    pub sub: String,
    /// Expiration time (UTC Unix timestamp). Required.
    pub exp: i64,
    /// Issued-at time (UTC Unix timestamp). Required.
    pub iat: i64,
    /// Not-before time (UTC Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
}

/// Verifies bearer tokens against the configured RSA public key.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Build a verifier from a PEM-encoded RSA public key.
    ///
    /// The algorithm allow-list is exactly RS256; `exp`, `iat`, and `sub`
    /// must be present.
    pub fn new(public_key_pem: &str) -> Result<Self, Error> {
        let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| Error::wrap(Kind::Internal, e, "could not parse public key"))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Ok(Self { key, validation })
    }

    /// Validate the token and extract the user id from its subject.
    pub fn verify(&self, token: &str) -> Result<UserId, Error> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| Error::wrap(Kind::Unauthorized, e, "could not parse token"))?;

        Uuid::parse_str(&data.claims.sub)
            .map_err(|_| Error::new(Kind::Unauthorized, "invalid subject"))
    }
}

/// Sign an RS256 token for the given subject, valid for `ttl`.
pub fn sign_token(
    private_key_pem: &str,
    subject: UserId,
    ttl: chrono::Duration,
) -> Result<String, Error> {
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| Error::wrap(Kind::Internal, e, "could not parse private key"))?;

    let now = Utc::now();
    let claims = Claims {
        sub: subject.to_string(),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
        nbf: Some(now.timestamp()),
    };

    encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| Error::wrap(Kind::Internal, e, "could not sign token"))
}
