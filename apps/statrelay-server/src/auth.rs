use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session token lifetime.
pub const SESSION_TOKEN_TTL_SECS: i64 = 15 * 60;

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: Uuid,
    /// Expiry timestamp, seconds since epoch.
    pub exp: i64,
}

/// HS256 signer/verifier for session tokens.
pub struct SessionTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionTokens {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Mints a session token. Returns the token and its expiry time.
    pub fn mint(
        &self,
        user_id: Uuid,
    ) -> Result<(String, DateTime<Utc>), jsonwebtoken::errors::Error> {
        let expires_at = Utc::now() + TimeDelta::seconds(SESSION_TOKEN_TTL_SECS);
        let claims = SessionClaims {
            user_id,
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        Ok((token, expires_at))
    }

    /// Verifies a session token's signature and expiry.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, jsonwebtoken::errors::Error> {
        let data = decode::<SessionClaims>(token, &self.decoding, &Validation::default())?;
        Ok(data.claims)
    }
}

/// Binary rendering of an authentication response:
/// `u64 µs-epoch expiry ∥ u16 token length ∥ token bytes`, little-endian.
pub fn encode_auth_response_stream(token: &str, expires_at: DateTime<Utc>) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 2 + token.len());
    out.extend_from_slice(&(expires_at.timestamp_micros() as u64).to_le_bytes());
    out.extend_from_slice(&(token.len() as u16).to_le_bytes());
    out.extend_from_slice(token.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    use super::{encode_auth_response_stream, SessionClaims, SessionTokens};

    #[test]
    fn mint_and_verify_round_trip() {
        let tokens = SessionTokens::new(b"test-signing-key");
        let user_id = Uuid::new_v4();

        let (token, expires_at) = tokens.mint(user_id).expect("mint");
        assert!(expires_at > Utc::now());

        let claims = tokens.verify(&token).expect("verify");
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.exp, expires_at.timestamp());
    }

    #[test]
    fn expired_token_is_rejected() {
        let secret = b"test-signing-key";
        let tokens = SessionTokens::new(secret);
        let claims = SessionClaims {
            user_id: Uuid::new_v4(),
            exp: (Utc::now() - TimeDelta::seconds(120)).timestamp(),
        };
        let stale = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret),
        )
        .expect("encode");

        assert!(tokens.verify(&stale).is_err());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let tokens = SessionTokens::new(b"key-a");
        let (token, _) = tokens.mint(Uuid::new_v4()).expect("mint");

        let other = SessionTokens::new(b"key-b");
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn stream_response_layout_is_stable() {
        let expires_at = Utc.timestamp_micros(1_700_000_000_000_000).single().expect("valid");
        let bytes = encode_auth_response_stream("tok", expires_at);

        let mut expected = Vec::new();
        expected.extend_from_slice(&1_700_000_000_000_000_u64.to_le_bytes());
        expected.extend_from_slice(&3_u16.to_le_bytes());
        expected.extend_from_slice(b"tok");
        assert_eq!(bytes, expected);
    }
}
