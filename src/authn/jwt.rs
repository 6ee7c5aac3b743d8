//! JWT signing and verification (part of C7). Claims shape and default
//! algorithm follow the project's bearer-token wire format: HMAC-SHA256 by
//! default, issuer `"aico-api-gateway"`, `sub` mirrors `user_uuid`.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::error::{Error, Result};
use crate::keys::SharedKeyProvider;

use super::claims::{Claims, TokenType, UserIdentity};

pub struct JwtCodec {
    config: JwtConfig,
    keys: SharedKeyProvider,
}

impl JwtCodec {
    pub fn new(config: JwtConfig, keys: SharedKeyProvider) -> Self {
        Self { config, keys }
    }

    fn algorithm(&self) -> jsonwebtoken::Algorithm {
        match self.config.algorithm.as_str() {
            "HS384" => jsonwebtoken::Algorithm::HS384,
            "HS512" => jsonwebtoken::Algorithm::HS512,
            _ => jsonwebtoken::Algorithm::HS256,
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        let header = Header::new(self.algorithm());
        let key = EncodingKey::from_secret(self.keys.jwt_signing_secret());
        Ok(encode(&header, claims, &key)?)
    }

    /// Composes access-token claims and signs them. Does not touch the
    /// session store; callers create the session row separately so the two
    /// can be wrapped in whatever transactional boundary the caller needs.
    pub fn generate_access_token(&self, identity: &UserIdentity) -> Result<(String, Claims)> {
        self.generate(identity, TokenType::Access, self.config.access_ttl_secs)
    }

    pub fn generate_refresh_token(&self, identity: &UserIdentity) -> Result<(String, Claims)> {
        self.generate(identity, TokenType::Refresh, self.config.refresh_ttl_secs)
    }

    fn generate(&self, identity: &UserIdentity, token_type: TokenType, ttl_secs: i64) -> Result<(String, Claims)> {
        let now = chrono::Utc::now().timestamp();
        let mut permissions = identity.permissions.clone();
        permissions.sort();

        let claims = Claims {
            sub: identity.user_uuid,
            user_uuid: identity.user_uuid,
            username: identity.username.clone(),
            roles: identity.roles.clone(),
            permissions,
            iat: now,
            exp: now + ttl_secs,
            iss: self.config.issuer.clone(),
            token_type,
        };

        let token = self.sign(&claims)?;
        Ok((token, claims))
    }

    /// Verifies signature and expiry and decodes claims. Does not consult the
    /// session store; that is layered on top by the auth manager.
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let key = DecodingKey::from_secret(self.keys.jwt_signing_secret());
        let mut validation = Validation::new(self.algorithm());
        validation.set_issuer(&[self.config.issuer.clone()]);

        let data = decode::<Claims>(token, &key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => Error::Authentication("token expired".to_string()),
                _ => Error::Authentication("invalid token".to_string()),
            }
        })?;

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::EnvKeyProvider;
    use std::sync::Arc;

    fn codec() -> JwtCodec {
        JwtCodec::new(
            JwtConfig {
                algorithm: "HS256".to_string(),
                issuer: "aico-api-gateway".to_string(),
                access_ttl_secs: 900,
                refresh_ttl_secs: 7 * 24 * 3600,
            },
            Arc::new(EnvKeyProvider::load()),
        )
    }

    fn identity() -> UserIdentity {
        UserIdentity {
            user_uuid: Uuid::new_v4(),
            username: "alice".to_string(),
            roles: vec!["user".to_string()],
            permissions: vec!["conversation.*".to_string()],
            metadata: Default::default(),
        }
    }

    #[test]
    fn signed_access_token_round_trips() {
        let codec = codec();
        let identity = identity();
        let (token, claims) = codec.generate_access_token(&identity).unwrap();

        let decoded = codec.decode(&token).unwrap();
        assert_eq!(decoded.user_uuid, claims.user_uuid);
        assert_eq!(decoded.token_type, TokenType::Access);
        assert_eq!(decoded.permissions, vec!["conversation.*".to_string()]);
    }

    #[test]
    fn expired_token_is_rejected() {
        let codec = codec();
        let mut claims = codec.generate_access_token(&identity()).unwrap().1;
        claims.exp = chrono::Utc::now().timestamp() - 10;
        let token = codec.sign(&claims).unwrap();

        let result = codec.decode(&token);
        assert!(matches!(result, Err(Error::Authentication(_))));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let codec = codec();
        let (mut token, _) = codec.generate_access_token(&identity()).unwrap();
        token.push('x');
        assert!(codec.decode(&token).is_err());
    }
}
