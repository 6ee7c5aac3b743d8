//! Key/Secret service (C2).
//!
//! Opaque by design: the rest of the crate asks for a named secret and gets
//! bytes back, never knowing whether they came from the environment, a file,
//! or (in a future deployment) a proper secret manager. This is the seam the
//! project spec leaves unspecified beyond "provides signing secrets for
//! tokens"; a single environment-backed implementation is provided here so
//! the auth manager has something real to depend on.

use std::sync::Arc;

use rand::RngCore;

/// A named secret, resolved once at startup and held in memory for the
/// process lifetime. Not `Debug`/`Display` on purpose.
pub trait KeyProvider: Send + Sync {
    /// Returns the signing secret used for JWT HMAC signing.
    fn jwt_signing_secret(&self) -> &[u8];
}

/// Resolves the JWT signing secret from `AICO_JWT_SECRET`, falling back to a
/// freshly generated random secret for local/dev runs (logged once, loudly,
/// since tokens signed with it won't validate across restarts).
pub struct EnvKeyProvider {
    jwt_secret: Vec<u8>,
}

impl EnvKeyProvider {
    pub fn load() -> Self {
        let jwt_secret = match std::env::var("AICO_JWT_SECRET") {
            Ok(s) if !s.is_empty() => s.into_bytes(),
            _ => {
                tracing::warn!(
                    "AICO_JWT_SECRET not set; generating an ephemeral signing secret. \
                     Tokens will not validate across process restarts."
                );
                let mut buf = [0u8; 32];
                rand::rng().fill_bytes(&mut buf);
                buf.to_vec()
            }
        };
        Self { jwt_secret }
    }
}

impl KeyProvider for EnvKeyProvider {
    fn jwt_signing_secret(&self) -> &[u8] {
        &self.jwt_secret
    }
}

pub type SharedKeyProvider = Arc<dyn KeyProvider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_ephemeral_secret_when_env_unset() {
        std::env::remove_var("AICO_JWT_SECRET");
        let provider = EnvKeyProvider::load();
        assert_eq!(provider.jwt_signing_secret().len(), 32);
    }

    #[test]
    fn uses_env_secret_when_set() {
        std::env::set_var("AICO_JWT_SECRET", "test-secret-value");
        let provider = EnvKeyProvider::load();
        assert_eq!(provider.jwt_signing_secret(), b"test-secret-value");
        std::env::remove_var("AICO_JWT_SECRET");
    }
}
