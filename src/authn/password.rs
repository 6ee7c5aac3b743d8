//! Argon2id password hashing (C7), OWASP-recommended parameters.

use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as Argon2Hasher, PasswordVerifier,
        SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordConfig {
    pub memory_cost_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
    pub min_password_length: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost_kib: 19_456,
            time_cost: 2,
            parallelism: 1,
            min_password_length: 8,
        }
    }
}

/// Hashes and verifies passwords with Argon2id. Never logs or stores plaintext.
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
    min_password_length: usize,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(PasswordConfig::default())
    }
}

impl PasswordHasher {
    pub fn new(config: PasswordConfig) -> Self {
        let params = Params::new(
            config.memory_cost_kib,
            config.time_cost,
            config.parallelism,
            None,
        )
        .expect("invalid argon2 parameters");

        Self {
            params,
            min_password_length: config.min_password_length,
        }
    }

    pub fn hash(&self, password: &str) -> Result<String, Error> {
        if password.len() < self.min_password_length {
            return Err(Error::Validation(format!(
                "password must be at least {} characters",
                self.min_password_length
            )));
        }

        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::Internal(format!("password hash failed: {e}")))?;
        Ok(hash.to_string())
    }

    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, Error> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| Error::Internal(format!("invalid password hash format: {e}")))?;
        let argon2 = Argon2::default();
        match argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::Internal(format!("password verify failed: {e}"))),
        }
    }

    pub fn needs_rehash(&self, hash: &str) -> bool {
        let Ok(parsed_hash) = PasswordHash::new(hash) else {
            return true;
        };

        if parsed_hash.algorithm != argon2::Algorithm::Argon2id.ident() {
            return true;
        }

        let Some(version) = parsed_hash.version else {
            return true;
        };
        if version != 19 {
            return true;
        }

        let params = &parsed_hash.params;
        let m = params
            .iter()
            .find(|(k, _)| k.as_str() == "m")
            .and_then(|(_, v)| v.decimal().ok());
        let t = params
            .iter()
            .find(|(k, _)| k.as_str() == "t")
            .and_then(|(_, v)| v.decimal().ok());
        let p = params
            .iter()
            .find(|(k, _)| k.as_str() == "p")
            .and_then(|(_, v)| v.decimal().ok());

        m != Some(self.params.m_cost()) || t != Some(self.params.t_cost()) || p != Some(self.params.p_cost())
    }

    pub fn min_password_length(&self) -> usize {
        self.min_password_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hasher = PasswordHasher::default();
        let password = "test_password_123";

        let hash = hasher.hash(password).expect("hash succeeds");
        assert!(hash.starts_with("$argon2id$"));

        assert!(hasher.verify(password, &hash).expect("verify succeeds"));
        assert!(!hasher.verify("wrong_password", &hash).expect("verify succeeds"));
    }

    #[test]
    fn password_too_short_is_rejected() {
        let hasher = PasswordHasher::default();
        let result = hasher.hash("short");
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn custom_min_length_is_enforced() {
        let config = PasswordConfig {
            min_password_length: 12,
            ..Default::default()
        };
        let hasher = PasswordHasher::new(config);

        assert!(hasher.hash("0123456789").is_err());
        assert!(hasher.hash("012345678901").is_ok());
    }

    #[test]
    fn needs_rehash_detects_param_change() {
        let hasher1 = PasswordHasher::new(PasswordConfig {
            memory_cost_kib: 32_768,
            ..Default::default()
        });
        let hash = hasher1.hash("test_password_123").unwrap();

        let hasher2 = PasswordHasher::new(PasswordConfig {
            memory_cost_kib: 65_536,
            ..Default::default()
        });

        assert!(hasher2.needs_rehash(&hash));
        assert!(!hasher1.needs_rehash(&hash));
    }

    #[test]
    fn invalid_hash_format_errors() {
        let hasher = PasswordHasher::default();
        assert!(hasher.verify("password", "not_a_valid_hash").is_err());
    }

    #[test]
    fn same_password_hashes_differently_each_time() {
        let hasher = PasswordHasher::default();
        let password = "test_password_123";

        let hash1 = hasher.hash(password).unwrap();
        let hash2 = hasher.hash(password).unwrap();

        assert_ne!(hash1, hash2);
        assert!(hasher.verify(password, &hash1).unwrap());
        assert!(hasher.verify(password, &hash2).unwrap());
    }
}
