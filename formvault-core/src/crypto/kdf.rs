//! Argon2id key derivation for password-protected exports.
//!
//! The derived key is distinct from the installation storage key: it is
//! computed from a user-supplied password per export/import and never
//! persisted. The salt and parameters travel inside the export envelope.

use crate::crypto::{CryptoError, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Parameters for Argon2id export-key derivation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub m_cost: u32,

    /// Time cost (iterations)
    pub t_cost: u32,

    /// Parallelism (lanes)
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 65_536, // 64 MiB
            t_cost: 3,
            p_cost: 1,
        }
    }
}

impl KdfParams {
    /// Reject parameters weak enough to make password exports pointless
    pub fn validate(&self) -> Result<()> {
        if self.m_cost < 8_192 {
            return Err(CryptoError::KdfFailed(
                "memory cost too low (minimum: 8 MiB)".to_string(),
            ));
        }
        if self.t_cost < 1 {
            return Err(CryptoError::KdfFailed("time cost too low".to_string()));
        }
        if self.p_cost < 1 {
            return Err(CryptoError::KdfFailed("parallelism too low".to_string()));
        }
        Ok(())
    }
}

/// Generate a fresh random 16-byte salt
pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 32-byte export key from a password and salt
pub fn derive_export_key(password: &str, salt: &[u8], params: &KdfParams) -> Result<[u8; 32]> {
    params.validate()?;

    let argon_params = Params::new(params.m_cost, params.t_cost, params.p_cost, Some(32))
        .map_err(|e| CryptoError::KdfFailed(format!("invalid parameters: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KdfFailed(format!("{}", e)))?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            m_cost: 8_192,
            t_cost: 1,
            p_cost: 1,
        }
    }

    #[test]
    fn test_same_password_same_salt_same_key() {
        let salt = generate_salt();
        let params = fast_params();

        let a = derive_export_key("hunter2", &salt, &params).unwrap();
        let b = derive_export_key("hunter2", &salt, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_password_different_key() {
        let salt = generate_salt();
        let params = fast_params();

        let a = derive_export_key("hunter2", &salt, &params).unwrap();
        let b = derive_export_key("hunter3", &salt, &params).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_different_salt_different_key() {
        let params = fast_params();

        let a = derive_export_key("hunter2", &generate_salt(), &params).unwrap();
        let b = derive_export_key("hunter2", &generate_salt(), &params).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_weak_params_rejected() {
        let weak = KdfParams {
            m_cost: 64,
            t_cost: 1,
            p_cost: 1,
        };
        assert!(derive_export_key("pw", &generate_salt(), &weak).is_err());
    }
}
