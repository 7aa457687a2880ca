use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::{
    crypto,
    error::Error,
    jose::{ContentEncryptionAlgorithm, JweKey, KeyEncryptionAlgorithm},
};

const UNSEAL_SALT: &[u8] = b"keypool-kms barrier unseal";

/// Keys derived from the configured unseal secrets. The first one seals new
/// root keys; any of them opens a root key carrying its kid.
pub struct UnsealKeys {
    keys: Vec<JweKey>,
}

impl UnsealKeys {
    pub fn derive(secrets: &[SecretString]) -> Result<Self, Error> {
        if secrets.is_empty() {
            return Err(Error::invalid_parameter(
                "at least one unseal secret is required",
            ));
        }

        let keys = secrets
            .iter()
            .map(|secret| {
                let secret = secret.expose_secret().as_bytes();
                if secret.is_empty() {
                    return Err(Error::invalid_parameter("unseal secrets must not be empty"));
                }

                let material = crypto::derive_key(secret, UNSEAL_SALT, b"key", 32)?;
                let kid = crypto::fingerprint(&crypto::derive_key(secret, UNSEAL_SALT, b"kid", 32)?)?;

                JweKey::new(
                    kid,
                    ContentEncryptionAlgorithm::A256Gcm,
                    KeyEncryptionAlgorithm::A256Kw,
                    material,
                )
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self { keys })
    }

    pub fn sealing_key(&self) -> &JweKey {
        // derive rejects an empty secret list
        &self.keys[0]
    }

    pub fn find(&self, kid: Uuid) -> Option<&JweKey> {
        self.keys.iter().find(|key| key.kid() == kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
