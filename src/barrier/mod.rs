//! The barrier seals stored key material.
//!
//! Three levels of keys:
//!
//! - unseal keys, derived from configured secrets and never stored
//! - a root key, stored as a JWE under an unseal key
//! - intermediate keys, stored as JWEs under the root key
//!
//! Content is sealed as a JWE (`A256GCM`/`A256KW`) whose `kid` names the
//! intermediate key, so content written under an older intermediate key keeps
//! opening after a new one is created.

use std::sync::Arc;

use secrecy::SecretString;
use uuid::Uuid;

use crate::{
    crypto,
    db::{
        barrier::{IntermediateKeyRow, RootKeyRow},
        OrmRepository, OrmTransaction, TransactionMode,
    },
    error::{Error, WrapErr},
    jose::{self, ContentEncryptionAlgorithm, JweKey, JweMessage, KeyEncryptionAlgorithm},
};

mod unseal;

pub use unseal::UnsealKeys;

const BARRIER_KEY_LEN: usize = 32;

fn barrier_key(kid: Uuid, material: zeroize::Zeroizing<Vec<u8>>) -> Result<JweKey, Error> {
    JweKey::new(
        kid,
        ContentEncryptionAlgorithm::A256Gcm,
        KeyEncryptionAlgorithm::A256Kw,
        material,
    )
}

fn open_key(kid: Uuid, sealer: &JweKey, sealed: &[u8]) -> Result<JweKey, Error> {
    let material = zeroize::Zeroizing::new(jose::decrypt_bytes(sealer, sealed)?);
    barrier_key(kid, material)
}

pub struct BarrierService {
    unseal: UnsealKeys,
    root_keys: papaya::HashMap<Uuid, Arc<JweKey>>,
    intermediate_keys: papaya::HashMap<Uuid, Arc<JweKey>>,
    current: Arc<JweKey>,
}

impl BarrierService {
    /// Derives the unseal keys and opens the key hierarchy, creating the root
    /// and intermediate keys on first use.
    pub async fn open(repo: &OrmRepository, secrets: &[SecretString]) -> Result<Self, Error> {
        let unseal = UnsealKeys::derive(secrets)?;

        let mut tx = repo.begin(TransactionMode::ReadWrite).await?;

        let root = match RootKeyRow::latest(tx.reader()).await? {
            Some(row) => row,
            None => {
                let material = crypto::random_bytes(BARRIER_KEY_LEN)?;
                let sealer = unseal.sealing_key();
                let row = RootKeyRow::new(
                    Uuid::now_v7(),
                    sealer.kid(),
                    jose::encrypt(sealer, &material)?.into_bytes(),
                );
                row.insert(tx.writer()?).await?;
                tracing::info!(root_key_id = %row.id, "Created barrier root key");
                row
            }
        };
        let root_key = Arc::new(Self::open_root_key(&unseal, &root)?);

        let intermediate = match IntermediateKeyRow::latest(tx.reader()).await? {
            Some(row) => row,
            None => {
                let material = crypto::random_bytes(BARRIER_KEY_LEN)?;
                let row = IntermediateKeyRow::new(
                    Uuid::now_v7(),
                    root.id,
                    jose::encrypt(&root_key, &material)?.into_bytes(),
                );
                row.insert(tx.writer()?).await?;
                tracing::info!(intermediate_key_id = %row.id, "Created barrier intermediate key");
                row
            }
        };

        let root_keys = papaya::HashMap::new();
        root_keys.pin().insert(root.id, root_key.clone());

        let sealer = if intermediate.root_key_id == root.id {
            root_key
        } else {
            let row = RootKeyRow::get(tx.reader(), intermediate.root_key_id)
                .await?
                .ok_or_else(|| {
                    Error::not_found(format!("barrier root key {}", intermediate.root_key_id))
                })?;
            let key = Arc::new(Self::open_root_key(&unseal, &row)?);
            root_keys.pin().insert(row.id, key.clone());
            key
        };

        let current = Arc::new(
            open_key(intermediate.id, &sealer, &intermediate.encrypted).wrap_err_with(|| {
                format!("failed to open barrier intermediate key {}", intermediate.id)
            })?,
        );
        let intermediate_keys = papaya::HashMap::new();
        intermediate_keys.pin().insert(intermediate.id, current.clone());

        tx.commit().await?;

        tracing::info!(
            intermediate_key_id = %intermediate.id,
            unseal_keys = unseal.len(),
            "Barrier unsealed"
        );

        Ok(Self {
            unseal,
            root_keys,
            intermediate_keys,
            current,
        })
    }

    fn open_root_key(unseal: &UnsealKeys, row: &RootKeyRow) -> Result<JweKey, Error> {
        let sealer = unseal.find(row.unseal_kid).ok_or_else(|| {
            Error::jose(format!(
                "no unseal key matches kid {} of root key {}",
                row.unseal_kid, row.id
            ))
        })?;
        open_key(row.id, sealer, &row.encrypted)
            .wrap_err_with(|| format!("failed to open barrier root key {}", row.id))
    }

    async fn root_key(&self, tx: &mut OrmTransaction, id: Uuid) -> Result<Arc<JweKey>, Error> {
        if let Some(key) = self.root_keys.pin().get(&id).cloned() {
            return Ok(key);
        }

        let row = RootKeyRow::get(tx.reader(), id)
            .await?
            .ok_or_else(|| Error::not_found(format!("barrier root key {id}")))?;
        let key = Arc::new(Self::open_root_key(&self.unseal, &row)?);
        self.root_keys.pin().insert(id, key.clone());

        Ok(key)
    }

    async fn open_intermediate_key(
        &self,
        tx: &mut OrmTransaction,
        row: &IntermediateKeyRow,
    ) -> Result<Arc<JweKey>, Error> {
        let root = self.root_key(tx, row.root_key_id).await?;
        let key = Arc::new(
            open_key(row.id, &root, &row.encrypted)
                .wrap_err_with(|| format!("failed to open barrier intermediate key {}", row.id))?,
        );
        self.intermediate_keys.pin().insert(row.id, key.clone());

        Ok(key)
    }

    async fn intermediate_key(
        &self,
        tx: &mut OrmTransaction,
        id: Uuid,
    ) -> Result<Arc<JweKey>, Error> {
        if let Some(key) = self.intermediate_keys.pin().get(&id).cloned() {
            return Ok(key);
        }

        tracing::debug!(intermediate_key_id = %id, "Barrier intermediate key cache miss");

        let row = IntermediateKeyRow::get(tx.reader(), id)
            .await?
            .ok_or_else(|| Error::not_found(format!("barrier intermediate key {id}")))?;
        self.open_intermediate_key(tx, &row).await
    }

    /// Id of the intermediate key new content is sealed under.
    pub fn current_key_id(&self) -> Uuid {
        self.current.kid()
    }

    /// Seals `clear` under the current intermediate key.
    pub async fn encrypt_content(
        &self,
        _tx: &mut OrmTransaction,
        clear: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let key = self.current.clone();
        let clear = zeroize::Zeroizing::new(clear.to_vec());

        let sealed = tokio::task::spawn_blocking(move || jose::encrypt(&key, &clear)).await??;

        Ok(sealed.into_bytes())
    }

    /// Opens content sealed by [`BarrierService::encrypt_content`], looking the
    /// intermediate key up by the JWE `kid`.
    pub async fn decrypt_content(
        &self,
        tx: &mut OrmTransaction,
        sealed: &[u8],
    ) -> Result<zeroize::Zeroizing<Vec<u8>>, Error> {
        let message = JweMessage::parse(sealed)?;
        let key = self.intermediate_key(tx, message.kid()?).await?;

        let clear = tokio::task::spawn_blocking(move || jose::decrypt(&key, &message)).await??;

        Ok(zeroize::Zeroizing::new(clear))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn setup(dir: &tempfile::TempDir) -> OrmRepository {
        OrmRepository::connect(&Config {
            db_path: Some(dir.path().join("barrier.db").to_string_lossy().to_string()),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn content_round_trips_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = vec![SecretString::from("correct horse")];

        let repo = setup(&dir).await;
        let barrier = BarrierService::open(&repo, &secrets).await.unwrap();
        let mut tx = repo.begin(TransactionMode::ReadOnly).await.unwrap();
        let sealed = barrier.encrypt_content(&mut tx, b"key material").await.unwrap();
        tx.commit().await.unwrap();
        let first_key = barrier.current_key_id();
        drop(barrier);
        repo.close().await;

        let repo = setup(&dir).await;
        let barrier = BarrierService::open(&repo, &secrets).await.unwrap();
        assert_eq!(barrier.current_key_id(), first_key);

        let mut tx = repo.begin(TransactionMode::ReadOnly).await.unwrap();
        let clear = barrier.decrypt_content(&mut tx, &sealed).await.unwrap();
        assert_eq!(clear.as_slice(), b"key material");
    }

    #[tokio::test]
    async fn wrong_secret_cannot_open_the_root_key() {
        let dir = tempfile::tempdir().unwrap();

        let repo = setup(&dir).await;
        BarrierService::open(&repo, &[SecretString::from("right")])
            .await
            .unwrap();

        assert!(BarrierService::open(&repo, &[SecretString::from("wrong")])
            .await
            .is_err());

        // an additional secret is fine as long as one of them matches
        BarrierService::open(
            &repo,
            &[SecretString::from("new"), SecretString::from("right")],
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn sealed_content_names_the_intermediate_key() {
        let dir = tempfile::tempdir().unwrap();
        let repo = setup(&dir).await;
        let barrier = BarrierService::open(&repo, &[SecretString::from("s")])
            .await
            .unwrap();

        let mut tx = repo.begin(TransactionMode::ReadOnly).await.unwrap();
        let sealed = barrier.encrypt_content(&mut tx, b"x").await.unwrap();
        let message = JweMessage::parse(&sealed).unwrap();
        assert_eq!(message.kid().unwrap(), barrier.current_key_id());
        assert_eq!(message.alg(), KeyEncryptionAlgorithm::A256Kw);
        assert_eq!(message.enc(), ContentEncryptionAlgorithm::A256Gcm);
    }
}
