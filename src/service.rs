use bon::Builder;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    barrier::BarrierService,
    config::Config,
    db::{OrmRepository, OrmTransaction, TransactionMode},
    error::{Error, WrapErr},
    jose::{self, JweKey, JweMessage},
    keygen::{KeyGenPools, KeyMaterial},
    keypool::{Key, KeyPool, KeyPoolCreate, KeyPoolStatus, KeyPoolUpdate},
    query::{KeyPoolKeysQuery, KeyPoolsQuery, KeysQuery},
};

/// Options of a single encrypt call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Builder)]
pub struct EncryptParams {
    /// Encrypt with this key instead of the latest one
    pub key_id: Option<Uuid>,
}

pub struct Service {
    repo: OrmRepository,
    barrier: BarrierService,
    keygen: KeyGenPools,
    config: Config,
}

#[bon::bon]
impl Service {
    /// Opens the database, unseals the barrier and starts the key-gen pools.
    #[builder]
    pub async fn connect_with(config: Config) -> Result<Self, Error> {
        let repo = OrmRepository::connect(&config).await?;

        let barrier = BarrierService::open(&repo, &config.unseal_secrets)
            .await
            .wrap_err("failed to open barrier")?;

        let keygen = KeyGenPools::start()?;

        Ok(Self {
            repo,
            barrier,
            keygen,
            config,
        })
    }
}

impl Service {
    pub fn db(&self) -> &SqlitePool {
        self.repo.db()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn keygen(&self) -> &KeyGenPools {
        &self.keygen
    }

    /// Stops the key-gen pools and closes the database.
    pub async fn shutdown(&self) {
        self.keygen.cancel();
        self.repo.close().await;
        tracing::info!("Service shut down");
    }

    /// Creates a key pool. Pools that generate their keys get their first key
    /// and become active in the same transaction.
    #[tracing::instrument(skip_all, fields(name = %create.name, algorithm = %create.algorithm))]
    pub async fn add_key_pool(&self, create: KeyPoolCreate) -> Result<KeyPool, Error> {
        async {
            create.validate()?;

            let status = KeyPoolStatus::Creating
                .transition(KeyPoolStatus::initial(create.import_allowed))?;

            let key_pool_id = self
                .keygen
                .generate_id()
                .await
                .wrap_err("failed to generate key pool id")?;
            let pool = KeyPool::from_create(key_pool_id, create);

            let mut tx = self.repo.begin(TransactionMode::ReadWrite).await?;

            tx.add_key_pool(&pool)
                .await
                .wrap_err("failed to insert KeyPool")?;

            if status == KeyPoolStatus::PendingGenerate {
                self.add_generated_key(&mut tx, &pool).await?;
                tx.update_key_pool_status(key_pool_id, status.transition(KeyPoolStatus::Active)?)
                    .await
                    .wrap_err("failed to update KeyPool status")?;
            }

            let pool = tx
                .get_key_pool(key_pool_id)
                .await
                .wrap_err("failed to get KeyPool")?;

            tx.commit().await?;

            tracing::info!(key_pool_id = %pool.key_pool_id, status = %pool.status, "Added key pool");

            Ok::<_, Error>(pool)
        }
        .await
        .wrap_err("failed to add key pool")
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_key_pool(&self, key_pool_id: Uuid) -> Result<KeyPool, Error> {
        let mut tx = self.repo.begin(TransactionMode::ReadOnly).await?;
        let pool = tx
            .get_key_pool(key_pool_id)
            .await
            .wrap_err("failed to get key pool")?;
        tx.commit().await?;

        Ok(pool)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_key_pools(&self, query: &KeyPoolsQuery) -> Result<Vec<KeyPool>, Error> {
        let filters = query.validate()?;

        let mut tx = self.repo.begin(TransactionMode::ReadOnly).await?;
        let pools = tx
            .get_key_pools(&filters)
            .await
            .wrap_err("failed to get key pools")?;
        tx.commit().await?;

        Ok(pools)
    }

    /// Adds a freshly generated key to a pool in `pending_generate` or
    /// `active` status.
    #[tracing::instrument(skip(self))]
    pub async fn generate_key(&self, key_pool_id: Uuid) -> Result<Key, Error> {
        async {
            let mut tx = self.repo.begin(TransactionMode::ReadWrite).await?;

            let pool = tx
                .get_key_pool(key_pool_id)
                .await
                .wrap_err("failed to get KeyPool")?;

            if !pool.status.allows_generate() {
                return Err(Error::InvalidStatus {
                    status: pool.status,
                    operation: "generate key",
                });
            }
            self.check_versioning(&mut tx, &pool).await?;

            let key = self.add_generated_key(&mut tx, &pool).await?;

            if pool.status == KeyPoolStatus::PendingGenerate {
                tx.update_key_pool_status(
                    key_pool_id,
                    pool.status.transition(KeyPoolStatus::Active)?,
                )
                .await
                .wrap_err("failed to update KeyPool status")?;
            }

            tx.commit().await?;

            tracing::info!(key_id = %key.key_id, "Generated key");

            Ok::<_, Error>(key)
        }
        .await
        .wrap_err_with(|| format!("failed to generate key in key pool {key_pool_id}"))
    }

    /// Adds caller-supplied key material to a pool that allows import.
    #[tracing::instrument(skip(self, material))]
    pub async fn import_key(&self, key_pool_id: Uuid, material: KeyMaterial) -> Result<Key, Error> {
        async {
            let mut tx = self.repo.begin(TransactionMode::ReadWrite).await?;

            let pool = tx
                .get_key_pool(key_pool_id)
                .await
                .wrap_err("failed to get KeyPool")?;

            if !pool.import_allowed {
                return Err(Error::invalid_parameter(format!(
                    "key pool {key_pool_id} does not allow import"
                )));
            }
            if !pool.status.allows_import() {
                return Err(Error::InvalidStatus {
                    status: pool.status,
                    operation: "import key",
                });
            }

            let expected = pool.algorithm.material_class().byte_len();
            if material.len() != expected {
                return Err(Error::invalid_parameter(format!(
                    "{} needs {expected} bytes of key material, got {}",
                    pool.algorithm,
                    material.len()
                )));
            }
            self.check_versioning(&mut tx, &pool).await?;

            let key = Key {
                key_pool_id,
                key_id: self.keygen.generate_id().await?,
                key_material: self
                    .barrier
                    .encrypt_content(&mut tx, &material)
                    .await
                    .wrap_err("failed to encrypt key material")?,
                key_generate_date: None,
                key_import_date: Some(Utc::now()),
            };
            tx.add_key_pool_key(&key)
                .await
                .wrap_err("failed to insert Key")?;

            if pool.status == KeyPoolStatus::PendingImport {
                tx.update_key_pool_status(
                    key_pool_id,
                    pool.status.transition(KeyPoolStatus::Active)?,
                )
                .await
                .wrap_err("failed to update KeyPool status")?;
            }

            tx.commit().await?;

            tracing::info!(key_id = %key.key_id, "Imported key");

            Ok::<_, Error>(key)
        }
        .await
        .wrap_err_with(|| format!("failed to import key into key pool {key_pool_id}"))
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_key_pool_status(
        &self,
        key_pool_id: Uuid,
        status: KeyPoolStatus,
    ) -> Result<KeyPool, Error> {
        async {
            let mut tx = self.repo.begin(TransactionMode::ReadWrite).await?;

            let pool = tx
                .get_key_pool(key_pool_id)
                .await
                .wrap_err("failed to get KeyPool")?;

            tx.update_key_pool_status(key_pool_id, pool.status.transition(status)?)
                .await?;

            let pool = tx.get_key_pool(key_pool_id).await?;

            tx.commit().await?;

            tracing::info!(status = %pool.status, "Updated key pool status");

            Ok::<_, Error>(pool)
        }
        .await
        .wrap_err_with(|| format!("failed to update status of key pool {key_pool_id}"))
    }

    /// Renames a key pool and replaces its description.
    #[tracing::instrument(skip(self, update), fields(name = %update.name))]
    pub async fn update_key_pool(
        &self,
        key_pool_id: Uuid,
        update: KeyPoolUpdate,
    ) -> Result<KeyPool, Error> {
        async {
            update.validate()?;

            let mut tx = self.repo.begin(TransactionMode::ReadWrite).await?;

            tx.update_key_pool(key_pool_id, &update.name, &update.description)
                .await
                .wrap_err("failed to update KeyPool")?;

            let pool = tx
                .get_key_pool(key_pool_id)
                .await
                .wrap_err("failed to get updated KeyPool")?;

            tx.commit().await?;

            tracing::info!("Updated key pool");

            Ok::<_, Error>(pool)
        }
        .await
        .wrap_err_with(|| format!("failed to update key pool {key_pool_id}"))
    }

    /// Requests deletion of a key pool. The pool moves to the
    /// `PendingDeleteWas*` status matching its current one; keys stay in place.
    #[tracing::instrument(skip(self))]
    pub async fn delete_key_pool(&self, key_pool_id: Uuid) -> Result<KeyPool, Error> {
        async {
            let mut tx = self.repo.begin(TransactionMode::ReadWrite).await?;

            let pool = tx
                .get_key_pool(key_pool_id)
                .await
                .wrap_err("failed to get KeyPool")?;

            let status = pool.status.transition(pool.status.pending_delete()?)?;
            tx.update_key_pool_status(key_pool_id, status).await?;

            let pool = tx.get_key_pool(key_pool_id).await?;

            tx.commit().await?;

            tracing::info!(status = %pool.status, "Requested key pool deletion");

            Ok::<_, Error>(pool)
        }
        .await
        .wrap_err_with(|| format!("failed to delete key pool {key_pool_id}"))
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_keys_by_key_pool(
        &self,
        key_pool_id: Uuid,
        query: &KeyPoolKeysQuery,
    ) -> Result<Vec<Key>, Error> {
        let filters = query.validate(key_pool_id)?;

        let mut tx = self.repo.begin(TransactionMode::ReadOnly).await?;
        tx.get_key_pool(key_pool_id)
            .await
            .wrap_err("failed to get key pool")?;
        let keys = tx
            .get_key_pool_keys(key_pool_id, &filters)
            .await
            .wrap_err("failed to get key pool keys")?;
        tx.commit().await?;

        Ok(keys)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_keys(&self, query: &KeysQuery) -> Result<Vec<Key>, Error> {
        let filters = query.validate()?;

        let mut tx = self.repo.begin(TransactionMode::ReadOnly).await?;
        let keys = tx.get_keys(&filters).await.wrap_err("failed to get keys")?;
        tx.commit().await?;

        Ok(keys)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_key(&self, key_pool_id: Uuid, key_id: Uuid) -> Result<Key, Error> {
        let mut tx = self.repo.begin(TransactionMode::ReadOnly).await?;
        let key = tx
            .get_key_pool_key(key_pool_id, key_id)
            .await
            .wrap_err("failed to get key")?;
        tx.commit().await?;

        Ok(key)
    }

    /// Encrypts `clear` to a compact JWE under the pool's latest key, or the
    /// key named in `params`.
    #[tracing::instrument(skip(self, clear), fields(len = clear.len()))]
    pub async fn encrypt(
        &self,
        key_pool_id: Uuid,
        params: &EncryptParams,
        clear: Bytes,
    ) -> Result<Bytes, Error> {
        async {
            if clear.is_empty() {
                return Err(Error::invalid_parameter("clear bytes must not be empty"));
            }

            let mut tx = self.repo.begin(TransactionMode::ReadOnly).await?;

            let pool = tx
                .get_key_pool(key_pool_id)
                .await
                .wrap_err("failed to get KeyPool")?;
            if !pool.status.allows_encrypt() {
                return Err(Error::InvalidStatus {
                    status: pool.status,
                    operation: "encrypt",
                });
            }

            let key = match params.key_id {
                Some(key_id) => tx.get_key_pool_key(key_pool_id, key_id).await,
                None => tx.get_key_pool_latest_key(key_pool_id).await,
            }
            .wrap_err("failed to get Key")?;

            let jwe_key = self.open_key(&mut tx, &pool, &key).await?;
            tx.commit().await?;

            let jwe = tokio::task::spawn_blocking(move || jose::encrypt(&jwe_key, &clear))
                .await??;

            tracing::debug!(key_id = %key.key_id, "Encrypted payload");

            Ok::<_, Error>(Bytes::from(jwe))
        }
        .await
        .wrap_err_with(|| format!("failed to encrypt with key pool {key_pool_id}"))
    }

    /// Decrypts a compact JWE with the key its `kid` names, which need not be
    /// the latest key of the pool.
    #[tracing::instrument(skip(self, jwe))]
    pub async fn decrypt(&self, key_pool_id: Uuid, jwe: Bytes) -> Result<Bytes, Error> {
        async {
            let message = JweMessage::parse(&jwe)?;
            let key_id = message.kid()?;

            let mut tx = self.repo.begin(TransactionMode::ReadOnly).await?;

            let pool = tx
                .get_key_pool(key_pool_id)
                .await
                .wrap_err("failed to get KeyPool")?;
            if !pool.status.allows_decrypt() {
                return Err(Error::InvalidStatus {
                    status: pool.status,
                    operation: "decrypt",
                });
            }

            let key = tx
                .get_key_pool_key(key_pool_id, key_id)
                .await
                .wrap_err("failed to get Key")?;

            let jwe_key = self.open_key(&mut tx, &pool, &key).await?;
            tx.commit().await?;

            let clear = tokio::task::spawn_blocking(move || jose::decrypt(&jwe_key, &message))
                .await??;

            tracing::debug!(%key_id, "Decrypted payload");

            Ok::<_, Error>(Bytes::from(clear))
        }
        .await
        .wrap_err_with(|| format!("failed to decrypt with key pool {key_pool_id}"))
    }

    /// Unseals a stored key into a JWE key for the pool's algorithm.
    async fn open_key(
        &self,
        tx: &mut OrmTransaction,
        pool: &KeyPool,
        key: &Key,
    ) -> Result<JweKey, Error> {
        if !pool.is_internal() {
            return Err(Error::UnsupportedProvider {
                provider: pool.provider.clone(),
            });
        }

        let material = self
            .barrier
            .decrypt_content(tx, &key.key_material)
            .await
            .wrap_err("failed to decrypt key material")?;

        let (alg, enc) = pool.algorithm.resolve();
        JweKey::new(key.key_id, enc, alg, material)
    }

    async fn add_generated_key(&self, tx: &mut OrmTransaction, pool: &KeyPool) -> Result<Key, Error> {
        let material = self
            .keygen
            .generate_key_material(pool.algorithm)
            .await
            .wrap_err("failed to generate key material")?;

        let key = Key {
            key_pool_id: pool.key_pool_id,
            key_id: self
                .keygen
                .generate_id()
                .await
                .wrap_err("failed to generate key id")?,
            key_material: self
                .barrier
                .encrypt_content(tx, &material)
                .await
                .wrap_err("failed to encrypt key material")?,
            key_generate_date: Some(Utc::now()),
            key_import_date: None,
        };

        tx.add_key_pool_key(&key)
            .await
            .wrap_err("failed to insert Key")?;

        Ok(key)
    }

    async fn check_versioning(&self, tx: &mut OrmTransaction, pool: &KeyPool) -> Result<(), Error> {
        if !pool.versioning_allowed && tx.count_key_pool_keys(pool.key_pool_id).await? > 0 {
            return Err(Error::invalid_parameter(format!(
                "key pool {} does not allow more than one key",
                pool.key_pool_id
            )));
        }
        Ok(())
    }
}
