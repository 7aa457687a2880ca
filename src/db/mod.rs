//! SQLite persistence of key pools, keys and the barrier key hierarchy.
//!
//! All access goes through an [`OrmTransaction`]. A transaction that is
//! dropped without [`OrmTransaction::commit`] is rolled back, so every early
//! return on an error path leaves the database untouched.

use sqlx::{
    sqlite::{
        SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode,
        SqlitePoolOptions,
    },
    Sqlite, SqliteConnection, SqlitePool, Transaction,
};
use uuid::Uuid;

use crate::{
    config::Config,
    error::Error,
    keypool::{Key, KeyPool, KeyPoolStatus},
    query::{KeyFilters, KeyPoolFilters},
};

pub mod barrier;
pub mod key;
pub mod key_pool;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Clone)]
pub struct OrmRepository {
    db: SqlitePool,
}

impl OrmRepository {
    /// Opens (creating if missing) the configured database and runs the
    /// embedded migrations.
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let opts = if config.in_memory() {
            SqliteConnectOptions::new().in_memory(true)
        } else {
            SqliteConnectOptions::new()
                .filename(config.db_path())
                .create_if_missing(true)
        }
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .locking_mode(SqliteLockingMode::Normal)
        .optimize_on_close(true, None)
        .auto_vacuum(SqliteAutoVacuum::Full);

        let mut pool_opts = SqlitePoolOptions::new().max_connections(config.max_connections());
        if config.in_memory() {
            // the database lives only as long as its single connection
            pool_opts = pool_opts.idle_timeout(None).max_lifetime(None);
        }

        let db = pool_opts.connect_with(opts).await?;

        sqlx::migrate!("./migrations").run(&db).await?;

        tracing::info!(path = config.db_path(), "Database ready");

        Ok(Self { db })
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub async fn begin(&self, mode: TransactionMode) -> Result<OrmTransaction, Error> {
        let tx = self.db.begin().await?;
        Ok(OrmTransaction { tx, mode })
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

pub struct OrmTransaction {
    tx: Transaction<'static, Sqlite>,
    mode: TransactionMode,
}

impl OrmTransaction {
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub(crate) fn reader(&mut self) -> &mut SqliteConnection {
        self.tx.as_mut()
    }

    pub(crate) fn writer(&mut self) -> Result<&mut SqliteConnection, Error> {
        match self.mode {
            TransactionMode::ReadWrite => Ok(self.tx.as_mut()),
            TransactionMode::ReadOnly => Err(Error::ReadOnlyTransaction),
        }
    }

    /// Commits a read-write transaction. A read-only one is rolled back,
    /// there is nothing to keep.
    pub async fn commit(self) -> Result<(), Error> {
        match self.mode {
            TransactionMode::ReadWrite => self.tx.commit().await?,
            TransactionMode::ReadOnly => self.tx.rollback().await?,
        }
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), Error> {
        self.tx.rollback().await?;
        Ok(())
    }

    pub async fn add_key_pool(&mut self, pool: &KeyPool) -> Result<(), Error> {
        KeyPool::insert(self.writer()?, pool).await
    }

    pub async fn get_key_pool(&mut self, key_pool_id: Uuid) -> Result<KeyPool, Error> {
        KeyPool::get(self.reader(), key_pool_id)
            .await?
            .ok_or_else(|| Error::key_pool_not_found(key_pool_id))
    }

    pub async fn get_key_pools(&mut self, filters: &KeyPoolFilters) -> Result<Vec<KeyPool>, Error> {
        KeyPool::list(self.reader(), filters).await
    }

    pub async fn update_key_pool_status(
        &mut self,
        key_pool_id: Uuid,
        status: KeyPoolStatus,
    ) -> Result<(), Error> {
        KeyPool::update_status(self.writer()?, key_pool_id, status).await
    }

    pub async fn update_key_pool(
        &mut self,
        key_pool_id: Uuid,
        name: &str,
        description: &str,
    ) -> Result<(), Error> {
        KeyPool::update_details(self.writer()?, key_pool_id, name, description).await
    }

    pub async fn add_key_pool_key(&mut self, key: &Key) -> Result<(), Error> {
        Key::insert(self.writer()?, key).await
    }

    pub async fn get_key_pool_key(&mut self, key_pool_id: Uuid, key_id: Uuid) -> Result<Key, Error> {
        Key::get(self.reader(), key_pool_id, key_id)
            .await?
            .ok_or_else(|| Error::key_not_found(key_pool_id, key_id))
    }

    pub async fn get_key_pool_latest_key(&mut self, key_pool_id: Uuid) -> Result<Key, Error> {
        Key::latest(self.reader(), key_pool_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("latest key of key pool {key_pool_id}")))
    }

    pub async fn count_key_pool_keys(&mut self, key_pool_id: Uuid) -> Result<i64, Error> {
        Key::count(self.reader(), key_pool_id).await
    }

    /// Keys of one pool. `filters.key_pool_ids` is replaced by `key_pool_id`.
    pub async fn get_key_pool_keys(
        &mut self,
        key_pool_id: Uuid,
        filters: &KeyFilters,
    ) -> Result<Vec<Key>, Error> {
        let filters = KeyFilters {
            key_pool_ids: vec![key_pool_id],
            ..filters.clone()
        };
        Key::list(self.reader(), &filters).await
    }

    pub async fn get_keys(&mut self, filters: &KeyFilters) -> Result<Vec<Key>, Error> {
        Key::list(self.reader(), filters).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{algorithm::KeyPoolAlgorithm, config::IN_MEMORY_DB_PATH, keypool::KeyPoolCreate};

    async fn repository() -> OrmRepository {
        OrmRepository::connect(&Config {
            db_path: Some(IN_MEMORY_DB_PATH.to_owned()),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    fn pool(name: &str) -> KeyPool {
        KeyPool::from_create(
            Uuid::now_v7(),
            KeyPoolCreate::builder()
                .name(name)
                .algorithm(KeyPoolAlgorithm::A256GcmA256Kw)
                .build(),
        )
    }

    fn key(key_pool_id: Uuid, millis: i64) -> Key {
        Key {
            key_pool_id,
            key_id: Uuid::now_v7(),
            key_material: vec![7; 8],
            key_generate_date: chrono::DateTime::from_timestamp_millis(millis),
            key_import_date: None,
        }
    }

    #[tokio::test]
    async fn read_only_transactions_refuse_writes() {
        let repo = repository().await;
        let mut tx = repo.begin(TransactionMode::ReadOnly).await.unwrap();

        let err = tx.add_key_pool(&pool("p")).await.unwrap_err();
        assert!(matches!(err, Error::ReadOnlyTransaction));
    }

    #[tokio::test]
    async fn dropped_transactions_roll_back() {
        let repo = repository().await;
        let pool = pool("p");

        {
            let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
            tx.add_key_pool(&pool).await.unwrap();
        }

        let mut tx = repo.begin(TransactionMode::ReadOnly).await.unwrap();
        assert!(matches!(
            tx.get_key_pool(pool.key_pool_id).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn pools_and_keys_round_trip() {
        let repo = repository().await;
        let pool = pool("p");
        let now = Utc::now().timestamp_millis();
        let older = key(pool.key_pool_id, now - 1_000);
        let newer = key(pool.key_pool_id, now);

        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        tx.add_key_pool(&pool).await.unwrap();
        tx.add_key_pool_key(&newer).await.unwrap();
        tx.add_key_pool_key(&older).await.unwrap();
        tx.update_key_pool_status(pool.key_pool_id, KeyPoolStatus::Active)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = repo.begin(TransactionMode::ReadOnly).await.unwrap();
        let stored = tx.get_key_pool(pool.key_pool_id).await.unwrap();
        assert_eq!(stored.status, KeyPoolStatus::Active);
        assert_eq!(stored.algorithm, pool.algorithm);

        let latest = tx.get_key_pool_latest_key(pool.key_pool_id).await.unwrap();
        assert_eq!(latest, newer);
        assert_eq!(tx.count_key_pool_keys(pool.key_pool_id).await.unwrap(), 2);

        let keys = tx
            .get_key_pool_keys(pool.key_pool_id, &KeyFilters::default())
            .await
            .unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn latest_key_ties_go_to_the_last_insert() {
        let repo = repository().await;
        let pool = pool("p");
        let now = Utc::now().timestamp_millis();
        let first = key(pool.key_pool_id, now);
        let mut second = key(pool.key_pool_id, now);
        second.key_id = Uuid::nil();

        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        tx.add_key_pool(&pool).await.unwrap();
        tx.add_key_pool_key(&first).await.unwrap();
        tx.add_key_pool_key(&second).await.unwrap();

        let latest = tx.get_key_pool_latest_key(pool.key_pool_id).await.unwrap();
        assert_eq!(latest.key_id, second.key_id);
    }

    #[tokio::test]
    async fn key_pools_filter_by_export_allowed() {
        let repo = repository().await;
        let mut exportable = pool("exportable");
        exportable.export_allowed = true;

        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        tx.add_key_pool(&exportable).await.unwrap();
        tx.add_key_pool(&pool("sealed")).await.unwrap();
        tx.update_key_pool(exportable.key_pool_id, "renamed", "now with a description")
            .await
            .unwrap();

        let found = tx
            .get_key_pools(&KeyPoolFilters {
                export_allowed: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key_pool_id, exportable.key_pool_id);
        assert_eq!(found[0].name, "renamed");
        assert_eq!(found[0].description, "now with a description");

        assert!(matches!(
            tx.update_key_pool(Uuid::now_v7(), "x", "").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn key_pools_filter_by_name_and_page() {
        let repo = repository().await;

        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        for name in ["a", "b", "c"] {
            tx.add_key_pool(&pool(name)).await.unwrap();
        }
        tx.commit().await.unwrap();

        let mut tx = repo.begin(TransactionMode::ReadOnly).await.unwrap();
        let found = tx
            .get_key_pools(&KeyPoolFilters {
                names: vec!["b".to_owned()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "b");

        let mut filters = KeyPoolFilters::default();
        filters.page.size = 2;
        filters.page.number = 1;
        let page = tx.get_key_pools(&filters).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "c");
    }
}
