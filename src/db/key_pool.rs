use sqlx::{prelude::FromRow, QueryBuilder, Sqlite, SqliteConnection};
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::{
    algorithm::KeyPoolAlgorithm,
    error::Error,
    keypool::{KeyPool, KeyPoolStatus},
    query::{KeyPoolFilters, SortField},
};

const KEY_POOL_COLUMNS: &str = "key_pool_id, name, description, provider, algorithm, \
     versioning_allowed, import_allowed, export_allowed, status";

#[derive(FromRow)]
struct KeyPoolRow {
    key_pool_id: Uuid,
    name: String,
    description: String,
    provider: String,
    algorithm: String,
    versioning_allowed: bool,
    import_allowed: bool,
    export_allowed: bool,
    status: KeyPoolStatus,
}

impl TryFrom<KeyPoolRow> for KeyPool {
    type Error = Error;

    fn try_from(row: KeyPoolRow) -> Result<Self, Self::Error> {
        Ok(Self {
            key_pool_id: row.key_pool_id,
            name: row.name,
            description: row.description,
            provider: row.provider,
            algorithm: KeyPoolAlgorithm::parse(&row.algorithm)?,
            versioning_allowed: row.versioning_allowed,
            import_allowed: row.import_allowed,
            export_allowed: row.export_allowed,
            status: row.status,
        })
    }
}

impl KeyPool {
    pub async fn insert(db: &mut SqliteConnection, pool: &KeyPool) -> Result<(), Error> {
        sqlx::query(
            "
            INSERT INTO key_pools (
                key_pool_id, name, description, provider, algorithm,
                versioning_allowed, import_allowed, export_allowed, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(pool.key_pool_id)
        .bind(&pool.name)
        .bind(&pool.description)
        .bind(&pool.provider)
        .bind(pool.algorithm.as_ref())
        .bind(pool.versioning_allowed)
        .bind(pool.import_allowed)
        .bind(pool.export_allowed)
        .bind(pool.status)
        .execute(db)
        .await?;

        Ok(())
    }

    pub async fn get(db: &mut SqliteConnection, key_pool_id: Uuid) -> Result<Option<Self>, Error> {
        let row: Option<KeyPoolRow> = sqlx::query_as(&format!(
            "SELECT {KEY_POOL_COLUMNS} FROM key_pools WHERE key_pool_id = $1"
        ))
        .bind(key_pool_id)
        .fetch_optional(db)
        .await?;

        row.map(KeyPool::try_from).transpose()
    }

    pub async fn list(
        db: &mut SqliteConnection,
        filters: &KeyPoolFilters,
    ) -> Result<Vec<Self>, Error> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {KEY_POOL_COLUMNS} FROM key_pools WHERE 1 = 1"
        ));

        if !filters.key_pool_ids.is_empty() {
            qb.push(" AND key_pool_id IN (");
            let mut ids = qb.separated(", ");
            for id in &filters.key_pool_ids {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");
        }

        if !filters.names.is_empty() {
            qb.push(" AND name IN (");
            let mut names = qb.separated(", ");
            for name in &filters.names {
                names.push_bind(name.as_str());
            }
            names.push_unseparated(")");
        }

        if !filters.algorithms.is_empty() {
            qb.push(" AND algorithm IN (");
            let mut algorithms = qb.separated(", ");
            for algorithm in &filters.algorithms {
                algorithms.push_bind(algorithm.as_ref());
            }
            algorithms.push_unseparated(")");
        }

        if let Some(versioning_allowed) = filters.versioning_allowed {
            qb.push(" AND versioning_allowed = ")
                .push_bind(versioning_allowed);
        }

        if let Some(import_allowed) = filters.import_allowed {
            qb.push(" AND import_allowed = ").push_bind(import_allowed);
        }

        if let Some(export_allowed) = filters.export_allowed {
            qb.push(" AND export_allowed = ").push_bind(export_allowed);
        }

        qb.push(" ORDER BY ");
        for sort in &filters.sorts {
            qb.push(sort.field.column())
                .push(" ")
                .push(sort.direction.as_sql())
                .push(", ");
        }
        qb.push("key_pool_id ASC");

        qb.push(" LIMIT ")
            .push_bind(i64::from(filters.page.size))
            .push(" OFFSET ")
            .push_bind(filters.page.offset());

        let mut stream = qb.build_query_as::<KeyPoolRow>().fetch(db);

        let mut pools = Vec::new();

        while let Some(row) = stream.next().await.transpose()? {
            pools.push(KeyPool::try_from(row)?);
        }

        Ok(pools)
    }

    pub async fn update_status(
        db: &mut SqliteConnection,
        key_pool_id: Uuid,
        status: KeyPoolStatus,
    ) -> Result<(), Error> {
        let updated = sqlx::query("UPDATE key_pools SET status = $1 WHERE key_pool_id = $2")
            .bind(status)
            .bind(key_pool_id)
            .execute(db)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(Error::key_pool_not_found(key_pool_id));
        }

        Ok(())
    }

    /// Renames a key pool and replaces its description.
    pub async fn update_details(
        db: &mut SqliteConnection,
        key_pool_id: Uuid,
        name: &str,
        description: &str,
    ) -> Result<(), Error> {
        let updated =
            sqlx::query("UPDATE key_pools SET name = $1, description = $2 WHERE key_pool_id = $3")
                .bind(name)
                .bind(description)
                .bind(key_pool_id)
                .execute(db)
                .await?
                .rows_affected();

        if updated == 0 {
            return Err(Error::key_pool_not_found(key_pool_id));
        }

        Ok(())
    }
}
