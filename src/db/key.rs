use chrono::{DateTime, Utc};
use sqlx::{prelude::FromRow, QueryBuilder, Sqlite, SqliteConnection};
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::{
    error::Error,
    keypool::Key,
    query::{KeyFilters, SortField},
};

const KEY_COLUMNS: &str =
    "key_pool_id, key_id, key_material, key_generate_date, key_import_date";

#[derive(FromRow)]
struct KeyRow {
    key_pool_id: Uuid,
    key_id: Uuid,
    key_material: Vec<u8>,
    key_generate_date: Option<i64>,
    key_import_date: Option<i64>,
}

fn from_millis(millis: Option<i64>) -> Result<Option<DateTime<Utc>>, Error> {
    millis
        .map(|ms| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| Error::internal(eyre::eyre!("stored date {ms} is out of range")))
        })
        .transpose()
}

impl TryFrom<KeyRow> for Key {
    type Error = Error;

    fn try_from(row: KeyRow) -> Result<Self, Self::Error> {
        Ok(Self {
            key_pool_id: row.key_pool_id,
            key_id: row.key_id,
            key_material: row.key_material,
            key_generate_date: from_millis(row.key_generate_date)?,
            key_import_date: from_millis(row.key_import_date)?,
        })
    }
}

impl Key {
    pub async fn insert(db: &mut SqliteConnection, key: &Key) -> Result<(), Error> {
        sqlx::query(
            "
            INSERT INTO keys (key_pool_id, key_id, key_material, key_generate_date, key_import_date)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(key.key_pool_id)
        .bind(key.key_id)
        .bind(&key.key_material)
        .bind(key.key_generate_date.map(|d| d.timestamp_millis()))
        .bind(key.key_import_date.map(|d| d.timestamp_millis()))
        .execute(db)
        .await?;

        Ok(())
    }

    pub async fn get(
        db: &mut SqliteConnection,
        key_pool_id: Uuid,
        key_id: Uuid,
    ) -> Result<Option<Self>, Error> {
        let row: Option<KeyRow> = sqlx::query_as(&format!(
            "SELECT {KEY_COLUMNS} FROM keys WHERE key_pool_id = $1 AND key_id = $2"
        ))
        .bind(key_pool_id)
        .bind(key_id)
        .fetch_optional(db)
        .await?;

        row.map(Key::try_from).transpose()
    }

    /// The most recently generated or imported key of a pool.
    pub async fn latest(
        db: &mut SqliteConnection,
        key_pool_id: Uuid,
    ) -> Result<Option<Self>, Error> {
        let row: Option<KeyRow> = sqlx::query_as(&format!(
            "
            SELECT {KEY_COLUMNS} FROM keys
            WHERE key_pool_id = $1
            ORDER BY COALESCE(key_generate_date, key_import_date) DESC, rowid DESC
            LIMIT 1
            "
        ))
        .bind(key_pool_id)
        .fetch_optional(db)
        .await?;

        row.map(Key::try_from).transpose()
    }

    pub async fn count(db: &mut SqliteConnection, key_pool_id: Uuid) -> Result<i64, Error> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM keys WHERE key_pool_id = $1")
                .bind(key_pool_id)
                .fetch_one(db)
                .await?,
        )
    }

    pub async fn list(db: &mut SqliteConnection, filters: &KeyFilters) -> Result<Vec<Self>, Error> {
        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {KEY_COLUMNS} FROM keys WHERE 1 = 1"));

        if !filters.key_pool_ids.is_empty() {
            qb.push(" AND key_pool_id IN (");
            let mut ids = qb.separated(", ");
            for id in &filters.key_pool_ids {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");
        }

        if !filters.key_ids.is_empty() {
            qb.push(" AND key_id IN (");
            let mut ids = qb.separated(", ");
            for id in &filters.key_ids {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");
        }

        if let Some(min) = filters.min_generate_date {
            qb.push(" AND key_generate_date >= ")
                .push_bind(min.timestamp_millis());
        }

        if let Some(max) = filters.max_generate_date {
            qb.push(" AND key_generate_date <= ")
                .push_bind(max.timestamp_millis());
        }

        qb.push(" ORDER BY ");
        for sort in &filters.sorts {
            qb.push(sort.field.column())
                .push(" ")
                .push(sort.direction.as_sql())
                .push(", ");
        }
        qb.push("key_pool_id ASC, key_id ASC");

        qb.push(" LIMIT ")
            .push_bind(i64::from(filters.page.size))
            .push(" OFFSET ")
            .push_bind(filters.page.offset());

        let mut stream = qb.build_query_as::<KeyRow>().fetch(db);

        let mut keys = Vec::new();

        while let Some(row) = stream.next().await.transpose()? {
            keys.push(Key::try_from(row)?);
        }

        Ok(keys)
    }
}
