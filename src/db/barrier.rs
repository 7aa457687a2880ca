//! Rows holding the barrier's own key hierarchy.

use chrono::Utc;
use sqlx::{prelude::FromRow, SqliteConnection};
use uuid::Uuid;

use crate::error::Error;

/// A root key, sealed under the unseal key identified by `unseal_kid`.
#[derive(Debug, Clone, FromRow)]
pub struct RootKeyRow {
    pub id: Uuid,
    pub unseal_kid: Uuid,
    /// Compact JWE of the raw root key
    pub encrypted: Vec<u8>,
    pub created_at: i64,
}

/// An intermediate key, sealed under the root key `root_key_id`.
#[derive(Debug, Clone, FromRow)]
pub struct IntermediateKeyRow {
    pub id: Uuid,
    pub root_key_id: Uuid,
    pub encrypted: Vec<u8>,
    pub created_at: i64,
}

impl RootKeyRow {
    pub fn new(id: Uuid, unseal_kid: Uuid, encrypted: Vec<u8>) -> Self {
        Self {
            id,
            unseal_kid,
            encrypted,
            created_at: Utc::now().timestamp_millis(),
        }
    }

    pub async fn insert(&self, db: &mut SqliteConnection) -> Result<(), Error> {
        sqlx::query(
            "
            INSERT INTO barrier_root_keys (id, unseal_kid, encrypted, created_at)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(self.id)
        .bind(self.unseal_kid)
        .bind(&self.encrypted)
        .bind(self.created_at)
        .execute(db)
        .await?;

        Ok(())
    }

    pub async fn get(db: &mut SqliteConnection, id: Uuid) -> Result<Option<Self>, Error> {
        Ok(sqlx::query_as(
            "SELECT id, unseal_kid, encrypted, created_at FROM barrier_root_keys WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await?)
    }

    pub async fn latest(db: &mut SqliteConnection) -> Result<Option<Self>, Error> {
        Ok(sqlx::query_as(
            "
            SELECT id, unseal_kid, encrypted, created_at FROM barrier_root_keys
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            ",
        )
        .fetch_optional(db)
        .await?)
    }
}

impl IntermediateKeyRow {
    pub fn new(id: Uuid, root_key_id: Uuid, encrypted: Vec<u8>) -> Self {
        Self {
            id,
            root_key_id,
            encrypted,
            created_at: Utc::now().timestamp_millis(),
        }
    }

    pub async fn insert(&self, db: &mut SqliteConnection) -> Result<(), Error> {
        sqlx::query(
            "
            INSERT INTO barrier_intermediate_keys (id, root_key_id, encrypted, created_at)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(self.id)
        .bind(self.root_key_id)
        .bind(&self.encrypted)
        .bind(self.created_at)
        .execute(db)
        .await?;

        Ok(())
    }

    pub async fn get(db: &mut SqliteConnection, id: Uuid) -> Result<Option<Self>, Error> {
        Ok(sqlx::query_as(
            "
            SELECT id, root_key_id, encrypted, created_at FROM barrier_intermediate_keys
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(db)
        .await?)
    }

    pub async fn latest(db: &mut SqliteConnection) -> Result<Option<Self>, Error> {
        Ok(sqlx::query_as(
            "
            SELECT id, root_key_id, encrypted, created_at FROM barrier_intermediate_keys
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            ",
        )
        .fetch_optional(db)
        .await?)
    }
}
