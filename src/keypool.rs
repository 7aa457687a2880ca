//! Key pool and key types and the key pool status lifecycle.
//!
//! # Key Pool Lifecycle
//!
//! 1. Every pool passes through `Creating` while its row is written
//! 2. Pools that generate their own keys start in `PendingGenerate` and become
//!    `Active` once the first key is stored, in the same transaction
//! 3. Pools that import keys start in `PendingImport` and become `Active` once
//!    the first key is imported
//! 4. `Active` pools may be `Disabled` and re-enabled
//! 5. Deletion is two-phase: a `PendingDeleteWas*` status remembers where the
//!    pool came from so the request can be cancelled, then `StartedDelete`
//!    and `FinishedDelete`

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{algorithm::KeyPoolAlgorithm, error::Error};

/// The only provider encrypt and decrypt are implemented for.
pub const INTERNAL_PROVIDER: &str = "Internal";

/// Represents the current status of a key pool.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KeyPoolStatus {
    /// Transient status of a pool whose row is being written
    Creating,
    /// Key import was attempted and failed
    ImportFailed,
    /// Waiting for its first key to be imported
    PendingImport,
    /// Waiting for its first key to be generated
    PendingGenerate,
    /// Key generation was attempted and failed
    GenerateFailed,
    /// Has at least one key and serves encrypt and decrypt
    Active,
    /// Keeps its keys but refuses to encrypt
    Disabled,
    PendingDeleteWasImportFailed,
    PendingDeleteWasPendingImport,
    PendingDeleteWasActive,
    PendingDeleteWasDisabled,
    PendingDeleteWasGenerateFailed,
    /// Deletion has begun and can no longer be cancelled
    StartedDelete,
    /// Terminal
    FinishedDelete,
}

impl KeyPoolStatus {
    /// First persisted status of a new pool.
    pub fn initial(import_allowed: bool) -> Self {
        if import_allowed {
            Self::PendingImport
        } else {
            Self::PendingGenerate
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use KeyPoolStatus::*;

        matches!(
            (self, next),
            (Creating, PendingGenerate | PendingImport)
                | (PendingGenerate, Active | GenerateFailed)
                | (PendingImport, Active | ImportFailed | PendingDeleteWasPendingImport)
                | (GenerateFailed, PendingDeleteWasGenerateFailed)
                | (ImportFailed, PendingDeleteWasImportFailed)
                | (Active, Disabled | PendingDeleteWasActive)
                | (Disabled, Active | PendingDeleteWasDisabled)
                | (PendingDeleteWasActive, Active | StartedDelete)
                | (PendingDeleteWasDisabled, Disabled | StartedDelete)
                | (PendingDeleteWasPendingImport, StartedDelete)
                | (PendingDeleteWasImportFailed, StartedDelete)
                | (PendingDeleteWasGenerateFailed, StartedDelete)
                | (StartedDelete, FinishedDelete)
        )
    }

    /// Validates `self -> next`, returning `next`.
    pub fn transition(self, next: Self) -> Result<Self, Error> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidStatusTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn allows_generate(self) -> bool {
        matches!(self, Self::PendingGenerate | Self::Active)
    }

    pub fn allows_import(self) -> bool {
        matches!(self, Self::PendingImport | Self::Active)
    }

    pub fn allows_encrypt(self) -> bool {
        self == Self::Active
    }

    /// Disabled pools still open data encrypted before they were disabled.
    pub fn allows_decrypt(self) -> bool {
        matches!(self, Self::Active | Self::Disabled)
    }

    /// The `PendingDeleteWas*` status a delete request moves `self` to.
    pub fn pending_delete(self) -> Result<Self, Error> {
        match self {
            Self::Active => Ok(Self::PendingDeleteWasActive),
            Self::Disabled => Ok(Self::PendingDeleteWasDisabled),
            Self::ImportFailed => Ok(Self::PendingDeleteWasImportFailed),
            Self::PendingImport => Ok(Self::PendingDeleteWasPendingImport),
            Self::GenerateFailed => Ok(Self::PendingDeleteWasGenerateFailed),
            other => Err(Error::invalid_parameter(format!(
                "key pool in status {other} cannot be deleted"
            ))),
        }
    }
}

/// Parameters for a new key pool.
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct KeyPoolCreate {
    /// Unique, non-empty name
    #[builder(into)]
    pub name: String,
    #[builder(into, default)]
    #[serde(default)]
    pub description: String,
    /// Who holds the key material; only [`INTERNAL_PROVIDER`] can encrypt
    #[builder(into, default = INTERNAL_PROVIDER.to_owned())]
    #[serde(default = "internal_provider")]
    pub provider: String,
    pub algorithm: KeyPoolAlgorithm,
    /// Whether more than one key may be added to the pool
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub versioning_allowed: bool,
    /// Whether keys are imported instead of generated
    #[builder(default)]
    #[serde(default)]
    pub import_allowed: bool,
    #[builder(default)]
    #[serde(default)]
    pub export_allowed: bool,
}

fn internal_provider() -> String {
    INTERNAL_PROVIDER.to_owned()
}

fn default_true() -> bool {
    true
}

impl KeyPoolCreate {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_parameter("key pool name must not be empty"));
        }
        if self.provider.trim().is_empty() {
            return Err(Error::invalid_parameter(
                "key pool provider must not be empty",
            ));
        }
        Ok(())
    }
}

/// New name and description of an existing key pool.
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct KeyPoolUpdate {
    #[builder(into)]
    pub name: String,
    #[builder(into, default)]
    #[serde(default)]
    pub description: String,
}

impl KeyPoolUpdate {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_parameter("key pool name must not be empty"));
        }
        Ok(())
    }
}

/// A named set of versioned keys sharing one algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPool {
    /// UUIDv7 identifier
    pub key_pool_id: Uuid,
    pub name: String,
    pub description: String,
    pub provider: String,
    pub algorithm: KeyPoolAlgorithm,
    pub versioning_allowed: bool,
    pub import_allowed: bool,
    pub export_allowed: bool,
    pub status: KeyPoolStatus,
}

impl KeyPool {
    pub(crate) fn from_create(key_pool_id: Uuid, create: KeyPoolCreate) -> Self {
        Self {
            key_pool_id,
            status: KeyPoolStatus::initial(create.import_allowed),
            name: create.name,
            description: create.description,
            provider: create.provider,
            algorithm: create.algorithm,
            versioning_allowed: create.versioning_allowed,
            import_allowed: create.import_allowed,
            export_allowed: create.export_allowed,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.provider == INTERNAL_PROVIDER
    }
}

/// One version of key material in a key pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    pub key_pool_id: Uuid,
    /// UUIDv7 identifier, used as the JWE `kid`
    pub key_id: Uuid,
    /// Barrier ciphertext of the raw key; never leaves the service
    #[serde(skip)]
    pub key_material: Vec<u8>,
    /// Set for generated keys
    pub key_generate_date: Option<DateTime<Utc>>,
    /// Set for imported keys
    pub key_import_date: Option<DateTime<Utc>>,
}
