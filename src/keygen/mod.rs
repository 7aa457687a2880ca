//! Pre-generated key material and identifiers.
//!
//! One [`ValueGenPool`] per [`KeyMaterialClass`] plus one of UUIDv7s, so
//! requests rarely wait on the CSPRNG.

use std::sync::Arc;

use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    algorithm::{KeyMaterialClass, KeyPoolAlgorithm},
    crypto,
    error::Error,
};

pub mod pool;

pub use pool::{GenerateFn, ValueGenPool, ValueGenPoolConfig};

pub type KeyMaterial = Zeroizing<Vec<u8>>;

pub struct KeyGenPools {
    pub aes256: ValueGenPool<KeyMaterial>,
    pub aes192: ValueGenPool<KeyMaterial>,
    pub aes128: ValueGenPool<KeyMaterial>,
    pub aes256_hs512: ValueGenPool<KeyMaterial>,
    pub aes192_hs384: ValueGenPool<KeyMaterial>,
    pub aes128_hs256: ValueGenPool<KeyMaterial>,
    pub uuid_v7: ValueGenPool<Uuid>,
}

fn material_pool(
    name: &str,
    class: KeyMaterialClass,
    workers: usize,
    size: usize,
) -> Result<ValueGenPool<KeyMaterial>, Error> {
    let len = class.byte_len();
    ValueGenPool::start(
        ValueGenPoolConfig::builder()
            .name(name)
            .workers(workers)
            .size(size)
            .generate(Arc::new(move || crypto::random_bytes(len)))
            .build(),
    )
}

impl KeyGenPools {
    /// Starts every pool with its default sizing.
    pub fn start() -> Result<Self, Error> {
        Ok(Self {
            aes256: material_pool("aes256", KeyMaterialClass::Aes256, 2, 6)?,
            aes192: material_pool("aes192", KeyMaterialClass::Aes192, 1, 4)?,
            aes128: material_pool("aes128", KeyMaterialClass::Aes128, 1, 2)?,
            aes256_hs512: material_pool("aes256_hs512", KeyMaterialClass::Aes256Hs512, 1, 6)?,
            aes192_hs384: material_pool("aes192_hs384", KeyMaterialClass::Aes192Hs384, 1, 4)?,
            aes128_hs256: material_pool("aes128_hs256", KeyMaterialClass::Aes128Hs256, 1, 2)?,
            uuid_v7: ValueGenPool::start(
                ValueGenPoolConfig::builder()
                    .name("uuid_v7")
                    .workers(1)
                    .size(2)
                    .generate(Arc::new(|| Ok::<_, Error>(Uuid::now_v7())))
                    .build(),
            )?,
        })
    }

    pub fn pool(&self, class: KeyMaterialClass) -> &ValueGenPool<KeyMaterial> {
        match class {
            KeyMaterialClass::Aes256 => &self.aes256,
            KeyMaterialClass::Aes192 => &self.aes192,
            KeyMaterialClass::Aes128 => &self.aes128,
            KeyMaterialClass::Aes256Hs512 => &self.aes256_hs512,
            KeyMaterialClass::Aes192Hs384 => &self.aes192_hs384,
            KeyMaterialClass::Aes128Hs256 => &self.aes128_hs256,
        }
    }

    /// Raw key material sized for `algorithm`.
    pub async fn generate_key_material(
        &self,
        algorithm: KeyPoolAlgorithm,
    ) -> Result<KeyMaterial, Error> {
        self.pool(algorithm.material_class()).get().await
    }

    pub async fn generate_id(&self) -> Result<Uuid, Error> {
        self.uuid_v7.get().await
    }

    pub fn cancel(&self) {
        for pool in [
            &self.aes256,
            &self.aes192,
            &self.aes128,
            &self.aes256_hs512,
            &self.aes192_hs384,
            &self.aes128_hs256,
        ] {
            if !pool.is_cancelled() {
                pool.cancel();
            }
        }
        if !self.uuid_v7.is_cancelled() {
            self.uuid_v7.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[tokio::test]
    async fn material_matches_every_algorithm() {
        let pools = KeyGenPools::start().unwrap();

        for algorithm in KeyPoolAlgorithm::iter() {
            let material = pools.generate_key_material(algorithm).await.unwrap();
            assert_eq!(
                material.len(),
                algorithm.material_class().byte_len(),
                "{algorithm}"
            );
        }
    }

    #[tokio::test]
    async fn ids_are_time_ordered() {
        let pools = KeyGenPools::start().unwrap();

        let mut previous = pools.generate_id().await.unwrap();
        assert_eq!(previous.get_version_num(), 7);
        for _ in 0..200 {
            let next = pools.generate_id().await.unwrap();
            assert!(previous < next, "{previous} >= {next}");
            previous = next;
        }
    }

    #[tokio::test]
    async fn cancelled_pools_refuse_requests() {
        let pools = KeyGenPools::start().unwrap();
        pools.cancel();

        assert!(matches!(
            pools.generate_key_material(KeyPoolAlgorithm::A128GcmDir).await,
            Err(Error::PoolClosed { .. })
        ));
        assert!(matches!(pools.generate_id().await, Err(Error::PoolClosed { .. })));
    }
}
