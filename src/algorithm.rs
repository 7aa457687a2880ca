//! The closed set of key pool algorithms and how each one resolves to a JWE
//! `(alg, enc)` pair and to a class of raw key material.

use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    jose::{ContentEncryptionAlgorithm as Enc, KeyEncryptionAlgorithm as Alg},
};

/// Algorithm of a key pool, written `ENC/ALG`.
///
/// The key encryption half decides the size of the stored key: a wrapping
/// algorithm stores a KEK, `dir` stores the content encryption key itself.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum KeyPoolAlgorithm {
    #[serde(rename = "A256GCM/A256KW")]
    #[strum(serialize = "A256GCM/A256KW")]
    A256GcmA256Kw,
    #[serde(rename = "A192GCM/A256KW")]
    #[strum(serialize = "A192GCM/A256KW")]
    A192GcmA256Kw,
    #[serde(rename = "A128GCM/A256KW")]
    #[strum(serialize = "A128GCM/A256KW")]
    A128GcmA256Kw,
    #[serde(rename = "A192GCM/A192KW")]
    #[strum(serialize = "A192GCM/A192KW")]
    A192GcmA192Kw,
    #[serde(rename = "A128GCM/A192KW")]
    #[strum(serialize = "A128GCM/A192KW")]
    A128GcmA192Kw,
    #[serde(rename = "A128GCM/A128KW")]
    #[strum(serialize = "A128GCM/A128KW")]
    A128GcmA128Kw,

    #[serde(rename = "A256GCM/A256GCMKW")]
    #[strum(serialize = "A256GCM/A256GCMKW")]
    A256GcmA256GcmKw,
    #[serde(rename = "A192GCM/A256GCMKW")]
    #[strum(serialize = "A192GCM/A256GCMKW")]
    A192GcmA256GcmKw,
    #[serde(rename = "A128GCM/A256GCMKW")]
    #[strum(serialize = "A128GCM/A256GCMKW")]
    A128GcmA256GcmKw,
    #[serde(rename = "A192GCM/A192GCMKW")]
    #[strum(serialize = "A192GCM/A192GCMKW")]
    A192GcmA192GcmKw,
    #[serde(rename = "A128GCM/A192GCMKW")]
    #[strum(serialize = "A128GCM/A192GCMKW")]
    A128GcmA192GcmKw,
    #[serde(rename = "A128GCM/A128GCMKW")]
    #[strum(serialize = "A128GCM/A128GCMKW")]
    A128GcmA128GcmKw,

    #[serde(rename = "A256CBC-HS512/A256KW")]
    #[strum(serialize = "A256CBC-HS512/A256KW")]
    A256CbcHs512A256Kw,
    #[serde(rename = "A192CBC-HS384/A256KW")]
    #[strum(serialize = "A192CBC-HS384/A256KW")]
    A192CbcHs384A256Kw,
    #[serde(rename = "A128CBC-HS256/A256KW")]
    #[strum(serialize = "A128CBC-HS256/A256KW")]
    A128CbcHs256A256Kw,
    #[serde(rename = "A192CBC-HS384/A192KW")]
    #[strum(serialize = "A192CBC-HS384/A192KW")]
    A192CbcHs384A192Kw,
    #[serde(rename = "A128CBC-HS256/A192KW")]
    #[strum(serialize = "A128CBC-HS256/A192KW")]
    A128CbcHs256A192Kw,
    #[serde(rename = "A128CBC-HS256/A128KW")]
    #[strum(serialize = "A128CBC-HS256/A128KW")]
    A128CbcHs256A128Kw,

    #[serde(rename = "A256CBC-HS512/A256GCMKW")]
    #[strum(serialize = "A256CBC-HS512/A256GCMKW")]
    A256CbcHs512A256GcmKw,
    #[serde(rename = "A192CBC-HS384/A256GCMKW")]
    #[strum(serialize = "A192CBC-HS384/A256GCMKW")]
    A192CbcHs384A256GcmKw,
    #[serde(rename = "A128CBC-HS256/A256GCMKW")]
    #[strum(serialize = "A128CBC-HS256/A256GCMKW")]
    A128CbcHs256A256GcmKw,
    #[serde(rename = "A192CBC-HS384/A192GCMKW")]
    #[strum(serialize = "A192CBC-HS384/A192GCMKW")]
    A192CbcHs384A192GcmKw,
    #[serde(rename = "A128CBC-HS256/A192GCMKW")]
    #[strum(serialize = "A128CBC-HS256/A192GCMKW")]
    A128CbcHs256A192GcmKw,
    #[serde(rename = "A128CBC-HS256/A128GCMKW")]
    #[strum(serialize = "A128CBC-HS256/A128GCMKW")]
    A128CbcHs256A128GcmKw,

    #[serde(rename = "A256GCM/dir")]
    #[strum(serialize = "A256GCM/dir")]
    A256GcmDir,
    #[serde(rename = "A192GCM/dir")]
    #[strum(serialize = "A192GCM/dir")]
    A192GcmDir,
    #[serde(rename = "A128GCM/dir")]
    #[strum(serialize = "A128GCM/dir")]
    A128GcmDir,
    #[serde(rename = "A256CBC-HS512/dir")]
    #[strum(serialize = "A256CBC-HS512/dir")]
    A256CbcHs512Dir,
    #[serde(rename = "A192CBC-HS384/dir")]
    #[strum(serialize = "A192CBC-HS384/dir")]
    A192CbcHs384Dir,
    #[serde(rename = "A128CBC-HS256/dir")]
    #[strum(serialize = "A128CBC-HS256/dir")]
    A128CbcHs256Dir,
}

/// Shape of the raw key material a key pool stores, one per key-gen pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum KeyMaterialClass {
    /// 32 bytes: A256GCM, A256KW, A256GCMKW
    #[strum(serialize = "AES-256")]
    Aes256,
    /// 24 bytes: A192GCM, A192KW, A192GCMKW
    #[strum(serialize = "AES-192")]
    Aes192,
    /// 16 bytes: A128GCM, A128KW, A128GCMKW
    #[strum(serialize = "AES-128")]
    Aes128,
    /// 32 byte HMAC-SHA512 key followed by a 32 byte AES-256-CBC key
    #[strum(serialize = "AES-256-CBC HS-512")]
    Aes256Hs512,
    /// 24 byte HMAC-SHA384 key followed by a 24 byte AES-192-CBC key
    #[strum(serialize = "AES-192-CBC HS-384")]
    Aes192Hs384,
    /// 16 byte HMAC-SHA256 key followed by a 16 byte AES-128-CBC key
    #[strum(serialize = "AES-128-CBC HS-256")]
    Aes128Hs256,
}

impl KeyMaterialClass {
    pub fn byte_len(self) -> usize {
        match self {
            Self::Aes256 => 32,
            Self::Aes192 => 24,
            Self::Aes128 => 16,
            Self::Aes256Hs512 => 64,
            Self::Aes192Hs384 => 48,
            Self::Aes128Hs256 => 32,
        }
    }
}

impl KeyPoolAlgorithm {
    /// Parses the `ENC/ALG` form, failing with [`Error::UnsupportedAlgorithm`]
    /// for anything outside the closed set.
    pub fn parse(s: &str) -> Result<Self, Error> {
        s.parse().map_err(|_| Error::unsupported_algorithm(s))
    }

    /// The JWE `(alg, enc)` pair keys of this pool are used with.
    pub fn resolve(self) -> (Alg, Enc) {
        use KeyPoolAlgorithm::*;

        match self {
            A256GcmA256Kw => (Alg::A256Kw, Enc::A256Gcm),
            A192GcmA256Kw => (Alg::A256Kw, Enc::A192Gcm),
            A128GcmA256Kw => (Alg::A256Kw, Enc::A128Gcm),
            A192GcmA192Kw => (Alg::A192Kw, Enc::A192Gcm),
            A128GcmA192Kw => (Alg::A192Kw, Enc::A128Gcm),
            A128GcmA128Kw => (Alg::A128Kw, Enc::A128Gcm),

            A256GcmA256GcmKw => (Alg::A256GcmKw, Enc::A256Gcm),
            A192GcmA256GcmKw => (Alg::A256GcmKw, Enc::A192Gcm),
            A128GcmA256GcmKw => (Alg::A256GcmKw, Enc::A128Gcm),
            A192GcmA192GcmKw => (Alg::A192GcmKw, Enc::A192Gcm),
            A128GcmA192GcmKw => (Alg::A192GcmKw, Enc::A128Gcm),
            A128GcmA128GcmKw => (Alg::A128GcmKw, Enc::A128Gcm),

            A256CbcHs512A256Kw => (Alg::A256Kw, Enc::A256CbcHs512),
            A192CbcHs384A256Kw => (Alg::A256Kw, Enc::A192CbcHs384),
            A128CbcHs256A256Kw => (Alg::A256Kw, Enc::A128CbcHs256),
            A192CbcHs384A192Kw => (Alg::A192Kw, Enc::A192CbcHs384),
            A128CbcHs256A192Kw => (Alg::A192Kw, Enc::A128CbcHs256),
            A128CbcHs256A128Kw => (Alg::A128Kw, Enc::A128CbcHs256),

            A256CbcHs512A256GcmKw => (Alg::A256GcmKw, Enc::A256CbcHs512),
            A192CbcHs384A256GcmKw => (Alg::A256GcmKw, Enc::A192CbcHs384),
            A128CbcHs256A256GcmKw => (Alg::A256GcmKw, Enc::A128CbcHs256),
            A192CbcHs384A192GcmKw => (Alg::A192GcmKw, Enc::A192CbcHs384),
            A128CbcHs256A192GcmKw => (Alg::A192GcmKw, Enc::A128CbcHs256),
            A128CbcHs256A128GcmKw => (Alg::A128GcmKw, Enc::A128CbcHs256),

            A256GcmDir => (Alg::Dir, Enc::A256Gcm),
            A192GcmDir => (Alg::Dir, Enc::A192Gcm),
            A128GcmDir => (Alg::Dir, Enc::A128Gcm),
            A256CbcHs512Dir => (Alg::Dir, Enc::A256CbcHs512),
            A192CbcHs384Dir => (Alg::Dir, Enc::A192CbcHs384),
            A128CbcHs256Dir => (Alg::Dir, Enc::A128CbcHs256),
        }
    }

    /// Which key-gen pool supplies raw material for keys of this pool.
    pub fn material_class(self) -> KeyMaterialClass {
        use KeyPoolAlgorithm::*;

        match self {
            A256GcmA256Kw | A192GcmA256Kw | A128GcmA256Kw | A256GcmA256GcmKw
            | A192GcmA256GcmKw | A128GcmA256GcmKw | A256CbcHs512A256Kw | A192CbcHs384A256Kw
            | A128CbcHs256A256Kw | A256CbcHs512A256GcmKw | A192CbcHs384A256GcmKw
            | A128CbcHs256A256GcmKw | A256GcmDir => KeyMaterialClass::Aes256,

            A192GcmA192Kw | A128GcmA192Kw | A192GcmA192GcmKw | A128GcmA192GcmKw
            | A192CbcHs384A192Kw | A128CbcHs256A192Kw | A192CbcHs384A192GcmKw
            | A128CbcHs256A192GcmKw | A192GcmDir => KeyMaterialClass::Aes192,

            A128GcmA128Kw | A128GcmA128GcmKw | A128CbcHs256A128Kw | A128CbcHs256A128GcmKw
            | A128GcmDir => KeyMaterialClass::Aes128,

            A256CbcHs512Dir => KeyMaterialClass::Aes256Hs512,
            A192CbcHs384Dir => KeyMaterialClass::Aes192Hs384,
            A128CbcHs256Dir => KeyMaterialClass::Aes128Hs256,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use strum::IntoEnumIterator;
    use uuid::Uuid;
    use zeroize::Zeroizing;

    use super::*;
    use crate::jose::JweKey;

    #[test]
    fn closed_set_has_thirty_members() {
        assert_eq!(KeyPoolAlgorithm::iter().count(), 30);

        let pairs = KeyPoolAlgorithm::iter()
            .map(KeyPoolAlgorithm::resolve)
            .collect::<HashSet<_>>();
        assert_eq!(pairs.len(), 30, "every algorithm maps to a distinct pair");
    }

    #[test]
    fn string_form_is_enc_slash_alg() {
        for algorithm in KeyPoolAlgorithm::iter() {
            let (alg, enc) = algorithm.resolve();
            assert_eq!(algorithm.to_string(), format!("{enc}/{alg}"));
            assert_eq!(KeyPoolAlgorithm::parse(algorithm.as_ref()).unwrap(), algorithm);
        }
    }

    #[test]
    fn material_class_matches_resolved_algorithms() {
        for algorithm in KeyPoolAlgorithm::iter() {
            let (alg, enc) = algorithm.resolve();
            let expected = alg.kek_len().unwrap_or_else(|| enc.key_len());
            assert_eq!(
                algorithm.material_class().byte_len(),
                expected,
                "{algorithm} draws the wrong size of key material"
            );

            let material = Zeroizing::new(vec![0u8; algorithm.material_class().byte_len()]);
            JweKey::new(Uuid::now_v7(), enc, alg, material).unwrap();
        }
    }

    #[test]
    fn representative_mappings() {
        use crate::jose::{ContentEncryptionAlgorithm as E, KeyEncryptionAlgorithm as A};

        assert_eq!(
            KeyPoolAlgorithm::A256GcmA256Kw.resolve(),
            (A::A256Kw, E::A256Gcm)
        );
        assert_eq!(
            KeyPoolAlgorithm::A128CbcHs256A192GcmKw.resolve(),
            (A::A192GcmKw, E::A128CbcHs256)
        );
        assert_eq!(
            KeyPoolAlgorithm::A256CbcHs512Dir.material_class(),
            KeyMaterialClass::Aes256Hs512
        );
        assert_eq!(
            KeyPoolAlgorithm::A128GcmA256GcmKw.material_class(),
            KeyMaterialClass::Aes256
        );
    }

    #[test]
    fn unknown_algorithms_are_unsupported() {
        for input in ["", "A256GCM", "RSA-OAEP/A256GCM", "a256gcm/a256kw", "A512GCM/dir"] {
            assert!(
                matches!(
                    KeyPoolAlgorithm::parse(input),
                    Err(Error::UnsupportedAlgorithm { .. })
                ),
                "{input:?} should be rejected"
            );
        }
    }
}
