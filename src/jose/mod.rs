//! Compact JWE for the symmetric algorithms key pools are built on.
//!
//! A message is `header.encrypted_key.iv.ciphertext.tag`, each part base64url
//! without padding. The protected header always carries `alg`, `enc` and
//! `kid`; for the GCM key-wrap algorithms it also carries the wrapping `iv`
//! and `tag`. The encoded header is the additional authenticated data of the
//! content encryption, so tampering with any header field fails decryption.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{crypto::random_bytes, error::Error};

mod cipher;

/// JWE `alg`: how the content encryption key reaches the recipient.
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
)]
pub enum KeyEncryptionAlgorithm {
    #[serde(rename = "A128KW")]
    #[strum(serialize = "A128KW")]
    A128Kw,
    #[serde(rename = "A192KW")]
    #[strum(serialize = "A192KW")]
    A192Kw,
    #[serde(rename = "A256KW")]
    #[strum(serialize = "A256KW")]
    A256Kw,
    #[serde(rename = "A128GCMKW")]
    #[strum(serialize = "A128GCMKW")]
    A128GcmKw,
    #[serde(rename = "A192GCMKW")]
    #[strum(serialize = "A192GCMKW")]
    A192GcmKw,
    #[serde(rename = "A256GCMKW")]
    #[strum(serialize = "A256GCMKW")]
    A256GcmKw,
    /// The key itself is the content encryption key.
    #[serde(rename = "dir")]
    #[strum(serialize = "dir")]
    Dir,
}

impl KeyEncryptionAlgorithm {
    /// Length of the key encryption key, `None` for direct encryption.
    pub fn kek_len(self) -> Option<usize> {
        match self {
            Self::A128Kw | Self::A128GcmKw => Some(16),
            Self::A192Kw | Self::A192GcmKw => Some(24),
            Self::A256Kw | Self::A256GcmKw => Some(32),
            Self::Dir => None,
        }
    }
}

/// JWE `enc`: the authenticated cipher applied to the payload.
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
)]
pub enum ContentEncryptionAlgorithm {
    #[serde(rename = "A128GCM")]
    #[strum(serialize = "A128GCM")]
    A128Gcm,
    #[serde(rename = "A192GCM")]
    #[strum(serialize = "A192GCM")]
    A192Gcm,
    #[serde(rename = "A256GCM")]
    #[strum(serialize = "A256GCM")]
    A256Gcm,
    #[serde(rename = "A128CBC-HS256")]
    #[strum(serialize = "A128CBC-HS256")]
    A128CbcHs256,
    #[serde(rename = "A192CBC-HS384")]
    #[strum(serialize = "A192CBC-HS384")]
    A192CbcHs384,
    #[serde(rename = "A256CBC-HS512")]
    #[strum(serialize = "A256CBC-HS512")]
    A256CbcHs512,
}

impl ContentEncryptionAlgorithm {
    /// Length of the content encryption key. The CBC-HS keys hold the MAC key
    /// followed by the AES key.
    pub fn key_len(self) -> usize {
        match self {
            Self::A128Gcm => 16,
            Self::A192Gcm => 24,
            Self::A256Gcm => 32,
            Self::A128CbcHs256 => 32,
            Self::A192CbcHs384 => 48,
            Self::A256CbcHs512 => 64,
        }
    }

    pub fn is_gcm(self) -> bool {
        matches!(self, Self::A128Gcm | Self::A192Gcm | Self::A256Gcm)
    }

    fn iv_len(self) -> usize {
        if self.is_gcm() {
            cipher::GCM_IV_LEN
        } else {
            cipher::CBC_IV_LEN
        }
    }
}

/// A symmetric JWK: raw key material bound to its `kid`, `alg` and `enc`.
pub struct JweKey {
    kid: Uuid,
    enc: ContentEncryptionAlgorithm,
    alg: KeyEncryptionAlgorithm,
    material: Zeroizing<Vec<u8>>,
}

impl JweKey {
    /// Builds a key, checking the material fits the algorithms: the KEK
    /// length for the wrapping algorithms, the content key length for `dir`.
    pub fn new(
        kid: Uuid,
        enc: ContentEncryptionAlgorithm,
        alg: KeyEncryptionAlgorithm,
        material: Zeroizing<Vec<u8>>,
    ) -> Result<Self, Error> {
        let expected = alg.kek_len().unwrap_or_else(|| enc.key_len());
        if material.len() != expected {
            return Err(Error::jose(format!(
                "{enc}/{alg} needs {expected} bytes of key material, got {}",
                material.len()
            )));
        }

        Ok(Self {
            kid,
            enc,
            alg,
            material,
        })
    }

    pub fn kid(&self) -> Uuid {
        self.kid
    }

    pub fn enc(&self) -> ContentEncryptionAlgorithm {
        self.enc
    }

    pub fn alg(&self) -> KeyEncryptionAlgorithm {
        self.alg
    }
}

impl fmt::Debug for JweKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JweKey")
            .field("kid", &self.kid)
            .field("enc", &self.enc)
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtectedHeader {
    pub alg: KeyEncryptionAlgorithm,
    pub enc: ContentEncryptionAlgorithm,
    pub kid: String,
    /// GCMKW initialization vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    /// GCMKW authentication tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// A parsed compact JWE.
#[derive(Debug, Clone)]
pub struct JweMessage {
    header: ProtectedHeader,
    encoded_header: String,
    encrypted_key: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

fn decode_part(name: &str, part: &str) -> Result<Vec<u8>, Error> {
    URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|e| Error::jose(format!("invalid JWE {name} encoding: {e}")))
}

impl JweMessage {
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::jose("JWE message is not valid UTF-8"))?;

        let parts = text.trim().split('.').collect::<Vec<_>>();
        let [header, encrypted_key, iv, ciphertext, tag] = parts.as_slice() else {
            return Err(Error::jose(format!(
                "JWE compact serialization has 5 parts, got {}",
                parts.len()
            )));
        };

        let header_json = decode_part("header", header)?;
        let parsed: ProtectedHeader = serde_json::from_slice(&header_json)
            .map_err(|e| Error::jose(format!("invalid JWE protected header: {e}")))?;

        Ok(Self {
            header: parsed,
            encoded_header: header.to_string(),
            encrypted_key: decode_part("encrypted key", encrypted_key)?,
            iv: decode_part("iv", iv)?,
            ciphertext: decode_part("ciphertext", ciphertext)?,
            tag: decode_part("tag", tag)?,
        })
    }

    pub fn header(&self) -> &ProtectedHeader {
        &self.header
    }

    /// The `kid` header as the UUID of the key that encrypted the message.
    pub fn kid(&self) -> Result<Uuid, Error> {
        Uuid::parse_str(&self.header.kid)
            .map_err(|e| Error::jose(format!("JWE kid {:?} is not a UUID: {e}", self.header.kid)))
    }

    pub fn alg(&self) -> KeyEncryptionAlgorithm {
        self.header.alg
    }

    pub fn enc(&self) -> ContentEncryptionAlgorithm {
        self.header.enc
    }
}

/// Encrypts `clear` under `key` and returns the compact serialization.
pub fn encrypt(key: &JweKey, clear: &[u8]) -> Result<String, Error> {
    if clear.is_empty() {
        return Err(Error::jose("clear bytes must not be empty"));
    }

    let cek = match key.alg {
        KeyEncryptionAlgorithm::Dir => Zeroizing::new(key.material.to_vec()),
        _ => random_bytes(key.enc.key_len())?,
    };

    let mut header = ProtectedHeader {
        alg: key.alg,
        enc: key.enc,
        kid: key.kid.to_string(),
        iv: None,
        tag: None,
    };

    let encrypted_key = match key.alg {
        KeyEncryptionAlgorithm::Dir => Vec::new(),
        KeyEncryptionAlgorithm::A128Kw
        | KeyEncryptionAlgorithm::A192Kw
        | KeyEncryptionAlgorithm::A256Kw => cipher::key_wrap(&key.material, &cek)?,
        KeyEncryptionAlgorithm::A128GcmKw
        | KeyEncryptionAlgorithm::A192GcmKw
        | KeyEncryptionAlgorithm::A256GcmKw => {
            let iv = random_bytes(cipher::GCM_IV_LEN)?;
            let (wrapped, tag) = cipher::gcm_seal(&key.material, &iv, &[], &cek)?;
            header.iv = Some(URL_SAFE_NO_PAD.encode(iv.as_slice()));
            header.tag = Some(URL_SAFE_NO_PAD.encode(tag));
            wrapped
        }
    };

    let encoded_header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
    let iv = random_bytes(key.enc.iv_len())?;
    let (ciphertext, tag) =
        cipher::seal_content(key.enc, &cek, &iv, encoded_header.as_bytes(), clear)?;

    Ok(format!(
        "{}.{}.{}.{}.{}",
        encoded_header,
        URL_SAFE_NO_PAD.encode(encrypted_key),
        URL_SAFE_NO_PAD.encode(iv.as_slice()),
        URL_SAFE_NO_PAD.encode(ciphertext),
        URL_SAFE_NO_PAD.encode(tag),
    ))
}

/// Decrypts a parsed message. The header's `alg`, `enc` and `kid` must name
/// `key`.
pub fn decrypt(key: &JweKey, message: &JweMessage) -> Result<Vec<u8>, Error> {
    let header = &message.header;
    if header.alg != key.alg || header.enc != key.enc {
        return Err(Error::jose(format!(
            "JWE is {}/{} but key {} is {}/{}",
            header.enc, header.alg, key.kid, key.enc, key.alg
        )));
    }
    if message.kid()? != key.kid {
        return Err(Error::jose(format!(
            "JWE kid {} does not match key {}",
            header.kid, key.kid
        )));
    }

    let cek = match key.alg {
        KeyEncryptionAlgorithm::Dir => {
            if !message.encrypted_key.is_empty() {
                return Err(Error::jose("direct encryption must not carry an encrypted key"));
            }
            Zeroizing::new(key.material.to_vec())
        }
        KeyEncryptionAlgorithm::A128Kw
        | KeyEncryptionAlgorithm::A192Kw
        | KeyEncryptionAlgorithm::A256Kw => {
            Zeroizing::new(cipher::key_unwrap(&key.material, &message.encrypted_key)?)
        }
        KeyEncryptionAlgorithm::A128GcmKw
        | KeyEncryptionAlgorithm::A192GcmKw
        | KeyEncryptionAlgorithm::A256GcmKw => {
            let (Some(iv), Some(tag)) = (&header.iv, &header.tag) else {
                return Err(Error::jose(format!("{} header requires iv and tag", key.alg)));
            };
            Zeroizing::new(cipher::gcm_open(
                &key.material,
                &decode_part("header iv", iv)?,
                &[],
                &message.encrypted_key,
                &decode_part("header tag", tag)?,
            )?)
        }
    };

    cipher::open_content(
        key.enc,
        &cek,
        &message.iv,
        message.encoded_header.as_bytes(),
        &message.ciphertext,
        &message.tag,
    )
}

/// Parses and decrypts a compact JWE.
pub fn decrypt_bytes(key: &JweKey, bytes: &[u8]) -> Result<Vec<u8>, Error> {
    let message = JweMessage::parse(bytes)?;
    decrypt(key, &message)
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    fn key_for(
        enc: ContentEncryptionAlgorithm,
        alg: KeyEncryptionAlgorithm,
    ) -> JweKey {
        let len = alg.kek_len().unwrap_or_else(|| enc.key_len());
        JweKey::new(Uuid::now_v7(), enc, alg, random_bytes(len).unwrap()).unwrap()
    }

    #[test]
    fn round_trip_every_algorithm_pair() {
        for enc in ContentEncryptionAlgorithm::iter() {
            for alg in KeyEncryptionAlgorithm::iter() {
                let key = key_for(enc, alg);
                let jwe = encrypt(&key, b"hello").unwrap();
                let message = JweMessage::parse(jwe.as_bytes()).unwrap();

                assert_eq!(message.alg(), alg);
                assert_eq!(message.enc(), enc);
                assert_eq!(message.kid().unwrap(), key.kid());
                assert_eq!(decrypt(&key, &message).unwrap(), b"hello", "{enc}/{alg}");
            }
        }
    }

    #[test]
    fn header_is_plain_json() {
        let key = key_for(
            ContentEncryptionAlgorithm::A256Gcm,
            KeyEncryptionAlgorithm::A256Kw,
        );
        let jwe = encrypt(&key, b"hello").unwrap();
        let header = jwe.split('.').next().unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).unwrap()).unwrap();

        assert_eq!(json["alg"], "A256KW");
        assert_eq!(json["enc"], "A256GCM");
        assert_eq!(json["kid"], key.kid().to_string());
        assert!(json.get("iv").is_none());
    }

    #[test]
    fn gcm_key_wrap_puts_iv_and_tag_in_header() {
        let key = key_for(
            ContentEncryptionAlgorithm::A128CbcHs256,
            KeyEncryptionAlgorithm::A192GcmKw,
        );
        let message = JweMessage::parse(encrypt(&key, b"x").unwrap().as_bytes()).unwrap();
        assert!(message.header().iv.is_some());
        assert!(message.header().tag.is_some());
    }

    #[test]
    fn empty_payload_is_rejected() {
        let key = key_for(
            ContentEncryptionAlgorithm::A128Gcm,
            KeyEncryptionAlgorithm::Dir,
        );
        assert!(matches!(encrypt(&key, b""), Err(Error::Jose { .. })));
    }

    #[test]
    fn material_length_is_checked() {
        let result = JweKey::new(
            Uuid::now_v7(),
            ContentEncryptionAlgorithm::A256CbcHs512,
            KeyEncryptionAlgorithm::Dir,
            Zeroizing::new(vec![0u8; 32]),
        );
        assert!(matches!(result, Err(Error::Jose { .. })));

        let result = JweKey::new(
            Uuid::now_v7(),
            ContentEncryptionAlgorithm::A256CbcHs512,
            KeyEncryptionAlgorithm::A128Kw,
            Zeroizing::new(vec![0u8; 16]),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn tampering_is_detected() {
        let key = key_for(
            ContentEncryptionAlgorithm::A192CbcHs384,
            KeyEncryptionAlgorithm::A256Kw,
        );
        let jwe = encrypt(&key, b"attack at dawn").unwrap();
        let mut parts = jwe.split('.').map(str::to_owned).collect::<Vec<_>>();

        let mut ciphertext = URL_SAFE_NO_PAD.decode(&parts[3]).unwrap();
        ciphertext[0] ^= 0x01;
        parts[3] = URL_SAFE_NO_PAD.encode(ciphertext);

        assert!(decrypt_bytes(&key, parts.join(".").as_bytes()).is_err());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let key = key_for(
            ContentEncryptionAlgorithm::A256Gcm,
            KeyEncryptionAlgorithm::A256GcmKw,
        );
        let other = key_for(
            ContentEncryptionAlgorithm::A256Gcm,
            KeyEncryptionAlgorithm::A256GcmKw,
        );
        let jwe = encrypt(&key, b"hello").unwrap();

        // kid mismatch
        assert!(decrypt_bytes(&other, jwe.as_bytes()).is_err());

        // same kid, different material
        let impostor = JweKey::new(
            key.kid(),
            key.enc(),
            key.alg(),
            random_bytes(32).unwrap(),
        )
        .unwrap();
        assert!(decrypt_bytes(&impostor, jwe.as_bytes()).is_err());
    }

    #[test]
    fn malformed_messages_fail_to_parse() {
        assert!(JweMessage::parse(b"a.b.c.d").is_err());
        assert!(JweMessage::parse(b"!!!.a.b.c.d").is_err());

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RSA-OAEP","enc":"A128GCM","kid":"x"}"#);
        assert!(JweMessage::parse(format!("{header}.a.b.c.d").as_bytes()).is_err());

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"dir","enc":"A128GCM","kid":"not-a-uuid"}"#);
        let message = JweMessage::parse(format!("{header}....").as_bytes()).unwrap();
        assert!(message.kid().is_err());
    }
}
