//! AES primitives behind the JWE algorithms: GCM, CBC with HMAC-SHA2
//! (RFC 7518 §5.2) and AES key wrap (RFC 3394).

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::{
    aead::{
        consts::U12, generic_array::typenum::Unsigned, AeadCore, AeadInPlace, KeyInit, Nonce, Tag,
    },
    Aes128Gcm, Aes256Gcm, AesGcm,
};
use aes_kw::{KekAes128, KekAes192, KekAes256};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};

use super::ContentEncryptionAlgorithm;
use crate::error::Error;

type Aes192Gcm = AesGcm<Aes192, U12>;

pub const GCM_IV_LEN: usize = 12;
pub const GCM_TAG_LEN: usize = 16;
pub const CBC_IV_LEN: usize = 16;

/// Bytes an AES key wrap adds to the wrapped key.
const KW_OVERHEAD: usize = 8;

fn gcm_seal_with<C>(
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), Error>
where
    C: KeyInit + AeadInPlace,
{
    let cipher = <C as KeyInit>::new_from_slice(key)
        .map_err(|_| Error::jose("invalid AES-GCM key length"))?;
    if iv.len() != <<C as AeadCore>::NonceSize as Unsigned>::USIZE {
        return Err(Error::jose(format!("invalid AES-GCM IV length {}", iv.len())));
    }

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<C>::from_slice(iv), aad, &mut buffer)
        .map_err(|_| Error::jose("AES-GCM encryption failed"))?;

    Ok((buffer, tag.to_vec()))
}

fn gcm_open_with<C>(
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, Error>
where
    C: KeyInit + AeadInPlace,
{
    let cipher = <C as KeyInit>::new_from_slice(key)
        .map_err(|_| Error::jose("invalid AES-GCM key length"))?;
    if iv.len() != <<C as AeadCore>::NonceSize as Unsigned>::USIZE {
        return Err(Error::jose(format!("invalid AES-GCM IV length {}", iv.len())));
    }
    if tag.len() != GCM_TAG_LEN {
        return Err(Error::jose(format!("invalid AES-GCM tag length {}", tag.len())));
    }

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::<C>::from_slice(iv),
            aad,
            &mut buffer,
            Tag::<C>::from_slice(tag),
        )
        .map_err(|_| Error::jose("AES-GCM authentication failed"))?;

    Ok(buffer)
}

/// AES-GCM encryption, the AES variant chosen by the key length.
/// Returns `(ciphertext, tag)`.
pub fn gcm_seal(
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), Error> {
    match key.len() {
        16 => gcm_seal_with::<Aes128Gcm>(key, iv, aad, plaintext),
        24 => gcm_seal_with::<Aes192Gcm>(key, iv, aad, plaintext),
        32 => gcm_seal_with::<Aes256Gcm>(key, iv, aad, plaintext),
        n => Err(Error::jose(format!("invalid AES-GCM key length {n}"))),
    }
}

pub fn gcm_open(
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, Error> {
    match key.len() {
        16 => gcm_open_with::<Aes128Gcm>(key, iv, aad, ciphertext, tag),
        24 => gcm_open_with::<Aes192Gcm>(key, iv, aad, ciphertext, tag),
        32 => gcm_open_with::<Aes256Gcm>(key, iv, aad, ciphertext, tag),
        n => Err(Error::jose(format!("invalid AES-GCM key length {n}"))),
    }
}

/// HMAC over `AAD || IV || ciphertext || AL` where AL is the AAD length in
/// bits as a 64-bit big-endian integer.
macro_rules! cbc_hs_mac {
    ($digest:ty, $mac_key:expr, $aad:expr, $iv:expr, $ciphertext:expr) => {{
        let mut mac = <Hmac<$digest> as Mac>::new_from_slice($mac_key)
            .map_err(|_| Error::jose("invalid HMAC key length"))?;
        mac.update($aad);
        mac.update($iv);
        mac.update($ciphertext);
        mac.update(&(($aad.len() as u64) * 8).to_be_bytes());
        mac
    }};
}

/// Splits a combined CBC-HS key into `(mac_key, enc_key)`.
fn split_cbc_hs_key(
    enc: ContentEncryptionAlgorithm,
    key: &[u8],
) -> Result<(&[u8], &[u8]), Error> {
    if enc.is_gcm() {
        return Err(Error::jose(format!("{enc} is not a CBC-HS algorithm")));
    }
    if key.len() != enc.key_len() {
        return Err(Error::jose(format!(
            "{enc} needs a {} byte key, got {}",
            enc.key_len(),
            key.len()
        )));
    }
    Ok(key.split_at(key.len() / 2))
}

pub fn cbc_hs_seal(
    enc: ContentEncryptionAlgorithm,
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let (mac_key, enc_key) = split_cbc_hs_key(enc, key)?;
    let invalid = |_| Error::jose("invalid AES-CBC key or IV length");

    let ciphertext = match enc_key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(enc_key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(enc_key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        _ => cbc::Encryptor::<Aes256>::new_from_slices(enc_key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    };

    let mut tag = match enc {
        ContentEncryptionAlgorithm::A128CbcHs256 => {
            cbc_hs_mac!(Sha256, mac_key, aad, iv, &ciphertext)
                .finalize()
                .into_bytes()
                .to_vec()
        }
        ContentEncryptionAlgorithm::A192CbcHs384 => {
            cbc_hs_mac!(Sha384, mac_key, aad, iv, &ciphertext)
                .finalize()
                .into_bytes()
                .to_vec()
        }
        _ => cbc_hs_mac!(Sha512, mac_key, aad, iv, &ciphertext)
            .finalize()
            .into_bytes()
            .to_vec(),
    };
    tag.truncate(mac_key.len());

    Ok((ciphertext, tag))
}

pub fn cbc_hs_open(
    enc: ContentEncryptionAlgorithm,
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, Error> {
    let (mac_key, enc_key) = split_cbc_hs_key(enc, key)?;
    if tag.len() != mac_key.len() {
        return Err(Error::jose(format!("invalid {enc} tag length {}", tag.len())));
    }

    let verified = match enc {
        ContentEncryptionAlgorithm::A128CbcHs256 => {
            cbc_hs_mac!(Sha256, mac_key, aad, iv, ciphertext).verify_truncated_left(tag)
        }
        ContentEncryptionAlgorithm::A192CbcHs384 => {
            cbc_hs_mac!(Sha384, mac_key, aad, iv, ciphertext).verify_truncated_left(tag)
        }
        _ => cbc_hs_mac!(Sha512, mac_key, aad, iv, ciphertext).verify_truncated_left(tag),
    };
    verified.map_err(|_| Error::jose(format!("{enc} authentication failed")))?;

    let invalid = |_| Error::jose("invalid AES-CBC key or IV length");
    let unpad = |_| Error::jose("invalid AES-CBC padding");

    match enc_key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(enc_key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(unpad),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(enc_key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(unpad),
        _ => cbc::Decryptor::<Aes256>::new_from_slices(enc_key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(unpad),
    }
}

/// Content encryption dispatch for a JWE `enc`. Returns `(ciphertext, tag)`.
pub fn seal_content(
    enc: ContentEncryptionAlgorithm,
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), Error> {
    if cek.len() != enc.key_len() {
        return Err(Error::jose(format!(
            "{enc} needs a {} byte content key, got {}",
            enc.key_len(),
            cek.len()
        )));
    }
    if enc.is_gcm() {
        gcm_seal(cek, iv, aad, plaintext)
    } else {
        cbc_hs_seal(enc, cek, iv, aad, plaintext)
    }
}

pub fn open_content(
    enc: ContentEncryptionAlgorithm,
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, Error> {
    if cek.len() != enc.key_len() {
        return Err(Error::jose(format!(
            "{enc} needs a {} byte content key, got {}",
            enc.key_len(),
            cek.len()
        )));
    }
    if enc.is_gcm() {
        gcm_open(cek, iv, aad, ciphertext, tag)
    } else {
        cbc_hs_open(enc, cek, iv, aad, ciphertext, tag)
    }
}

/// RFC 3394 AES key wrap, the AES variant chosen by the KEK length.
pub fn key_wrap(kek: &[u8], cek: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = vec![0u8; cek.len() + KW_OVERHEAD];
    let failed = |e: aes_kw::Error| Error::jose(format!("AES key wrap failed: {e}"));

    let wrapped = match kek.len() {
        16 => KekAes128::try_from(kek).map_err(failed)?.wrap(cek, &mut out),
        24 => KekAes192::try_from(kek).map_err(failed)?.wrap(cek, &mut out),
        32 => KekAes256::try_from(kek).map_err(failed)?.wrap(cek, &mut out),
        n => return Err(Error::jose(format!("invalid AES key wrap KEK length {n}"))),
    };
    wrapped.map_err(failed)?;

    Ok(out)
}

pub fn key_unwrap(kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, Error> {
    if wrapped.len() < 2 * KW_OVERHEAD || wrapped.len() % KW_OVERHEAD != 0 {
        return Err(Error::jose(format!(
            "invalid wrapped key length {}",
            wrapped.len()
        )));
    }
    let mut out = vec![0u8; wrapped.len() - KW_OVERHEAD];
    let failed = |e: aes_kw::Error| Error::jose(format!("AES key unwrap failed: {e}"));

    let unwrapped = match kek.len() {
        16 => KekAes128::try_from(kek).map_err(failed)?.unwrap(wrapped, &mut out),
        24 => KekAes192::try_from(kek).map_err(failed)?.unwrap(wrapped, &mut out),
        32 => KekAes256::try_from(kek).map_err(failed)?.unwrap(wrapped, &mut out),
        n => return Err(Error::jose(format!("invalid AES key wrap KEK length {n}"))),
    };
    unwrapped.map_err(failed)?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_wrap_matches_rfc3394_vector() {
        // RFC 3394 §4.1: 128-bit key data with a 128-bit KEK
        let kek = hex::decode("000102030405060708090A0B0C0D0E0F").unwrap();
        let data = hex::decode("00112233445566778899AABBCCDDEEFF").unwrap();
        let wrapped = key_wrap(&kek, &data).unwrap();
        assert_eq!(
            hex::encode_upper(&wrapped),
            "1FA68B0A8112B447AEF34BD8FB5A7B829D3E862371D2CFE5"
        );
        assert_eq!(key_unwrap(&kek, &wrapped).unwrap(), data);
    }

    #[test]
    fn key_unwrap_rejects_wrong_kek() {
        let wrapped = key_wrap(&[1u8; 32], &[7u8; 32]).unwrap();
        assert!(key_unwrap(&[2u8; 32], &wrapped).is_err());
        assert!(key_unwrap(&[1u8; 32], &wrapped[..8]).is_err());
    }

    #[test]
    fn gcm_rejects_tampered_aad() {
        let (ct, tag) = gcm_seal(&[3u8; 24], &[0u8; GCM_IV_LEN], b"aad", b"payload").unwrap();
        assert_eq!(tag.len(), GCM_TAG_LEN);
        assert_eq!(
            gcm_open(&[3u8; 24], &[0u8; GCM_IV_LEN], b"aad", &ct, &tag).unwrap(),
            b"payload"
        );
        assert!(gcm_open(&[3u8; 24], &[0u8; GCM_IV_LEN], b"aae", &ct, &tag).is_err());
        assert!(gcm_open(&[3u8; 24], &[0u8; GCM_IV_LEN], b"aad", &ct, &tag[..8]).is_err());
    }

    #[test]
    fn cbc_hs_tag_is_half_the_key() {
        for (enc, len) in [
            (ContentEncryptionAlgorithm::A128CbcHs256, 32),
            (ContentEncryptionAlgorithm::A192CbcHs384, 48),
            (ContentEncryptionAlgorithm::A256CbcHs512, 64),
        ] {
            let key = vec![9u8; len];
            let iv = [1u8; CBC_IV_LEN];
            let (ct, tag) = cbc_hs_seal(enc, &key, &iv, b"header", b"sixteen byte msg").unwrap();
            assert_eq!(tag.len(), len / 2);
            assert_eq!(ct.len(), 32, "full block of padding is appended");
            assert_eq!(
                cbc_hs_open(enc, &key, &iv, b"header", &ct, &tag).unwrap(),
                b"sixteen byte msg"
            );

            let mut bad = tag.clone();
            bad[0] ^= 1;
            assert!(cbc_hs_open(enc, &key, &iv, b"header", &ct, &bad).is_err());
        }
    }

    #[test]
    fn cbc_hs_matches_rfc7518_vector() {
        // RFC 7518 Appendix B.1, AES_128_CBC_HMAC_SHA_256
        let key = hex::decode(
            "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
        )
        .unwrap();
        let plaintext = hex::decode(concat!(
            "41206369706865722073797374656d206d757374206e6f742062652072657175",
            "6972656420746f206265207365637265742c20616e64206974206d7573742062",
            "652061626c6520746f2066616c6c20696e746f207468652068616e6473206f66",
            "2074686520656e656d7920776974686f757420696e636f6e76656e69656e6365",
        ))
        .unwrap();
        let iv = hex::decode("1af38c2dc2b96ffdd86694092341bc04").unwrap();
        let aad = hex::decode(concat!(
            "546865207365636f6e64207072696e6369706c65206f66204175677573746520",
            "4b6572636b686f666673",
        ))
        .unwrap();

        let (_, tag) = cbc_hs_seal(
            ContentEncryptionAlgorithm::A128CbcHs256,
            &key,
            &iv,
            &aad,
            &plaintext,
        )
        .unwrap();
        assert_eq!(hex::encode(tag), "652c3fa36b0a7c5b3219fab3a30bc1c4");
    }
}
