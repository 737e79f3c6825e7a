//! AES-256-CBC + PKCS7(32) envelope and SHA-1 signature scheme used by the
//! WeCom bot callback protocol (§4.3).

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine;
use sha1::{Digest, Sha1};

use crate::error::{Result, WecomError};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const PAD_BLOCK: usize = 32;

/// `encodingAESKey` is base64 with the trailing `=` omitted; append it back
/// and decode to the required 32-byte key.
pub fn decode_aes_key(encoding_aes_key: &str) -> Result<[u8; 32]> {
    let padded = format!("{encoding_aes_key}=");
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(padded)
        .map_err(|_| WecomError::BadAesKey)?;
    bytes.try_into().map_err(|_| WecomError::BadAesKey)
}

/// SHA-1 hex over the lexicographically sorted concatenation of
/// `{token, timestamp, nonce, ciphertext}`.
pub fn signature(token: &str, timestamp: &str, nonce: &str, ciphertext: &str) -> String {
    let mut parts = [token, timestamp, nonce, ciphertext];
    parts.sort_unstable();
    let mut hasher = Sha1::new();
    hasher.update(parts.concat().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_signature(
    token: &str,
    timestamp: &str,
    nonce: &str,
    ciphertext: &str,
    expected: &str,
) -> bool {
    signature(token, timestamp, nonce, ciphertext) == expected
}

/// Decrypts a base64 ciphertext and extracts the embedded message, validating
/// the receive id suffix when one is configured. Never panics on malformed
/// input — every failure maps to `WecomError::DecryptFailed` so the caller
/// never leaks the reason (§4.3 "decrypt failures return 400 without leaking
/// cause").
pub fn decrypt(key: &[u8; 32], ciphertext_b64: &str, expected_receive_id: Option<&str>) -> Result<String> {
    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(ciphertext_b64)
        .map_err(|_| WecomError::DecryptFailed)?;
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(WecomError::DecryptFailed);
    }

    let iv: [u8; 16] = key[..16].try_into().unwrap();
    let mut buffer = ciphertext;
    let decryptor = Aes256CbcDec::new(key.into(), &iv.into());
    let plaintext = decryptor
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| WecomError::DecryptFailed)?;

    if plaintext.len() < 20 {
        return Err(WecomError::DecryptFailed);
    }
    let msg_len = u32::from_be_bytes(plaintext[16..20].try_into().unwrap()) as usize;
    if plaintext.len() < 20 + msg_len {
        return Err(WecomError::DecryptFailed);
    }
    let msg = &plaintext[20..20 + msg_len];
    let receive_id = &plaintext[20 + msg_len..];
    let receive_id = trim_pkcs7_tail(receive_id);

    if let Some(expected) = expected_receive_id {
        if !expected.is_empty() && receive_id != expected.as_bytes() {
            return Err(WecomError::ReceiveIdMismatch);
        }
    }

    String::from_utf8(msg.to_vec()).map_err(|_| WecomError::DecryptFailed)
}

/// The receive-id suffix is followed by PKCS7(32) padding; the padding byte
/// value equals the padding length, so a valid envelope's tail bytes are
/// always `<= PAD_BLOCK` copies of the same value.
fn trim_pkcs7_tail(receive_id_and_padding: &[u8]) -> &[u8] {
    match receive_id_and_padding.last() {
        Some(&pad) if (1..=PAD_BLOCK as u8).contains(&pad) && (pad as usize) <= receive_id_and_padding.len() => {
            &receive_id_and_padding[..receive_id_and_padding.len() - pad as usize]
        }
        _ => receive_id_and_padding,
    }
}

/// Encrypts `msg` into the WeCom envelope: `random16 || beU32(len(msg)) ||
/// msg || receiveID`, PKCS7-padded to a 32-byte block (a full block of
/// padding when already aligned), AES-256-CBC encrypted, base64-encoded.
pub fn encrypt(key: &[u8; 32], msg: &str, receive_id: &str) -> String {
    let iv: [u8; 16] = key[..16].try_into().unwrap();
    let random: [u8; 16] = rand::random();
    let msg_bytes = msg.as_bytes();

    let mut plaintext = Vec::with_capacity(16 + 4 + msg_bytes.len() + receive_id.len() + PAD_BLOCK);
    plaintext.extend_from_slice(&random);
    plaintext.extend_from_slice(&(msg_bytes.len() as u32).to_be_bytes());
    plaintext.extend_from_slice(msg_bytes);
    plaintext.extend_from_slice(receive_id.as_bytes());

    let unpadded_len = plaintext.len();
    let pad_len = PAD_BLOCK - (unpadded_len % PAD_BLOCK);
    plaintext.extend(std::iter::repeat(pad_len as u8).take(pad_len));

    let encryptor = Aes256CbcEnc::new(key.into(), &iv.into());
    let ciphertext = encryptor
        .encrypt_padded_mut::<NoPadding>(&mut plaintext, unpadded_len + pad_len)
        .expect("buffer is a multiple of the AES block size");

    base64::engine::general_purpose::STANDARD.encode(ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_B64_NO_PAD: &str = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFG";

    #[test]
    fn aes_key_decodes_to_32_bytes() {
        let key = decode_aes_key(KEY_B64_NO_PAD).unwrap();
        assert_eq!(key.len(), 32);
    }

    #[test]
    fn signature_is_order_independent_of_input_order() {
        let a = signature("tok", "123", "456", "cipher");
        let b = signature("456", "cipher", "tok", "123");
        assert_eq!(a, b);
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = decode_aes_key(KEY_B64_NO_PAD).unwrap();
        let ciphertext = encrypt(&key, "hello world", "recv-id-1");
        let plaintext = decrypt(&key, &ciphertext, Some("recv-id-1")).unwrap();
        assert_eq!(plaintext, "hello world");
    }

    #[test]
    fn decrypt_rejects_wrong_receive_id() {
        let key = decode_aes_key(KEY_B64_NO_PAD).unwrap();
        let ciphertext = encrypt(&key, "hello world", "recv-id-1");
        let err = decrypt(&key, &ciphertext, Some("other-id")).unwrap_err();
        assert!(matches!(err, WecomError::ReceiveIdMismatch));
    }

    #[test]
    fn decrypt_rejects_garbage_base64() {
        let key = decode_aes_key(KEY_B64_NO_PAD).unwrap();
        let err = decrypt(&key, "not-valid-base64!!", None).unwrap_err();
        assert!(matches!(err, WecomError::DecryptFailed));
    }

    #[test]
    fn empty_receive_id_skips_validation() {
        let key = decode_aes_key(KEY_B64_NO_PAD).unwrap();
        let ciphertext = encrypt(&key, "hi", "recv-id-1");
        assert!(decrypt(&key, &ciphertext, Some("")).is_ok());
        assert!(decrypt(&key, &ciphertext, None).is_ok());
    }
}
