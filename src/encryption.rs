use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, Nonce, OsRng};
use aes_gcm::Aes256Gcm;
use anyhow::{anyhow, bail};
use bytes::Buf;
use sha2::{Digest, Sha256};
use tracing::trace;

/// Symmetric encryption of a single payload unit. The key is bound when the cipher is created.
///
/// Encryption is applied *after* the checksum is calculated on the sending side, and decryption
///  happens *before* the checksum is verified on the receiving side, so checksums always refer
///  to plaintext.
pub trait PayloadCipher: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn encrypt(&self, plaintext: &str) -> anyhow::Result<String>;

    /// NB: Implementations must fail rather than returning something that is not the plaintext
    fn decrypt(&self, ciphertext: &str) -> anyhow::Result<String>;
}


/// Rotates ASCII letters, leaving all other characters as they are. This is not encryption in
///  any meaningful sense, but it is what simple peers support.
#[derive(Debug, Clone)]
pub struct CaesarCipher {
    shift: u8,
}

impl CaesarCipher {
    pub fn new(shift: u8) -> CaesarCipher {
        CaesarCipher { shift: shift % 26 }
    }

    fn rotate(s: &str, shift: u8) -> String {
        s.chars()
            .map(|c| {
                let base = if c.is_ascii_lowercase() {
                    b'a'
                }
                else if c.is_ascii_uppercase() {
                    b'A'
                }
                else {
                    return c;
                };
                char::from(base + (c as u8 - base + shift) % 26)
            })
            .collect()
    }
}

impl PayloadCipher for CaesarCipher {
    fn name(&self) -> &'static str {
        "caesar"
    }

    fn encrypt(&self, plaintext: &str) -> anyhow::Result<String> {
        Ok(Self::rotate(plaintext, self.shift))
    }

    fn decrypt(&self, ciphertext: &str) -> anyhow::Result<String> {
        Ok(Self::rotate(ciphertext, 26 - self.shift))
    }
}


/// AES-256-GCM. The ciphertext (including the authentication tag) is followed by the 12 byte
///  nonce, and the whole thing is hex encoded so it fits into a JSON string.
pub struct Aes256GcmCipher {
    cipher: Aes256Gcm,
    nonce_fixed: u32,
    nonce_incremented: AtomicU64,
}

impl Debug for Aes256GcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        f.debug_struct("Aes256GcmCipher").finish_non_exhaustive()
    }
}

impl Aes256GcmCipher {
    pub const KEY_LEN: usize = 32;
    const NONCE_LEN: usize = 12;
    const TAG_LEN: usize = 16;

    pub fn new(key: &[u8]) -> anyhow::Result<Aes256GcmCipher> {
        if key.len() != Self::KEY_LEN {
            bail!("AES-256-GCM requires a key of {} bytes, was {}", Self::KEY_LEN, key.len());
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| anyhow!("invalid AES-256-GCM key"))?;

        // random starting point, then a counter - nonces must never repeat for the same key
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut nonce_buf = nonce.as_slice();
        let nonce_fixed = nonce_buf.get_u32();
        let nonce_incremented = AtomicU64::new(nonce_buf.get_u64());

        Ok(Aes256GcmCipher {
            cipher,
            nonce_fixed,
            nonce_incremented,
        })
    }

    /// derive a key from a shared secret of arbitrary length
    pub fn key_from_shared_secret(secret: &[u8]) -> Vec<u8> {
        Sha256::digest(secret).to_vec()
    }

    fn unique_nonce(&self) -> Nonce<Aes256Gcm> {
        let mut buf: Vec<u8> = Vec::with_capacity(Self::NONCE_LEN);
        buf.extend_from_slice(self.nonce_fixed.to_be_bytes().as_ref());
        buf.extend_from_slice(self.nonce_incremented.fetch_add(1, Ordering::AcqRel).to_be_bytes().as_ref());
        Nonce::<Aes256Gcm>::clone_from_slice(&buf)
    }
}

impl PayloadCipher for Aes256GcmCipher {
    fn name(&self) -> &'static str {
        "aes-256-gcm"
    }

    fn encrypt(&self, plaintext: &str) -> anyhow::Result<String> {
        let nonce = self.unique_nonce();
        let mut buf = self.cipher.encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| anyhow!("AES-256-GCM encryption failed"))?;
        buf.extend_from_slice(nonce.as_slice());
        Ok(hex::encode(buf))
    }

    fn decrypt(&self, ciphertext: &str) -> anyhow::Result<String> {
        let buf = hex::decode(ciphertext)?;
        if buf.len() < Self::NONCE_LEN + Self::TAG_LEN {
            bail!("ciphertext too short: {} bytes", buf.len());
        }

        let (encrypted, nonce) = buf.split_at(buf.len() - Self::NONCE_LEN);
        let nonce = Nonce::<Aes256Gcm>::clone_from_slice(nonce);
        trace!("decrypting {} bytes", encrypted.len());

        let plaintext = self.cipher.decrypt(&nonce, encrypted)
            .map_err(|_| anyhow!("AES-256-GCM authentication failed"))?;
        Ok(String::from_utf8(plaintext)?)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, "ABCD", "ABCD")]
    #[case::three(3, "ABCD", "DEFG")]
    #[case::wrap_upper(3, "XYZ", "ABC")]
    #[case::wrap_lower(1, "xyz", "yza")]
    #[case::mixed(2, "aZ 9!", "cB 9!")]
    #[case::shift_normalized(29, "abc", "def")]
    #[case::non_ascii(5, "äöü", "äöü")]
    fn test_caesar(#[case] shift: u8, #[case] plaintext: &str, #[case] ciphertext: &str) {
        let cipher = CaesarCipher::new(shift);
        assert_eq!(cipher.encrypt(plaintext).unwrap(), ciphertext);
        assert_eq!(cipher.decrypt(ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_aes_roundtrip_uses_fresh_nonces() {
        let cipher = Aes256GcmCipher::new(&[7u8; 32]).unwrap();

        let first = cipher.encrypt("EFGH").unwrap();
        let second = cipher.encrypt("EFGH").unwrap();
        assert_ne!(first, second);

        assert_eq!(cipher.decrypt(&first).unwrap(), "EFGH");
        assert_eq!(cipher.decrypt(&second).unwrap(), "EFGH");
    }

    #[test]
    fn test_aes_decrypt_with_other_key_fails() {
        let sender = Aes256GcmCipher::new(&[1u8; 32]).unwrap();
        let receiver = Aes256GcmCipher::new(&[2u8; 32]).unwrap();

        let ciphertext = sender.encrypt("ABCD").unwrap();
        assert!(receiver.decrypt(&ciphertext).is_err());
    }

    #[rstest]
    #[case::not_hex("ABCD")]
    #[case::too_short("00112233")]
    #[case::empty("")]
    fn test_aes_decrypt_garbage_fails(#[case] ciphertext: &str) {
        let cipher = Aes256GcmCipher::new(&[1u8; 32]).unwrap();
        assert!(cipher.decrypt(ciphertext).is_err());
    }

    #[test]
    fn test_aes_tampered_ciphertext_fails() {
        let cipher = Aes256GcmCipher::new(&[3u8; 32]).unwrap();
        let mut ciphertext = cipher.encrypt("IJKL").unwrap().into_bytes();
        ciphertext[0] = if ciphertext[0] == b'0' { b'1' } else { b'0' };
        let ciphertext = String::from_utf8(ciphertext).unwrap();

        assert!(cipher.decrypt(&ciphertext).is_err());
    }

    #[rstest]
    #[case::short(16)]
    #[case::long(33)]
    #[case::empty(0)]
    fn test_aes_wrong_key_len(#[case] len: usize) {
        assert!(Aes256GcmCipher::new(&vec![0u8; len]).is_err());
    }

    #[test]
    fn test_key_from_shared_secret() {
        let key = Aes256GcmCipher::key_from_shared_secret(b"no secret");
        assert_eq!(key.len(), Aes256GcmCipher::KEY_LEN);
        assert_eq!(key, Aes256GcmCipher::key_from_shared_secret(b"no secret"));
        assert_ne!(key, Aes256GcmCipher::key_from_shared_secret(b"other secret"));
        assert!(Aes256GcmCipher::new(&key).is_ok());
    }
}
