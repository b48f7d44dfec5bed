use crate::cipher::{TicketCipher, TicketDigest};
use rand::rand_core::OsError;
use rand::rngs::OsRng;
use rand::TryRngCore;
use std::fmt;
use thiserror::Error;

/// Length of the opaque key name transmitted inside session tickets.
pub const TICKET_NAME_LEN: usize = 16;

/// Capacity of the encryption-key buffer; large enough for AES-256.
pub const MAX_ENC_KEY_LEN: usize = 32;

/// Capacity of the HMAC-key buffer; large enough for SHA-256.
pub const MAX_HMAC_KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum KeyGenerationError {
    #[error("system random generator failed: {0}")]
    Rng(#[from] OsError),
}

#[derive(Error, Debug)]
pub enum KeyMaterialError {
    #[error("wrong encryption key length: want {want}, got {got}")]
    EncKeyLen { want: usize, got: usize },
    #[error("wrong HMAC key length: want {want}, got {got}")]
    HmacKeyLen { want: usize, got: usize },
    #[error("a ticket key set must contain at least one key")]
    EmptySet,
}

/// One TLS session-ticket key: an opaque 16-byte name plus the symmetric
/// material used to encrypt and authenticate tickets carrying that name.
///
/// Immutable after construction. Key buffers are fixed-size; the portion in
/// use is determined by the cipher and the HMAC key length recorded at
/// construction time.
#[derive(Clone)]
pub struct TicketKey {
    name: [u8; TICKET_NAME_LEN],
    enc_key: [u8; MAX_ENC_KEY_LEN],
    hmac_key: [u8; MAX_HMAC_KEY_LEN],
    hmac_keylen: usize,
    cipher: TicketCipher,
    digest: TicketDigest,
}

impl TicketKey {
    /// Generate a fresh key for `cipher`, filling the name and both key
    /// buffers from the operating system's secure random generator.
    ///
    /// The HMAC key is sized to the digest output (32 bytes for SHA-256).
    pub fn generate(cipher: TicketCipher) -> Result<Self, KeyGenerationError> {
        let digest = TicketDigest::Sha256;

        assert!(cipher.key_len() <= MAX_ENC_KEY_LEN);
        assert!(digest.key_len() <= MAX_HMAC_KEY_LEN);

        let mut name = [0u8; TICKET_NAME_LEN];
        let mut enc_key = [0u8; MAX_ENC_KEY_LEN];
        let mut hmac_key = [0u8; MAX_HMAC_KEY_LEN];

        OsRng.try_fill_bytes(&mut name)?;
        OsRng.try_fill_bytes(&mut enc_key)?;
        OsRng.try_fill_bytes(&mut hmac_key)?;

        Ok(TicketKey {
            name,
            enc_key,
            hmac_key,
            hmac_keylen: digest.key_len(),
            cipher,
            digest,
        })
    }

    /// Build a key from externally supplied material (remote cache or key
    /// files). The encryption key must match the cipher's key length; the
    /// HMAC key must fit the buffer.
    pub fn from_material(
        cipher: TicketCipher,
        name: [u8; TICKET_NAME_LEN],
        enc_key: &[u8],
        hmac_key: &[u8],
    ) -> Result<Self, KeyMaterialError> {
        if enc_key.len() != cipher.key_len() {
            return Err(KeyMaterialError::EncKeyLen {
                want: cipher.key_len(),
                got: enc_key.len(),
            });
        }
        if hmac_key.is_empty() || hmac_key.len() > MAX_HMAC_KEY_LEN {
            return Err(KeyMaterialError::HmacKeyLen {
                want: MAX_HMAC_KEY_LEN,
                got: hmac_key.len(),
            });
        }

        let mut enc_buf = [0u8; MAX_ENC_KEY_LEN];
        enc_buf[..enc_key.len()].copy_from_slice(enc_key);
        let mut hmac_buf = [0u8; MAX_HMAC_KEY_LEN];
        hmac_buf[..hmac_key.len()].copy_from_slice(hmac_key);

        Ok(TicketKey {
            name,
            enc_key: enc_buf,
            hmac_key: hmac_buf,
            hmac_keylen: hmac_key.len(),
            cipher,
            digest: TicketDigest::Sha256,
        })
    }

    pub fn name(&self) -> &[u8; TICKET_NAME_LEN] {
        &self.name
    }

    /// Key name as lowercase hex, for logging.
    pub fn name_hex(&self) -> String {
        self.name.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn enc_key(&self) -> &[u8] {
        &self.enc_key[..self.cipher.key_len()]
    }

    pub fn hmac_key(&self) -> &[u8] {
        &self.hmac_key[..self.hmac_keylen]
    }

    pub fn cipher(&self) -> TicketCipher {
        self.cipher
    }

    pub fn digest(&self) -> TicketDigest {
        self.digest
    }
}

impl fmt::Debug for TicketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketKey")
            .field("name", &self.name_hex())
            .field("cipher", &self.cipher)
            .field("digest", &self.digest)
            .finish_non_exhaustive()
    }
}

/// An ordered, non-empty set of ticket keys.
///
/// Position 0 is the active encryption key; positions 1..N are retained for
/// decryption only. When the set has more than one key, the last position is
/// a preview of the next encryption key, so that a handshake hitting a
/// not-yet-rotated peer worker can still be decrypted.
///
/// Sets are immutable; rotation and remote fetches produce a new set which is
/// shared across workers behind an `Arc`.
#[derive(Debug, Clone)]
pub struct TicketKeySet {
    pub(crate) keys: Vec<TicketKey>,
}

impl TicketKeySet {
    /// Build a set from a vector of keys; fails on an empty vector.
    pub fn from_keys(keys: Vec<TicketKey>) -> Result<Self, KeyMaterialError> {
        if keys.is_empty() {
            return Err(KeyMaterialError::EmptySet);
        }
        Ok(TicketKeySet { keys })
    }

    /// The key used to encrypt newly issued tickets.
    pub fn encryption_key(&self) -> &TicketKey {
        &self.keys[0]
    }

    pub fn keys(&self) -> &[TicketKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Find a key by its ticket name, for decrypting presented tickets.
    pub fn find(&self, name: &[u8]) -> Option<&TicketKey> {
        self.keys.iter().find(|k| k.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_fills_material() {
        let key = TicketKey::generate(TicketCipher::Aes128Cbc).unwrap();
        assert_eq!(key.enc_key().len(), 16);
        assert_eq!(key.hmac_key().len(), 32);

        let key = TicketKey::generate(TicketCipher::Aes256Cbc).unwrap();
        assert_eq!(key.enc_key().len(), 32);
        assert_eq!(key.hmac_key().len(), 32);
    }

    #[test]
    fn test_generate_distinct_names() {
        let a = TicketKey::generate(TicketCipher::Aes128Cbc).unwrap();
        let b = TicketKey::generate(TicketCipher::Aes128Cbc).unwrap();
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn test_from_material_validates_lengths() {
        let name = [7u8; TICKET_NAME_LEN];

        let err = TicketKey::from_material(TicketCipher::Aes128Cbc, name, &[0u8; 32], &[0u8; 16]);
        assert!(matches!(err, Err(KeyMaterialError::EncKeyLen { .. })));

        let err = TicketKey::from_material(TicketCipher::Aes128Cbc, name, &[0u8; 16], &[0u8; 64]);
        assert!(matches!(err, Err(KeyMaterialError::HmacKeyLen { .. })));

        let key =
            TicketKey::from_material(TicketCipher::Aes128Cbc, name, &[1u8; 16], &[2u8; 16]).unwrap();
        assert_eq!(key.name(), &name);
        assert_eq!(key.enc_key(), &[1u8; 16]);
        assert_eq!(key.hmac_key(), &[2u8; 16]);
    }

    #[test]
    fn test_empty_set_rejected() {
        assert!(matches!(
            TicketKeySet::from_keys(Vec::new()),
            Err(KeyMaterialError::EmptySet)
        ));
    }

    #[test]
    fn test_find_by_name() {
        let a = TicketKey::generate(TicketCipher::Aes128Cbc).unwrap();
        let b = TicketKey::generate(TicketCipher::Aes128Cbc).unwrap();
        let name_b = *b.name();
        let set = TicketKeySet::from_keys(vec![a, b]).unwrap();

        assert!(set.find(&name_b).is_some());
        assert!(set.find(&[0u8; TICKET_NAME_LEN]).is_none());
        assert_eq!(set.encryption_key().name(), set.keys()[0].name());
    }

    #[test]
    fn test_debug_hides_key_material() {
        let key = TicketKey::generate(TicketCipher::Aes128Cbc).unwrap();
        let rendered = format!("{:?}", key);
        assert!(rendered.contains(&key.name_hex()));
        assert!(!rendered.contains("enc_key"));
    }
}
