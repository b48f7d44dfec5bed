//! Packed ticket-key exchange format.
//!
//! A remote cache distributes the full key set to every proxy instance as a
//! single value so that a fleet shares one encryption key:
//!
//! ```text
//! |version (4 bytes)|len (2 bytes)|key (len bytes)|...
//! ```
//!
//! All integers are big-endian; `(len, key)` pairs repeat as necessary. Each
//! key blob packs the 16-byte name, the encryption key and the HMAC key
//! back to back: 48 bytes for AES-128-CBC, 80 bytes for AES-256-CBC.

use crate::cipher::TicketCipher;
use crate::key::{KeyMaterialError, TicketKey, TicketKeySet, TICKET_NAME_LEN};
use std::io::{Cursor, Read};
use thiserror::Error;

/// The only payload version currently understood.
pub const PAYLOAD_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("ticket key payload is too small: got {0} bytes")]
    ShortHeader(usize),
    #[error("unsupported ticket key payload version: want {PAYLOAD_VERSION}, got {0}")]
    UnsupportedVersion(u32),
    #[error("wrong ticket key size: want {want}, got {got}")]
    WrongKeyLen { want: usize, got: usize },
    #[error("truncated ticket key payload: want {want} more bytes, got {got}")]
    ShortPayload { want: usize, got: usize },
    #[error("ticket key payload contains no keys")]
    NoKeys,
    #[error("invalid key material: {0}")]
    Material(#[from] KeyMaterialError),
}

/// Decode a packed payload into a key set. Position 0 of the result is the
/// encryption key the whole fleet should be using.
pub fn decode_key_set(value: &[u8], cipher: TicketCipher) -> Result<TicketKeySet, WireError> {
    let mut cursor = Cursor::new(value);

    let mut version_buf = [0u8; 4];
    cursor
        .read_exact(&mut version_buf)
        .map_err(|_| WireError::ShortHeader(value.len()))?;
    let version = u32::from_be_bytes(version_buf);
    if version != PAYLOAD_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }

    let packed_len = cipher.packed_key_len();
    let enc_keylen = cipher.key_len();
    let hmac_keylen = cipher.packed_hmac_key_len();

    let mut keys = Vec::new();
    let mut blob = vec![0u8; packed_len];

    while (cursor.position() as usize) < value.len() {
        let remaining = value.len() - cursor.position() as usize;

        let mut len_buf = [0u8; 2];
        cursor
            .read_exact(&mut len_buf)
            .map_err(|_| WireError::ShortPayload {
                want: 2,
                got: remaining,
            })?;
        let len = u16::from_be_bytes(len_buf) as usize;
        if len != packed_len {
            return Err(WireError::WrongKeyLen {
                want: packed_len,
                got: len,
            });
        }

        let remaining = value.len() - cursor.position() as usize;
        cursor
            .read_exact(&mut blob)
            .map_err(|_| WireError::ShortPayload {
                want: packed_len,
                got: remaining,
            })?;

        let mut name = [0u8; TICKET_NAME_LEN];
        name.copy_from_slice(&blob[..TICKET_NAME_LEN]);
        let enc_key = &blob[TICKET_NAME_LEN..TICKET_NAME_LEN + enc_keylen];
        let hmac_key = &blob[TICKET_NAME_LEN + enc_keylen..TICKET_NAME_LEN + enc_keylen + hmac_keylen];

        keys.push(TicketKey::from_material(cipher, name, enc_key, hmac_key)?);
    }

    if keys.is_empty() {
        return Err(WireError::NoKeys);
    }

    TicketKeySet::from_keys(keys).map_err(WireError::Material)
}

/// Encode a key set into the packed payload format. Decoding the result with
/// the same cipher yields an identical set.
///
/// Freshly generated keys carry a digest-sized HMAC key, which for AES-128-CBC
/// is wider than the 16 bytes the packed format has room for; the HMAC key is
/// truncated to the packed length on the wire.
pub fn encode_key_set(set: &TicketKeySet) -> Vec<u8> {
    let mut buffer = Vec::new();
    buffer.extend_from_slice(&PAYLOAD_VERSION.to_be_bytes());

    for key in set.keys() {
        let cipher = key.cipher();
        let hmac_keylen = key.hmac_key().len().min(cipher.packed_hmac_key_len());
        let packed = TICKET_NAME_LEN + key.enc_key().len() + hmac_keylen;
        buffer.extend_from_slice(&(packed as u16).to_be_bytes());
        buffer.extend_from_slice(key.name());
        buffer.extend_from_slice(key.enc_key());
        buffer.extend_from_slice(&key.hmac_key()[..hmac_keylen]);
    }

    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload(cipher: TicketCipher, count: usize) -> Vec<u8> {
        let mut payload = PAYLOAD_VERSION.to_be_bytes().to_vec();
        for i in 0..count {
            let packed = cipher.packed_key_len();
            payload.extend_from_slice(&(packed as u16).to_be_bytes());
            payload.extend(std::iter::repeat(i as u8 + 1).take(packed));
        }
        payload
    }

    #[test]
    fn test_decode_aes128() {
        let payload = sample_payload(TicketCipher::Aes128Cbc, 1);
        let set = decode_key_set(&payload, TicketCipher::Aes128Cbc).unwrap();

        assert_eq!(set.len(), 1);
        let key = set.encryption_key();
        assert_eq!(key.name(), &[1u8; 16]);
        assert_eq!(key.enc_key(), &[1u8; 16]);
        assert_eq!(key.hmac_key(), &[1u8; 16]);
    }

    #[test]
    fn test_decode_aes256() {
        let payload = sample_payload(TicketCipher::Aes256Cbc, 2);
        let set = decode_key_set(&payload, TicketCipher::Aes256Cbc).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.keys()[1].enc_key(), &[2u8; 32]);
        assert_eq!(set.keys()[1].hmac_key(), &[2u8; 32]);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let payload = [0x00, 0x00, 0x00, 0x02];
        assert!(matches!(
            decode_key_set(&payload, TicketCipher::Aes128Cbc),
            Err(WireError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_short_header_rejected() {
        assert!(matches!(
            decode_key_set(&[0x00, 0x00], TicketCipher::Aes128Cbc),
            Err(WireError::ShortHeader(2))
        ));
    }

    #[test]
    fn test_wrong_key_len_rejected() {
        let mut payload = PAYLOAD_VERSION.to_be_bytes().to_vec();
        payload.extend_from_slice(&80u16.to_be_bytes());
        payload.extend_from_slice(&[0u8; 80]);

        assert!(matches!(
            decode_key_set(&payload, TicketCipher::Aes128Cbc),
            Err(WireError::WrongKeyLen { want: 48, got: 80 })
        ));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut payload = PAYLOAD_VERSION.to_be_bytes().to_vec();
        payload.extend_from_slice(&48u16.to_be_bytes());
        payload.extend_from_slice(&[0u8; 20]);

        assert!(matches!(
            decode_key_set(&payload, TicketCipher::Aes128Cbc),
            Err(WireError::ShortPayload { .. })
        ));
    }

    #[test]
    fn test_empty_payload_rejected() {
        let payload = PAYLOAD_VERSION.to_be_bytes().to_vec();
        assert!(matches!(
            decode_key_set(&payload, TicketCipher::Aes128Cbc),
            Err(WireError::NoKeys)
        ));
    }

    #[test]
    fn test_round_trip() {
        for cipher in [TicketCipher::Aes128Cbc, TicketCipher::Aes256Cbc] {
            let payload = sample_payload(cipher, 3);
            let set = decode_key_set(&payload, cipher).unwrap();
            assert_eq!(encode_key_set(&set), payload);
        }
    }

    #[test]
    fn test_generated_keys_encode_to_packed_sizes() {
        use crate::rotate::TicketKeyRotator;
        use std::time::Duration;

        // Generated keys carry a 32-byte HMAC key even for AES-128-CBC; the
        // encoder must still emit the packed 48-byte blobs.
        for cipher in [TicketCipher::Aes128Cbc, TicketCipher::Aes256Cbc] {
            let mut rotator = TicketKeyRotator::new(cipher, Duration::from_secs(3 * 3600));
            rotator.rotate().unwrap();
            let set = rotator.rotate().unwrap();

            let payload = encode_key_set(&set);
            assert_eq!(payload.len(), 4 + set.len() * (2 + cipher.packed_key_len()));

            let decoded = decode_key_set(&payload, cipher).unwrap();
            assert_eq!(decoded.len(), set.len());
            for (decoded_key, key) in decoded.keys().iter().zip(set.keys()) {
                assert_eq!(decoded_key.name(), key.name());
                assert_eq!(decoded_key.enc_key(), key.enc_key());
                assert_eq!(
                    decoded_key.hmac_key(),
                    &key.hmac_key()[..cipher.packed_hmac_key_len()]
                );
            }
        }
    }
}
