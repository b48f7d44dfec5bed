use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Symmetric cipher used to encrypt TLS session tickets.
///
/// The cipher determines the length of the encryption key carried by a
/// [`TicketKey`](crate::TicketKey) and the packed size of one key on the
/// remote-cache wire (see [`wire`](crate::wire)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketCipher {
    #[serde(rename = "aes-128-cbc")]
    Aes128Cbc,
    #[serde(rename = "aes-256-cbc")]
    Aes256Cbc,
}

impl TicketCipher {
    /// Length in bytes of the encryption key for this cipher.
    pub fn key_len(&self) -> usize {
        match self {
            TicketCipher::Aes128Cbc => 16,
            TicketCipher::Aes256Cbc => 32,
        }
    }

    /// Length in bytes of the HMAC key carried alongside this cipher in the
    /// packed wire and file formats (16 for AES-128-CBC, 32 for AES-256-CBC).
    pub fn packed_hmac_key_len(&self) -> usize {
        match self {
            TicketCipher::Aes128Cbc => 16,
            TicketCipher::Aes256Cbc => 32,
        }
    }

    /// Total packed size of one key blob: 16-byte name + encryption key +
    /// HMAC key. 48 bytes for AES-128-CBC, 80 bytes for AES-256-CBC.
    pub fn packed_key_len(&self) -> usize {
        crate::key::TICKET_NAME_LEN + self.key_len() + self.packed_hmac_key_len()
    }
}

impl Default for TicketCipher {
    fn default() -> Self {
        TicketCipher::Aes128Cbc
    }
}

impl fmt::Display for TicketCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketCipher::Aes128Cbc => write!(f, "aes-128-cbc"),
            TicketCipher::Aes256Cbc => write!(f, "aes-256-cbc"),
        }
    }
}

/// Digest used to authenticate session tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TicketDigest {
    #[default]
    Sha256,
}

impl TicketDigest {
    /// Output length of the digest; freshly generated keys carry an HMAC key
    /// of this length.
    pub fn key_len(&self) -> usize {
        match self {
            TicketDigest::Sha256 => <Sha256 as Digest>::output_size(),
        }
    }
}

impl fmt::Display for TicketDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketDigest::Sha256 => write!(f, "sha256"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_key_lengths() {
        assert_eq!(TicketCipher::Aes128Cbc.key_len(), 16);
        assert_eq!(TicketCipher::Aes256Cbc.key_len(), 32);
        assert_eq!(TicketCipher::Aes128Cbc.packed_key_len(), 48);
        assert_eq!(TicketCipher::Aes256Cbc.packed_key_len(), 80);
    }

    #[test]
    fn test_digest_key_length() {
        assert_eq!(TicketDigest::Sha256.key_len(), 32);
    }

    #[test]
    fn test_cipher_serde_names() {
        let cipher: TicketCipher = serde_json::from_str("\"aes-256-cbc\"").unwrap();
        assert_eq!(cipher, TicketCipher::Aes256Cbc);
        assert_eq!(
            serde_json::to_string(&TicketCipher::Aes128Cbc).unwrap(),
            "\"aes-128-cbc\""
        );
    }
}
