//! TLS Session Ticket Key Management
//!
//! This crate provides the session-ticket key material used by the h2gate
//! worker process: immutable key sets shared across worker threads, periodic
//! rotation with a configurable retention horizon, and the packed formats
//! used to exchange keys through a remote cache or key files.
//!
//! # Features
//!
//! - Secure random key generation sized to the configured cipher
//! - Hourly rotation retaining keys for the session timeout window
//! - Big-endian packed wire codec for remote key distribution
//! - File-based key loading for fleet-wide shared keys
//!
//! # Example
//!
//! ```rust
//! use h2gate_tls::{TicketCipher, TicketKeyRotator};
//! use std::time::Duration;
//!
//! let mut rotator = TicketKeyRotator::new(
//!     TicketCipher::Aes128Cbc,
//!     Duration::from_secs(12 * 3600),
//! );
//!
//! // First rotation seeds a single encryption key.
//! let set = rotator.rotate().unwrap();
//! assert_eq!(set.len(), 1);
//!
//! // The next rotation keeps the old key for decryption.
//! let set = rotator.rotate().unwrap();
//! assert_eq!(set.len(), 2);
//! assert_eq!(set.keys()[1].name(), rotator.current().unwrap().keys()[1].name());
//! ```

pub mod cipher;
pub mod file;
pub mod key;
pub mod rotate;
pub mod wire;

pub use cipher::{TicketCipher, TicketDigest};
pub use file::{read_ticket_key_files, KeyFileError};
pub use key::{
    KeyGenerationError, KeyMaterialError, TicketKey, TicketKeySet, MAX_ENC_KEY_LEN,
    MAX_HMAC_KEY_LEN, TICKET_NAME_LEN,
};
pub use rotate::{TicketKeyRotator, ROTATION_INTERVAL};
pub use wire::{decode_key_set, encode_key_set, WireError, PAYLOAD_VERSION};
