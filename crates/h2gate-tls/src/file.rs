//! Loading ticket keys from files.
//!
//! Operators who share keys across a fleet without a remote cache place one
//! packed key blob per file (same layout as one wire entry: name, encryption
//! key, HMAC key). The first file becomes the encryption key; the remaining
//! files are retained for decryption in the order given.

use crate::cipher::TicketCipher;
use crate::key::{KeyMaterialError, TicketKey, TicketKeySet, TICKET_NAME_LEN};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum KeyFileError {
    #[error("no ticket key files given")]
    NoFiles,
    #[error("could not read ticket key file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ticket key file {path} has wrong size: want {want} bytes, got {got}")]
    WrongSize {
        path: PathBuf,
        want: usize,
        got: usize,
    },
    #[error("invalid key material in {path}: {source}")]
    Material {
        path: PathBuf,
        #[source]
        source: KeyMaterialError,
    },
}

/// Read one packed key from each file, in order. The resulting set bypasses
/// automatic rotation entirely.
pub fn read_ticket_key_files<P: AsRef<Path>>(
    paths: &[P],
    cipher: TicketCipher,
) -> Result<TicketKeySet, KeyFileError> {
    if paths.is_empty() {
        return Err(KeyFileError::NoFiles);
    }

    let packed_len = cipher.packed_key_len();
    let enc_keylen = cipher.key_len();
    let hmac_keylen = cipher.packed_hmac_key_len();

    let mut keys = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let blob = std::fs::read(path).map_err(|source| KeyFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if blob.len() != packed_len {
            return Err(KeyFileError::WrongSize {
                path: path.to_path_buf(),
                want: packed_len,
                got: blob.len(),
            });
        }

        let mut name = [0u8; TICKET_NAME_LEN];
        name.copy_from_slice(&blob[..TICKET_NAME_LEN]);
        let enc_key = &blob[TICKET_NAME_LEN..TICKET_NAME_LEN + enc_keylen];
        let hmac_key = &blob[TICKET_NAME_LEN + enc_keylen..TICKET_NAME_LEN + enc_keylen + hmac_keylen];

        let key = TicketKey::from_material(cipher, name, enc_key, hmac_key).map_err(|source| {
            KeyFileError::Material {
                path: path.to_path_buf(),
                source,
            }
        })?;
        keys.push(key);
    }

    info!(keys = keys.len(), %cipher, "Loaded TLS ticket keys from files");

    Ok(TicketKeySet { keys })
}
