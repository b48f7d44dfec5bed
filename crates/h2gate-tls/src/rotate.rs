use crate::cipher::TicketCipher;
use crate::key::{KeyGenerationError, TicketKey, TicketKeySet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Cadence at which a fresh encryption key is generated.
pub const ROTATION_INTERVAL: Duration = Duration::from_secs(3600);

/// Produces a new ticket key set on every rotation, retaining old keys for
/// as long as outstanding tickets may still reference them.
///
/// The retention horizon is the session timeout expressed in whole hours
/// (at least one). With the default 12-hour timeout the set grows to at most
/// 12 keys. Each rotation prepends a freshly generated encryption key and
/// shifts the previous keys down by one; a set with more than one key
/// therefore always ends with a key that some other worker may already be
/// encrypting with, which keeps lagging workers decryptable for one cycle.
pub struct TicketKeyRotator {
    cipher: TicketCipher,
    retention: usize,
    current: Option<Arc<TicketKeySet>>,
}

impl TicketKeyRotator {
    pub fn new(cipher: TicketCipher, session_timeout: Duration) -> Self {
        let retention = (session_timeout.as_secs() / 3600).max(1) as usize;
        TicketKeyRotator {
            cipher,
            retention,
            current: None,
        }
    }

    /// The most recently produced set, if the last rotation succeeded.
    pub fn current(&self) -> Option<Arc<TicketKeySet>> {
        self.current.clone()
    }

    /// Number of keys retained across rotations.
    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Generate the next set: a fresh key at position 0, previous keys
    /// shifted down, truncated to the retention horizon.
    ///
    /// On generation failure the current set is cleared so that callers stop
    /// publishing stale material; the next rotation starts over with a
    /// single-key set.
    pub fn rotate(&mut self) -> Result<Arc<TicketKeySet>, KeyGenerationError> {
        let head = match TicketKey::generate(self.cipher) {
            Ok(key) => key,
            Err(e) => {
                self.current = None;
                return Err(e);
            }
        };

        let new_len = match &self.current {
            Some(old) => old.len().saturating_add(1).min(self.retention),
            None => 1,
        };

        let mut keys = Vec::with_capacity(new_len);
        keys.push(head);
        if let Some(old) = &self.current {
            keys.extend(old.keys()[..new_len - 1].iter().cloned());
        }

        let set = Arc::new(TicketKeySet { keys });

        info!(keys = set.len(), "Renewed TLS ticket keys");
        debug!(name = %set.encryption_key().name_hex(), "New encryption key");
        for key in &set.keys()[1..] {
            debug!(name = %key.name_hex(), "Retained decryption key");
        }

        self.current = Some(Arc::clone(&set));
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_rotation_yields_single_key() {
        let mut rotator = TicketKeyRotator::new(TicketCipher::Aes128Cbc, Duration::from_secs(3 * 3600));
        let set = rotator.rotate().unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_rotation_grows_to_retention_then_saturates() {
        let mut rotator = TicketKeyRotator::new(TicketCipher::Aes128Cbc, Duration::from_secs(3 * 3600));

        let mut sizes = Vec::new();
        let mut heads = Vec::new();
        for _ in 0..4 {
            let set = rotator.rotate().unwrap();
            sizes.push(set.len());
            heads.push(*set.encryption_key().name());
        }

        assert_eq!(sizes, vec![1, 2, 3, 3]);

        // Every head is fresh.
        for i in 0..heads.len() {
            for j in i + 1..heads.len() {
                assert_ne!(heads[i], heads[j]);
            }
        }
    }

    #[test]
    fn test_rotation_shifts_previous_keys() {
        let mut rotator =
            TicketKeyRotator::new(TicketCipher::Aes256Cbc, Duration::from_secs(12 * 3600));

        let mut previous: Option<Arc<TicketKeySet>> = None;
        for _ in 0..5 {
            let set = rotator.rotate().unwrap();
            if let Some(prev) = &previous {
                for (i, key) in set.keys()[1..].iter().enumerate() {
                    assert_eq!(key.name(), prev.keys()[i].name());
                }
            }
            previous = Some(set);
        }
    }

    #[test]
    fn test_sub_hour_timeout_clamps_to_one_key() {
        let mut rotator = TicketKeyRotator::new(TicketCipher::Aes128Cbc, Duration::from_secs(300));
        assert_eq!(rotator.retention(), 1);

        rotator.rotate().unwrap();
        let set = rotator.rotate().unwrap();
        assert_eq!(set.len(), 1);
    }
}
