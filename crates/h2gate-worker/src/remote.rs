//! Remote ticket-key fetching.
//!
//! A fleet of proxies can share one encryption key by publishing the packed
//! key set in a remote cache. The worker polls the well-known entry and
//! republishes whatever it finds; the cache wire protocol itself lives
//! behind [`CacheDispatcher`].

use async_trait::async_trait;
use h2gate_tls::{wire, TicketCipher, TicketKeySet};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Cache entry holding the fleet-wide ticket key set. Shared with whatever
/// publishes the keys; must not change between versions.
pub const TICKET_KEY_CACHE_KEY: &str = "nghttpx:tls-ticket-key";

/// Delay before retrying after a network error.
const NETWORK_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Network errors tolerated before falling back to the normal cadence.
const MAX_NETWORK_RETRIES: u32 = 3;

#[derive(Error, Debug)]
pub enum CacheGetError {
    #[error("cache entry not found")]
    NotFound,
    #[error("network error: {0}")]
    Network(#[from] io::Error),
}

/// Issues logical GETs against the remote cache. Implementations own the
/// connection handling and wire protocol.
#[async_trait]
pub trait CacheDispatcher: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheGetError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Published,
    NotFound,
    NetworkError,
}

/// Periodically pulls the shared key set from the remote cache.
///
/// Used instead of local rotation when a cache host is configured; the two
/// are mutually exclusive.
pub struct RemoteKeyFetcher {
    dispatcher: Box<dyn CacheDispatcher>,
    cipher: TicketCipher,
    interval: Duration,
    retries: u32,
}

impl RemoteKeyFetcher {
    pub fn new(
        dispatcher: Box<dyn CacheDispatcher>,
        cipher: TicketCipher,
        interval: Duration,
    ) -> Self {
        RemoteKeyFetcher {
            dispatcher,
            cipher,
            interval,
            retries: 0,
        }
    }

    /// One fetch cycle. Returns the set to publish (if the fetch produced
    /// one), what happened, and the delay until the next fetch.
    ///
    /// A malformed payload never displaces keys the workers already hold;
    /// network errors are retried a few times on a short fuse before
    /// settling back to the configured cadence.
    pub async fn fetch(&mut self) -> (Option<Arc<TicketKeySet>>, FetchOutcome, Duration) {
        match self.dispatcher.get(TICKET_KEY_CACHE_KEY).await {
            Ok(value) => match wire::decode_key_set(&value, self.cipher) {
                Ok(set) => {
                    self.retries = 0;
                    info!(keys = set.len(), "Fetched TLS ticket keys from remote cache");
                    (Some(Arc::new(set)), FetchOutcome::Published, self.interval)
                }
                Err(e) => {
                    warn!(error = %e, "Remote TLS ticket key payload rejected");
                    self.retries = 0;
                    (None, FetchOutcome::NotFound, self.interval)
                }
            },
            Err(CacheGetError::NotFound) => {
                warn!("TLS ticket keys not found in remote cache");
                self.retries = 0;
                (None, FetchOutcome::NotFound, self.interval)
            }
            Err(CacheGetError::Network(e)) => {
                self.retries += 1;
                if self.retries >= MAX_NETWORK_RETRIES {
                    warn!(
                        error = %e,
                        retries = self.retries,
                        "Giving up on remote TLS ticket keys until next cycle"
                    );
                    self.retries = 0;
                    (None, FetchOutcome::NetworkError, self.interval)
                } else {
                    warn!(
                        error = %e,
                        retry = self.retries,
                        "Network error fetching TLS ticket keys; retrying"
                    );
                    (None, FetchOutcome::NetworkError, NETWORK_RETRY_INTERVAL)
                }
            }
        }
    }
}
