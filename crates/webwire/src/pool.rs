//! Origin-keyed connection pool.
//!
//! The context replaces the original's process-wide singletons: it owns the
//! shared configuration and the pool of idle connections. Buckets are keyed
//! by [`Target::origin_key`] and hold clients in FIFO order; only CONNECTED
//! clients are parked, and staleness is re-checked on the way out.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::debug;

use crate::{
    client::{SocketState, WebClient},
    config::ClientConfig,
    error::Result,
    url::Target,
};

/// Shared home for configuration and pooled connections.
pub struct ClientContext {
    config: Arc<ClientConfig>,
    pool: Mutex<HashMap<String, VecDeque<WebClient>>>,
}

impl ClientContext {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
            pool: Mutex::new(HashMap::new()),
        }
    }

    /// A client bound to `url`: a live pooled connection for the same
    /// origin when one exists, otherwise a fresh one.
    pub fn client(&self, url: &str) -> Result<WebClient> {
        let target = Target::parse(url)?;
        let key = target.origin_key();

        let mut pool = self.lock();
        while let Some(mut client) = pool.get_mut(&key).and_then(VecDeque::pop_front) {
            if pool.get(&key).is_some_and(VecDeque::is_empty) {
                pool.remove(&key);
            }
            if client.state() == SocketState::Connected {
                debug!(origin = %key, "reusing pooled connection");
                client.rebind(target);
                return Ok(client);
            }
            debug!(origin = %key, "discarding stale pooled connection");
        }
        drop(pool);

        Ok(WebClient::new(Arc::clone(&self.config), target))
    }

    /// Parks `client` for reuse. Delegates are cleared; anything not in the
    /// CONNECTED state is dropped instead of parked.
    pub fn release(&self, mut client: WebClient) {
        client.clear_delegates();
        if client.state() != SocketState::Connected {
            return;
        }
        let key = client.target().origin_key();
        debug!(origin = %key, "parking connection");
        self.lock().entry(key).or_default().push_back(client);
    }

    /// Idle connections currently parked for `url`'s origin.
    pub fn idle_count(&self, url: &str) -> usize {
        let Ok(target) = Target::parse(url) else {
            return 0;
        };
        self.lock()
            .get(&target.origin_key())
            .map_or(0, VecDeque::len)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<WebClient>>> {
        // A panic while holding the lock leaves the map intact; keep going.
        self.pool
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
