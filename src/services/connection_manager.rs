use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::services::database::{self, DatabaseConnection};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

type ConnectionFactory =
    Box<dyn Fn(DatabaseConfig) -> Arc<dyn DatabaseConnection> + Send + Sync>;

/// One registry entry. The slot mutex serializes construction for a single
/// id; the registry lock is never held while a connection is being
/// established, so a slow connect for one id cannot stall lookups of
/// another.
type ConnectionSlot = Arc<Mutex<Option<Arc<dyn DatabaseConnection>>>>;

/// Registry of live connections keyed by logical config id. At most one
/// live connection exists per id; lookups reuse it, `close_all` tears
/// everything down. Owned by whoever builds the orchestration layer and
/// passed explicitly rather than living as a process-global.
pub struct ConnectionManager {
    registry: RwLock<HashMap<String, ConnectionSlot>>,
    factory: ConnectionFactory,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::with_factory(Box::new(database::create_connection))
    }

    /// Custom construction seam, used by tests to observe connect calls.
    pub fn with_factory(factory: ConnectionFactory) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            factory,
        }
    }

    /// Return the live connection for `config.id`, creating and connecting
    /// one if the registry holds none. Identity is the logical id, not the
    /// physical coordinates: two configs pointing at the same server but
    /// carrying different ids get independent connections.
    ///
    /// Concurrent calls for one id serialize on that id's slot, so exactly
    /// one connection attempt runs; losers of the race find the winner's
    /// connection already in place. A failed attempt leaves the slot empty
    /// and the next call retries construction.
    pub async fn get_connection(
        &self,
        config: &DatabaseConfig,
    ) -> Result<Arc<dyn DatabaseConnection>> {
        let slot = {
            let registry = self.registry.read().await;
            registry.get(&config.id).cloned()
        };

        let slot = match slot {
            Some(slot) => slot,
            None => {
                // Install an empty slot under the write lock; the lock is
                // released before any connect runs.
                let mut registry = self.registry.write().await;
                registry.entry(config.id.clone()).or_default().clone()
            }
        };

        let mut entry = slot.lock().await;
        if let Some(connection) = entry.as_ref() {
            tracing::debug!(id = %config.id, "reusing live connection");
            return Ok(connection.clone());
        }

        tracing::info!(id = %config.id, kind = %config.kind, "establishing connection");
        let connection = (self.factory)(config.clone());
        connection.connect().await?;
        *entry = Some(connection.clone());

        Ok(connection)
    }

    /// Close every registered connection and clear the registry. Individual
    /// close failures are logged, never propagated, and never abort the
    /// teardown of the remaining connections.
    pub async fn close_all(&self) {
        let drained: Vec<(String, ConnectionSlot)> =
            self.registry.write().await.drain().collect();

        let closes = drained.into_iter().map(|(id, slot)| async move {
            match slot.lock().await.take() {
                Some(connection) => (id, connection.close().await),
                None => (id, Ok(())),
            }
        });

        for (id, result) in futures::future::join_all(closes).await {
            if let Err(e) = result {
                tracing::warn!(id = %id, "error closing connection: {}", e);
            }
        }
    }

    /// Number of live connections in the registry. Slots whose construction
    /// failed do not count.
    pub async fn count(&self) -> usize {
        let slots: Vec<ConnectionSlot> =
            self.registry.read().await.values().cloned().collect();

        let mut live = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                live += 1;
            }
        }
        live
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
