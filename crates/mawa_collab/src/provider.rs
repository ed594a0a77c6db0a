//! Collaboration provider.
//!
//! The provider bridges a synced replica into the application's domain
//! state. Domain stores (pilgrims, halls, settings) implement
//! [`CollabStore`] and are handed the shared document once the connector
//! reports `synced`. The provider knows nothing about domain semantics;
//! stores decide which shared structures they read and write.

use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::connector::Connector;
use crate::doc::SharedDoc;
use crate::error::Result;
use crate::indicator::IndicatorState;

/// Extension point implemented by each domain store.
pub trait CollabStore: Send + Sync {
    /// Store name, used in log messages.
    fn name(&self) -> &str;

    /// Bind the shared document into the store's state.
    ///
    /// Called once per achieved sync. The store typically grabs its named
    /// maps from the document and installs its own observers.
    fn bind(&self, doc: &SharedDoc) -> Result<()>;
}

/// Bridges the synced replica into domain stores and surfaces connectivity.
///
/// On every `synced` false→true transition, each attached store's
/// [`CollabStore::bind`] is called exactly once. A store failure is logged
/// and does not prevent the remaining stores from binding.
pub struct CollabProvider {
    doc: Arc<SharedDoc>,
    connected_rx: watch::Receiver<bool>,
    synced_rx: watch::Receiver<bool>,
    stores: Arc<RwLock<Vec<Arc<dyn CollabStore>>>>,
    task: Option<JoinHandle<()>>,
}

impl CollabProvider {
    /// Create a provider from a connector's handles.
    pub fn new(connector: &Connector) -> Self {
        Self::from_parts(connector.document(), connector.connected(), connector.synced())
    }

    /// Create a provider from raw handles.
    pub fn from_parts(
        doc: Arc<SharedDoc>,
        connected_rx: watch::Receiver<bool>,
        synced_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            doc,
            connected_rx,
            synced_rx,
            stores: Arc::new(RwLock::new(Vec::new())),
            task: None,
        }
    }

    /// Attach a domain store.
    ///
    /// Stores attached after a sync event bind on the next one.
    pub fn attach(&self, store: Arc<dyn CollabStore>) {
        self.stores.write().unwrap().push(store);
    }

    /// Start watching for sync transitions.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("[CollabProvider] no async runtime available: {}", e);
                return;
            }
        };

        let doc = Arc::clone(&self.doc);
        let stores = Arc::clone(&self.stores);
        let mut synced_rx = self.synced_rx.clone();

        self.task = Some(handle.spawn(async move {
            if *synced_rx.borrow_and_update() {
                bind_stores(&doc, &stores);
            }
            while synced_rx.changed().await.is_ok() {
                if *synced_rx.borrow_and_update() {
                    bind_stores(&doc, &stores);
                }
            }
        }));
    }

    /// Current connectivity, for the host UI's badge.
    pub fn indicator(&self) -> IndicatorState {
        IndicatorState {
            connected: *self.connected_rx.borrow(),
            synced: *self.synced_rx.borrow(),
        }
    }
}

impl Drop for CollabProvider {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Hand the document to every attached store; a failing store does not
/// block the others.
fn bind_stores(doc: &SharedDoc, stores: &RwLock<Vec<Arc<dyn CollabStore>>>) {
    let stores = stores.read().unwrap();
    log::info!("[CollabProvider] sync achieved, binding {} stores", stores.len());
    for store in stores.iter() {
        if let Err(e) = store.bind(doc) {
            log::warn!("[CollabProvider] store '{}' failed to bind: {}", store.name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollabError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingStore {
        binds: AtomicUsize,
    }

    impl CollabStore for CountingStore {
        fn name(&self) -> &str {
            "counting"
        }

        fn bind(&self, _doc: &SharedDoc) -> Result<()> {
            self.binds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingStore;

    impl CollabStore for FailingStore {
        fn name(&self) -> &str {
            "failing"
        }

        fn bind(&self, _doc: &SharedDoc) -> Result<()> {
            Err(CollabError::StoreBind {
                store: "failing".to_string(),
                message: "intentional".to_string(),
            })
        }
    }

    fn test_provider() -> (CollabProvider, watch::Sender<bool>, watch::Sender<bool>) {
        let (connected_tx, connected_rx) = watch::channel(false);
        let (synced_tx, synced_rx) = watch::channel(false);
        let provider =
            CollabProvider::from_parts(Arc::new(SharedDoc::new()), connected_rx, synced_rx);
        (provider, connected_tx, synced_tx)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_binds_once_per_sync_event() {
        let (mut provider, _connected_tx, synced_tx) = test_provider();
        let store = Arc::new(CountingStore {
            binds: AtomicUsize::new(0),
        });
        provider.attach(store.clone());
        provider.start();

        settle().await;
        assert_eq!(store.binds.load(Ordering::SeqCst), 0);

        synced_tx.send_replace(true);
        settle().await;
        assert_eq!(store.binds.load(Ordering::SeqCst), 1);

        // Losing and regaining sync binds again
        synced_tx.send_replace(false);
        synced_tx.send_replace(true);
        settle().await;
        assert_eq!(store.binds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_store_does_not_block_others() {
        let (mut provider, _connected_tx, synced_tx) = test_provider();
        let counting = Arc::new(CountingStore {
            binds: AtomicUsize::new(0),
        });
        provider.attach(Arc::new(FailingStore));
        provider.attach(counting.clone());
        provider.start();

        synced_tx.send_replace(true);
        settle().await;
        assert_eq!(counting.binds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_binds_immediately_when_already_synced() {
        let (mut provider, _connected_tx, synced_tx) = test_provider();
        synced_tx.send_replace(true);

        let store = Arc::new(CountingStore {
            binds: AtomicUsize::new(0),
        });
        provider.attach(store.clone());
        provider.start();

        settle().await;
        assert_eq!(store.binds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_indicator_reflects_flags() {
        let (provider, connected_tx, synced_tx) = test_provider();

        assert!(!provider.indicator().is_active());

        connected_tx.send_replace(true);
        assert!(provider.indicator().connected);
        assert!(!provider.indicator().is_active());

        synced_tx.send_replace(true);
        assert!(provider.indicator().is_active());
    }
}
