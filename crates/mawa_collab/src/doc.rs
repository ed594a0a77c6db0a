//! Shared CRDT document.
//!
//! This module provides [`SharedDoc`], which wraps a yrs [`Doc`] as the
//! mutable state container shared between collaborating clients. One
//! `SharedDoc` exists per room replica: the relay holds the authoritative
//! one, each connector holds a local one.
//!
//! # Synchronization
//!
//! State moves between replicas as opaque binary updates (yrs v1 encoding).
//! Use [`SharedDoc::encode_snapshot`] to produce the full state for a new
//! peer and [`SharedDoc::apply_update`] to integrate remote changes.
//! Applying an update is idempotent, and replicas that have received the
//! same set of updates converge to the same observable state regardless of
//! delivery order.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, MapRef, ReadTxn, StateVector, Subscription, Transact, Update};

use crate::error::{CollabError, Result};

/// Where an update came from.
///
/// Local mutations (domain stores writing through the bound document) run in
/// untagged transactions; updates arriving over the wire are applied in
/// transactions tagged with their origin so that update observers can tell
/// the two apart and only ship local changes to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// Update originated from a local user action
    Local,
    /// Update received from a peer via the relay
    Remote,
    /// Update received as part of the initial snapshot
    Sync,
}

impl UpdateOrigin {
    fn as_tag(self) -> &'static str {
        match self {
            UpdateOrigin::Local => "local",
            UpdateOrigin::Remote => "remote",
            UpdateOrigin::Sync => "sync",
        }
    }
}

impl std::fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_tag())
    }
}

/// A CRDT document shared across replicas.
///
/// The document is content-agnostic: domain stores decide which named maps
/// and sequences live inside it. The collaboration layer only moves its
/// binary updates around.
pub struct SharedDoc {
    doc: Doc,
}

impl SharedDoc {
    /// Create a new empty shared document.
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Get the underlying yrs document.
    ///
    /// Domain stores use this to reach their typed shared structures.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Get (or create) a named top-level map in the document.
    pub fn map(&self, name: &str) -> MapRef {
        self.doc.get_or_insert_map(name)
    }

    /// Apply a binary update to the document.
    ///
    /// Returns an error if the bytes are not a valid yrs v1 update or the
    /// decoded update cannot be integrated. On error the document is left
    /// untouched.
    pub fn apply_update(&self, update: &[u8], origin: UpdateOrigin) -> Result<()> {
        let decoded =
            Update::decode_v1(update).map_err(|e| CollabError::UpdateDecode(e.to_string()))?;
        let mut txn = match origin {
            UpdateOrigin::Local => self.doc.transact_mut(),
            UpdateOrigin::Remote | UpdateOrigin::Sync => {
                self.doc.transact_mut_with(origin.as_tag())
            }
        };
        txn.apply_update(decoded)
            .map_err(|e| CollabError::UpdateApply(e.to_string()))?;
        Ok(())
    }

    /// Encode the full document state as a single update.
    ///
    /// This is the snapshot sent to a newly joined peer.
    pub fn encode_snapshot(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Encode the document's state vector.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode the updates a remote peer with the given state vector is missing.
    pub fn diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_state_vector)
            .map_err(|e| CollabError::UpdateDecode(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Whether the document has recorded any operations yet.
    pub fn has_state(&self) -> bool {
        let txn = self.doc.transact();
        txn.state_vector() != StateVector::default()
    }

    /// Subscribe to locally produced document updates.
    ///
    /// The callback receives the binary update of every untagged (local)
    /// transaction. Transactions tagged by [`SharedDoc::apply_update`] with
    /// a remote or sync origin are skipped, so remote changes are never
    /// echoed back through the subscription. Returns a subscription that
    /// unsubscribes when dropped.
    pub fn observe_local_updates<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.doc
            .observe_update_v1(move |txn, event| {
                if txn.origin().is_none() {
                    callback(&event.update);
                }
            })
            .map_err(|e| CollabError::Observe(e.to_string()))
    }
}

impl Default for SharedDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SharedDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDoc")
            .field("client_id", &self.doc.client_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use yrs::Map;

    fn read_field(doc: &SharedDoc, map: &str, key: &str) -> Option<String> {
        let map = doc.map(map);
        let txn = doc.doc().transact();
        map.get(&txn, key).and_then(|v| v.cast::<String>().ok())
    }

    fn write_field(doc: &SharedDoc, map: &str, key: &str, value: &str) {
        let map = doc.map(map);
        let mut txn = doc.doc().transact_mut();
        map.insert(&mut txn, key, value);
    }

    #[test]
    fn test_snapshot_restores_state() {
        let source = SharedDoc::new();
        write_field(&source, "beds", "F", "1");

        let replica = SharedDoc::new();
        replica
            .apply_update(&source.encode_snapshot(), UpdateOrigin::Sync)
            .unwrap();

        assert_eq!(read_field(&replica, "beds", "F").as_deref(), Some("1"));
    }

    #[test]
    fn test_convergence_is_order_independent() {
        let a = SharedDoc::new();
        let b = SharedDoc::new();

        write_field(&a, "beds", "bed-1", "pilgrim-7");
        write_field(&b, "halls", "hall-42", "open");

        let update_a = a.encode_snapshot();
        let update_b = b.encode_snapshot();

        // Apply in opposite orders on two fresh replicas
        let r1 = SharedDoc::new();
        r1.apply_update(&update_a, UpdateOrigin::Remote).unwrap();
        r1.apply_update(&update_b, UpdateOrigin::Remote).unwrap();

        let r2 = SharedDoc::new();
        r2.apply_update(&update_b, UpdateOrigin::Remote).unwrap();
        r2.apply_update(&update_a, UpdateOrigin::Remote).unwrap();

        for replica in [&r1, &r2] {
            assert_eq!(
                read_field(replica, "beds", "bed-1").as_deref(),
                Some("pilgrim-7")
            );
            assert_eq!(
                read_field(replica, "halls", "hall-42").as_deref(),
                Some("open")
            );
        }
    }

    #[test]
    fn test_apply_update_is_idempotent() {
        let source = SharedDoc::new();
        write_field(&source, "beds", "F", "1");
        let update = source.encode_snapshot();

        let replica = SharedDoc::new();
        replica.apply_update(&update, UpdateOrigin::Remote).unwrap();
        let once = replica.encode_snapshot();

        replica.apply_update(&update, UpdateOrigin::Remote).unwrap();
        let twice = replica.encode_snapshot();

        assert_eq!(once, twice);
        assert_eq!(read_field(&replica, "beds", "F").as_deref(), Some("1"));
    }

    #[test]
    fn test_malformed_update_leaves_doc_untouched() {
        let doc = SharedDoc::new();
        write_field(&doc, "beds", "F", "1");
        let before = doc.encode_snapshot();

        let result = doc.apply_update(&[0xFF, 0x13, 0x37, 0x00, 0x42], UpdateOrigin::Remote);
        assert!(result.is_err());
        assert_eq!(doc.encode_snapshot(), before);
    }

    #[test]
    fn test_has_state() {
        let doc = SharedDoc::new();
        assert!(!doc.has_state());

        write_field(&doc, "beds", "F", "1");
        assert!(doc.has_state());
    }

    #[test]
    fn test_diff_covers_missing_updates() {
        let source = SharedDoc::new();
        write_field(&source, "beds", "F", "1");

        let replica = SharedDoc::new();
        let diff = source.diff(&replica.encode_state_vector()).unwrap();
        replica.apply_update(&diff, UpdateOrigin::Sync).unwrap();

        assert_eq!(read_field(&replica, "beds", "F").as_deref(), Some("1"));
    }

    #[test]
    fn test_observer_fires_for_local_mutations_only() {
        let doc = SharedDoc::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);

        let _sub = doc
            .observe_local_updates(move |update| {
                assert!(!update.is_empty());
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        // Local write fires the observer
        write_field(&doc, "beds", "F", "1");
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Applying a remote update does not
        let peer = SharedDoc::new();
        write_field(&peer, "beds", "G", "2");
        doc.apply_update(&peer.encode_snapshot(), UpdateOrigin::Remote)
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
