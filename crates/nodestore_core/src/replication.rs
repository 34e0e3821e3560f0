//! Cache replication batches.
//!
//! After a commit the manager hands a [`ReplicationBatch`] of added and
//! deleted nodes to its [`Replicator`]. Shipping the batch to other
//! instances is up to the replicator; the receiving side applies it with
//! [`NodeManager::replicate_cache`](crate::NodeManager::replicate_cache).
//! Delivery is best effort.
//!
//! ```rust,ignore
//! let replicator = Arc::new(ChannelReplicator::new());
//! let batches = replicator.subscribe();
//! nmgr.set_replicator(replicator);
//!
//! std::thread::spawn(move || {
//!     while let Ok(batch) = batches.recv() {
//!         other_nmgr.replicate_cache(batch);
//!     }
//! });
//! ```

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::node::Node;
use crate::record::NodeRecord;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};

/// One node in a replication batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedNode {
    /// Storage name, `None` for embedded nodes.
    pub storage: Option<String>,
    /// Full node state.
    pub record: NodeRecord,
}

impl ReplicatedNode {
    /// Captures a node's current state.
    #[must_use]
    pub fn from_node(node: &Node) -> Self {
        Self {
            storage: node.storage(),
            record: node.to_record(),
        }
    }

    /// Returns the node id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Returns the prototype name.
    #[must_use]
    pub fn prototype(&self) -> &str {
        &self.record.prototype
    }

    /// Returns the node's primary key.
    #[must_use]
    pub fn key(&self) -> Key {
        Key::db(self.storage.as_deref(), self.record.id.clone())
    }
}

/// Nodes added (inserted or updated) and deleted by one commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicationBatch {
    /// Inserted or updated nodes.
    pub added: Vec<ReplicatedNode>,
    /// Deleted nodes.
    pub deleted: Vec<ReplicatedNode>,
}

impl ReplicationBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the batch carries nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty()
    }

    /// Encodes the batch as CBOR for transport.
    ///
    /// # Errors
    ///
    /// Returns a codec error if serialization fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a batch from CBOR.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the bytes are not a valid batch.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
    }
}

/// Receives outbound replication batches.
pub trait Replicator: Send + Sync {
    /// Ships a batch. Must not block for long; failures are not reported.
    fn replicate(&self, batch: ReplicationBatch);
}

/// In-process replicator fanning batches out over channels.
#[derive(Debug, Default)]
pub struct ChannelReplicator {
    subscribers: RwLock<Vec<Sender<ReplicationBatch>>>,
}

impl ChannelReplicator {
    /// Creates a replicator without subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a receiver for all future batches.
    pub fn subscribe(&self) -> Receiver<ReplicationBatch> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Replicator for ChannelReplicator {
    fn replicate(&self, batch: ReplicationBatch) {
        self.subscribers
            .write()
            .retain(|tx| tx.send(batch.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Value;
    use crate::types::Timestamp;

    fn sample() -> ReplicatedNode {
        let node = Node::loaded("3".into(), None, "page".into(), None, Timestamp::now(), Timestamp::now());
        node.set_value("title", Value::from("x"));
        ReplicatedNode::from_node(&node)
    }

    #[test]
    fn fans_out_and_drops_dead_subscribers() {
        let replicator = ChannelReplicator::new();
        let a = replicator.subscribe();
        let b = replicator.subscribe();
        drop(b);

        let batch = ReplicationBatch {
            added: vec![sample()],
            deleted: Vec::new(),
        };
        replicator.replicate(batch.clone());
        assert_eq!(a.recv().unwrap(), batch);
        assert_eq!(replicator.subscriber_count(), 1);
    }

    #[test]
    fn batch_cbor_round_trip() {
        let batch = ReplicationBatch {
            added: vec![sample()],
            deleted: vec![sample()],
        };
        let bytes = batch.encode().unwrap();
        assert_eq!(ReplicationBatch::decode(&bytes).unwrap(), batch);
    }

    #[test]
    fn replicated_node_key() {
        let node = sample();
        assert_eq!(node.key(), Key::embedded("3"));
        assert_eq!(node.prototype(), "page");
        assert_eq!(node.id(), "3");
    }
}
