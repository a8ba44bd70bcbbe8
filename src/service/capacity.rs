//! Free-space accounting for the master disk and the storage nodes
//!
//! Reads are unlocked snapshots. Two uploads may both see the same free
//! space and both proceed; the per-node counter is adjusted atomically in
//! the database and `reconcile` rebuilds it from the catalog afterwards.

use crate::error::StoreResult;
use crate::metadata::{MetadataStorage, NodeRegistry, ObjectCatalog, StorageNode};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityReport {
    pub master_capacity: u64,
    pub master_used: u64,
    pub master_free: i64,
    pub nodes: Vec<NodeCapacity>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeCapacity {
    pub node_id: String,
    pub name: String,
    pub capacity: u64,
    pub used_storage: u64,
    pub free_space: i64,
    pub eligible: bool,
}

pub struct CapacityAccountant {
    metadata: Arc<dyn MetadataStorage>,
    master_capacity: u64,
}

impl CapacityAccountant {
    pub fn new(metadata: Arc<dyn MetadataStorage>, master_capacity: u64) -> Self {
        Self { metadata, master_capacity }
    }

    pub fn master_capacity(&self) -> u64 {
        self.master_capacity
    }

    /// Ceiling minus the sum of locally stored object sizes, may be negative
    pub fn master_free_space(&self) -> StoreResult<i64> {
        let used = self.metadata.local_usage()?;
        Ok(signed_free(self.master_capacity, used))
    }

    /// Node ceiling minus its used-storage counter, may be negative
    pub fn node_free_space(node: &StorageNode) -> i64 {
        signed_free(node.capacity, node.used_storage)
    }

    pub fn report(&self) -> StoreResult<CapacityReport> {
        let master_used = self.metadata.local_usage()?;
        let nodes = self
            .metadata
            .list_nodes()?
            .into_iter()
            .map(|node| NodeCapacity {
                free_space: Self::node_free_space(&node),
                eligible: node.is_eligible(),
                node_id: node.id,
                name: node.name,
                capacity: node.capacity,
                used_storage: node.used_storage,
            })
            .collect();
        Ok(CapacityReport {
            master_capacity: self.master_capacity,
            master_used,
            master_free: signed_free(self.master_capacity, master_used),
            nodes,
        })
    }

    /// Rewrite every node's counter from the sizes recorded in the catalog.
    /// Returns the number of nodes whose counter changed.
    pub fn reconcile(&self) -> StoreResult<usize> {
        let mut corrected = 0;
        for node in self.metadata.list_nodes()? {
            let actual = self.metadata.node_usage(&node.id)?;
            if actual != node.used_storage {
                warn!(
                    "Node {} used storage drifted: counter {} catalog {}",
                    node.name, node.used_storage, actual
                );
                self.metadata.set_used_storage(&node.id, actual)?;
                corrected += 1;
            }
        }
        if corrected > 0 {
            info!("Reconciled used storage of {} nodes", corrected);
        }
        Ok(corrected)
    }
}

fn signed_free(capacity: u64, used: u64) -> i64 {
    (capacity as i128 - used as i128).clamp(i64::MIN as i128, i64::MAX as i128) as i64
}
