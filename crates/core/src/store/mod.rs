//! Partitioned key-value storage.
//!
//! The ledger holds one private partition per custodial domain plus one shared partition whose
//! members are configured at startup. Workflows never talk to the ledger directly: each call
//! stages its reads and writes in a [`Transaction`], which the host ledger applies atomically on
//! commit or rejects with [`WorkflowError::StorageConflict`] if any key it read has since
//! changed.
//!
//! - [`PrivateStore`] is the get/put/delete/range-scan surface workflows use.
//! - [`Ledger`] is the host-side surface a transaction commits against.
//! - [`InMemoryLedger`] is an in-process host used by tests and tooling.

mod memory;
mod transaction;

pub use memory::InMemoryLedger;
pub use transaction::Transaction;

use crate::constants::{COMPOSITE_KEY_DELIMITER, PARTITION_SUFFIX};
use crate::{WorkflowError, WorkflowResult};
use medshare_types::DomainId;
use std::collections::BTreeMap;

// ============================================================================
// PARTITIONS AND KEYS
// ============================================================================

/// Name of a ledger partition.
///
/// Built only through [`PartitionKey::private`] and [`PartitionKey::shared`], so every name in
/// the system follows the same `<domains>PrivateCollection` convention.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// The private partition of a single domain.
    pub fn private(domain: &DomainId) -> Self {
        Self(format!("{}{}", domain.as_str(), PARTITION_SUFFIX))
    }

    /// The partition shared by `members`, named in the order given.
    pub fn shared(members: &[DomainId]) -> Self {
        let mut name: String = members.iter().map(DomainId::as_str).collect();
        name.push_str(PARTITION_SUFFIX);
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds a deterministic key for an object type and its identifying parts.
///
/// The key is `\0namespace\0part1\0part2\0...`. Because record ids never contain the NUL
/// delimiter, composite keys never collide with plain record keys in the same partition.
///
/// # Errors
///
/// Returns `WorkflowError::InvalidInput` if the namespace is empty or any component contains
/// the delimiter.
pub fn composite_key(namespace: &str, parts: &[&str]) -> WorkflowResult<String> {
    if namespace.is_empty() {
        return Err(WorkflowError::InvalidInput(
            "composite key namespace cannot be empty".into(),
        ));
    }

    let mut key = String::new();
    key.push(COMPOSITE_KEY_DELIMITER);
    for component in std::iter::once(&namespace).chain(parts.iter()) {
        if component.contains(COMPOSITE_KEY_DELIMITER) {
            return Err(WorkflowError::InvalidInput(format!(
                "composite key component {component:?} contains the key delimiter"
            )));
        }
        key.push_str(component);
        key.push(COMPOSITE_KEY_DELIMITER);
    }
    Ok(key)
}

/// Whether `key` was produced by [`composite_key`].
pub fn is_composite_key(key: &str) -> bool {
    key.starts_with(COMPOSITE_KEY_DELIMITER)
}

// ============================================================================
// STORE TRAITS
// ============================================================================

/// The storage surface seen by workflow code.
pub trait PrivateStore {
    /// Reads a key, observing any write already staged in this store.
    fn get(&mut self, partition: &PartitionKey, key: &str) -> WorkflowResult<Option<Vec<u8>>>;

    fn put(&mut self, partition: &PartitionKey, key: &str, value: Vec<u8>) -> WorkflowResult<()>;

    fn delete(&mut self, partition: &PartitionKey, key: &str) -> WorkflowResult<()>;

    /// Returns every plain (non-composite) key in a partition, in key order.
    ///
    /// The result is a finished snapshot; calling again restarts the scan. The scanned key set is
    /// part of the read set, so a commit fails if any key in it changed or a key was added.
    fn range_scan(&mut self, partition: &PartitionKey) -> WorkflowResult<Vec<(String, Vec<u8>)>>;
}

/// Monotonic per-key version. A key that was never written has version 0.
pub type Version = u64;

/// Fully qualified location of a value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey {
    pub partition: PartitionKey,
    pub key: String,
}

impl StateKey {
    pub fn new(partition: &PartitionKey, key: &str) -> Self {
        Self {
            partition: partition.clone(),
            key: key.to_owned(),
        }
    }
}

/// A value as currently held by the ledger, with the version it was read at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedValue {
    pub version: Version,
    pub value: Option<Vec<u8>>,
}

/// Read versions and staged writes of one transaction. `None` in `writes` is a delete.
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    pub reads: BTreeMap<StateKey, Version>,
    /// Live plain keys of each scanned partition, with the versions seen.
    pub scans: BTreeMap<PartitionKey, BTreeMap<String, Version>>,
    pub writes: BTreeMap<StateKey, Option<Vec<u8>>>,
}

/// Host ledger contract.
///
/// `apply` must validate every read version and apply every write as one step, so two
/// transactions that read the same key cannot both commit a change based on it.
pub trait Ledger: Send + Sync {
    fn read(&self, partition: &PartitionKey, key: &str) -> WorkflowResult<VersionedValue>;

    /// Live plain keys of a partition, in key order. Every returned value is `Some`.
    fn scan(&self, partition: &PartitionKey) -> WorkflowResult<Vec<(String, VersionedValue)>>;

    /// # Errors
    ///
    /// Returns `WorkflowError::StorageConflict` naming the first stale key if any read version
    /// no longer matches, or if a scanned partition's live key set changed. Nothing is written in
    /// that case.
    fn apply(&self, changes: &ChangeSet) -> WorkflowResult<()>;
}
