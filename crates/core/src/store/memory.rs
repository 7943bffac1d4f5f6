//! In-process ledger host.

use super::{is_composite_key, ChangeSet, Ledger, PartitionKey, Version, VersionedValue};
use crate::{WorkflowError, WorkflowResult};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
struct Entry {
    version: Version,
    // None once deleted; the entry stays so its version keeps increasing.
    value: Option<Vec<u8>>,
}

/// A [`Ledger`] held in memory behind a single lock.
///
/// Commits are serialized by the lock, which gives the one-at-a-time application of read and
/// write sets that optimistic concurrency control relies on.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<BTreeMap<PartitionKey, BTreeMap<String, Entry>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> WorkflowResult<MutexGuard<'_, BTreeMap<PartitionKey, BTreeMap<String, Entry>>>> {
        self.state
            .lock()
            .map_err(|e| WorkflowError::LedgerUnavailable(e.to_string()))
    }
}

impl Ledger for InMemoryLedger {
    fn read(&self, partition: &PartitionKey, key: &str) -> WorkflowResult<VersionedValue> {
        let state = self.lock()?;
        let entry = state.get(partition).and_then(|p| p.get(key));
        Ok(match entry {
            Some(entry) => VersionedValue {
                version: entry.version,
                value: entry.value.clone(),
            },
            None => VersionedValue {
                version: 0,
                value: None,
            },
        })
    }

    fn scan(&self, partition: &PartitionKey) -> WorkflowResult<Vec<(String, VersionedValue)>> {
        let state = self.lock()?;
        let Some(entries) = state.get(partition) else {
            return Ok(Vec::new());
        };

        Ok(entries
            .iter()
            .filter(|(key, _)| !is_composite_key(key))
            .filter_map(|(key, entry)| {
                entry.value.as_ref().map(|v| {
                    let value = VersionedValue {
                        version: entry.version,
                        value: Some(v.clone()),
                    };
                    (key.clone(), value)
                })
            })
            .collect())
    }

    fn apply(&self, changes: &ChangeSet) -> WorkflowResult<()> {
        let mut state = self.lock()?;

        for (state_key, read_version) in &changes.reads {
            let current = state
                .get(&state_key.partition)
                .and_then(|p| p.get(&state_key.key))
                .map(|e| e.version)
                .unwrap_or(0);
            if current != *read_version {
                tracing::warn!(
                    partition = %state_key.partition,
                    read_version,
                    current,
                    "rejecting commit: key changed since it was read"
                );
                return Err(WorkflowError::StorageConflict {
                    partition: state_key.partition.to_string(),
                    key: state_key.key.clone(),
                });
            }
        }

        for (partition, seen) in &changes.scans {
            let current = live_versions(state.get(partition));
            if let Some(key) = first_difference(seen, &current) {
                tracing::warn!(
                    %partition,
                    "rejecting commit: scanned partition changed since it was read"
                );
                return Err(WorkflowError::StorageConflict {
                    partition: partition.to_string(),
                    key,
                });
            }
        }

        for (state_key, value) in &changes.writes {
            let entry = state
                .entry(state_key.partition.clone())
                .or_default()
                .entry(state_key.key.clone())
                .or_insert(Entry {
                    version: 0,
                    value: None,
                });
            entry.version += 1;
            entry.value = value.clone();
        }

        Ok(())
    }
}

/// Live plain keys of a partition with their versions.
fn live_versions(entries: Option<&BTreeMap<String, Entry>>) -> BTreeMap<String, Version> {
    entries
        .into_iter()
        .flatten()
        .filter(|(key, entry)| !is_composite_key(key) && entry.value.is_some())
        .map(|(key, entry)| (key.clone(), entry.version))
        .collect()
}

/// First key that was changed, removed or added between two key sets.
fn first_difference(
    seen: &BTreeMap<String, Version>,
    current: &BTreeMap<String, Version>,
) -> Option<String> {
    seen.iter()
        .find(|(key, version)| current.get(*key) != Some(*version))
        .or_else(|| current.iter().find(|(key, _)| !seen.contains_key(*key)))
        .map(|(key, _)| key.clone())
}
