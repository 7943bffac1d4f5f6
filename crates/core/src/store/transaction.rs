//! Staged ledger transaction.

use super::{is_composite_key, ChangeSet, Ledger, PartitionKey, PrivateStore, StateKey, Version};
use crate::WorkflowResult;
use std::collections::BTreeMap;

/// One call's view of the ledger.
///
/// Reads go to the ledger and record the version seen; writes and deletes are staged and become
/// visible to later reads in the same transaction. Nothing reaches the ledger until
/// [`Transaction::commit`], and dropping an uncommitted transaction discards it.
pub struct Transaction<'a> {
    ledger: &'a dyn Ledger,
    changes: ChangeSet,
}

impl<'a> Transaction<'a> {
    pub fn new(ledger: &'a dyn Ledger) -> Self {
        Self {
            ledger,
            changes: ChangeSet::default(),
        }
    }

    /// Whether any write or delete has been staged.
    pub fn has_writes(&self) -> bool {
        !self.changes.writes.is_empty()
    }

    /// Submits the staged writes together with the read versions they depend on.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::StorageConflict` if another transaction changed a key this one
    /// read. The ledger is left untouched in that case.
    pub fn commit(self) -> WorkflowResult<()> {
        if !self.has_writes() {
            tracing::debug!("read-only transaction; nothing to commit");
            return Ok(());
        }

        self.ledger.apply(&self.changes)?;
        for (state_key, value) in &self.changes.writes {
            tracing::info!(
                partition = %state_key.partition,
                key = %state_key.key.escape_default(),
                deleted = value.is_none(),
                "committed"
            );
        }
        Ok(())
    }
}

impl PrivateStore for Transaction<'_> {
    fn get(&mut self, partition: &PartitionKey, key: &str) -> WorkflowResult<Option<Vec<u8>>> {
        let state_key = StateKey::new(partition, key);
        if let Some(staged) = self.changes.writes.get(&state_key) {
            return Ok(staged.clone());
        }

        let read = self.ledger.read(partition, key)?;
        self.changes.reads.entry(state_key).or_insert(read.version);
        Ok(read.value)
    }

    fn put(&mut self, partition: &PartitionKey, key: &str, value: Vec<u8>) -> WorkflowResult<()> {
        self.changes
            .writes
            .insert(StateKey::new(partition, key), Some(value));
        Ok(())
    }

    fn delete(&mut self, partition: &PartitionKey, key: &str) -> WorkflowResult<()> {
        self.changes.writes.insert(StateKey::new(partition, key), None);
        Ok(())
    }

    fn range_scan(&mut self, partition: &PartitionKey) -> WorkflowResult<Vec<(String, Vec<u8>)>> {
        let scanned = self.ledger.scan(partition)?;
        let seen: BTreeMap<String, Version> = scanned
            .iter()
            .map(|(key, read)| (key.clone(), read.version))
            .collect();
        self.changes.scans.entry(partition.clone()).or_insert(seen);

        let mut rows: BTreeMap<String, Vec<u8>> = scanned
            .into_iter()
            .filter_map(|(key, read)| read.value.map(|value| (key, value)))
            .collect();

        for (state_key, value) in &self.changes.writes {
            if &state_key.partition != partition || is_composite_key(&state_key.key) {
                continue;
            }
            match value {
                Some(v) => {
                    rows.insert(state_key.key.clone(), v.clone());
                }
                None => {
                    rows.remove(&state_key.key);
                }
            }
        }

        Ok(rows.into_iter().collect())
    }
}
