//! Request-scoped transaction context.
//!
//! A [`TxContext`] is created for every call: it carries the resolved [`Caller`], the staged
//! [`Transaction`] and the node's [`CoreConfig`]. Workflow functions receive it explicitly and
//! never reach for ambient state.

use crate::config::CoreConfig;
use crate::identity::{Caller, IdentityClaims};
use crate::store::{Ledger, PartitionKey, PrivateStore, Transaction};
use crate::{WorkflowError, WorkflowResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub struct TxContext<'a> {
    caller: Caller,
    tx: Transaction<'a>,
    config: &'a CoreConfig,
}

impl<'a> TxContext<'a> {
    /// Resolves the caller and opens a transaction against `ledger`.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::DomainMismatch` if the caller is not enrolled in the domain of the
    /// node executing the call, plus any error from resolving the caller's claims.
    pub fn begin(
        config: &'a CoreConfig,
        ledger: &'a dyn Ledger,
        claims: &dyn IdentityClaims,
    ) -> WorkflowResult<Self> {
        let caller = Caller::resolve(claims)?;
        if &caller.domain != config.local_domain() {
            return Err(WorkflowError::DomainMismatch {
                client: caller.domain.to_string(),
                local: config.local_domain().to_string(),
            });
        }

        Ok(Self {
            caller,
            tx: Transaction::new(ledger),
            config,
        })
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    pub fn config(&self) -> &CoreConfig {
        self.config
    }

    /// Private partition of the caller's domain.
    pub fn own_partition(&self) -> PartitionKey {
        self.config.private_partition(&self.caller.domain)
    }

    pub fn shared_partition(&self) -> PartitionKey {
        self.config.shared_partition()
    }

    fn check_writable(&self, partition: &PartitionKey) -> WorkflowResult<()> {
        let own = *partition == self.own_partition();
        let shared = *partition == self.shared_partition()
            && self.config.is_shared_member(&self.caller.domain);
        if !own && !shared {
            return Err(WorkflowError::PartitionNotWritable {
                partition: partition.to_string(),
                domain: self.caller.domain.to_string(),
            });
        }
        Ok(())
    }

    /// Reads and decodes a stored value.
    pub fn get_json<T: DeserializeOwned>(
        &mut self,
        partition: &PartitionKey,
        key: &str,
    ) -> WorkflowResult<Option<T>> {
        tracing::debug!(%partition, key = %key.escape_default(), "read");
        match self.tx.get(partition, key)? {
            Some(bytes) => decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Whether a key currently holds a value. The read is recorded like any other.
    pub fn exists(&mut self, partition: &PartitionKey, key: &str) -> WorkflowResult<bool> {
        Ok(self.tx.get(partition, key)?.is_some())
    }

    /// Encodes and stages a value.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::PartitionNotWritable` unless `partition` is the caller's own
    /// partition or the shared partition of a member domain.
    pub fn put_json<T: Serialize>(
        &mut self,
        partition: &PartitionKey,
        key: &str,
        value: &T,
    ) -> WorkflowResult<()> {
        self.check_writable(partition)?;
        let bytes = serde_json::to_vec(value).map_err(WorkflowError::Serialization)?;
        self.tx.put(partition, key, bytes)
    }

    /// Stages a delete, under the same partition rule as [`TxContext::put_json`].
    pub fn delete(&mut self, partition: &PartitionKey, key: &str) -> WorkflowResult<()> {
        self.check_writable(partition)?;
        self.tx.delete(partition, key)
    }

    /// Decodes every plain entry of a partition whose key satisfies `filter`.
    ///
    /// The whole scanned key set joins the transaction's read set.
    pub fn scan_json<T: DeserializeOwned>(
        &mut self,
        partition: &PartitionKey,
        filter: impl Fn(&str) -> bool,
    ) -> WorkflowResult<Vec<T>> {
        tracing::debug!(%partition, "scan");
        self.tx
            .range_scan(partition)?
            .into_iter()
            .filter(|(key, _)| filter(key))
            .map(|(key, bytes)| decode(&key, &bytes))
            .collect()
    }

    /// Commits every staged write as one unit.
    pub fn commit(self) -> WorkflowResult<()> {
        self.tx.commit()
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> WorkflowResult<T> {
    serde_json::from_slice(bytes).map_err(|source| WorkflowError::Deserialization {
        key: key.escape_default().to_string(),
        source,
    })
}
