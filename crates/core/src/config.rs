//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the contract facade
//! as an `Arc<CoreConfig>`. Request handling never reads process-wide environment variables.

use crate::store::PartitionKey;
use crate::{WorkflowError, WorkflowResult};
use medshare_types::DomainId;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    local_domain: DomainId,
    shared_members: Vec<DomainId>,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Arguments
    ///
    /// * `local_domain` - The domain of the node executing operations.
    /// * `shared_members` - Member domains of the shared partition, in the order that forms its
    ///   name.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::InvalidInput` if fewer than two members are given, a member is
    /// repeated, or `local_domain` is not a member.
    pub fn new(local_domain: DomainId, shared_members: Vec<DomainId>) -> WorkflowResult<Self> {
        if shared_members.len() < 2 {
            return Err(WorkflowError::InvalidInput(
                "shared partition needs at least two member domains".into(),
            ));
        }

        for (i, member) in shared_members.iter().enumerate() {
            if shared_members[..i].contains(member) {
                return Err(WorkflowError::InvalidInput(format!(
                    "domain {member} listed twice in shared partition members"
                )));
            }
        }

        if !shared_members.contains(&local_domain) {
            return Err(WorkflowError::InvalidInput(format!(
                "local domain {local_domain} is not a member of the shared partition"
            )));
        }

        Ok(Self {
            local_domain,
            shared_members,
        })
    }

    /// Build a `CoreConfig` from raw values as read by a binary from its environment.
    ///
    /// `shared_domains` is a comma separated list; blank entries are ignored.
    pub fn from_env_values(local_domain: &str, shared_domains: &str) -> WorkflowResult<Self> {
        let local_domain = parse_domain(local_domain)?;
        let shared_members = shared_domains
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_domain)
            .collect::<WorkflowResult<Vec<_>>>()?;

        Self::new(local_domain, shared_members)
    }

    pub fn local_domain(&self) -> &DomainId {
        &self.local_domain
    }

    pub fn shared_members(&self) -> &[DomainId] {
        &self.shared_members
    }

    /// Whether `domain` is a member of the shared partition.
    pub fn is_shared_member(&self, domain: &DomainId) -> bool {
        self.shared_members.contains(domain)
    }

    /// Name of the shared partition.
    pub fn shared_partition(&self) -> PartitionKey {
        PartitionKey::shared(&self.shared_members)
    }

    /// Name of a domain's private partition.
    pub fn private_partition(&self, domain: &DomainId) -> PartitionKey {
        PartitionKey::private(domain)
    }
}

fn parse_domain(value: &str) -> WorkflowResult<DomainId> {
    DomainId::new(value.trim())
        .map_err(|e| WorkflowError::InvalidInput(format!("invalid domain {value:?}: {e}")))
}
