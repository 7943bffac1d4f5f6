//! Workflow operations.
//!
//! Every function here takes a [`TxContext`] and stages its reads and writes in the context's
//! transaction. Nothing is persisted until the caller commits the context, so a function that
//! returns an error leaves no partial state behind.
//!
//! - [`registration`]: patient and doctor registration, appointments, medical records
//! - [`consent`]: cross-domain share agreements and record relocation
//! - [`access`]: in-domain access requests, grants and revocation
//! - [`queries`]: read-only lookups and listings

pub mod access;
pub mod consent;
pub mod queries;
pub mod registration;

use crate::constants::{DATA_ACCESS_REQUEST_NAMESPACE, REQUEST_AGREEMENT_NAMESPACE};
use crate::context::TxContext;
use crate::identity::{Caller, Role};
use crate::records::{DoctorRecord, PatientRecord, RecordId};
use crate::store::{composite_key, PartitionKey};
use crate::{WorkflowError, WorkflowResult};

/// A record together with the partition it was read from.
#[derive(Clone, Debug)]
pub struct Located<T> {
    pub partition: PartitionKey,
    pub record: T,
}

pub(crate) fn agreement_key(pid: &RecordId) -> WorkflowResult<String> {
    composite_key(REQUEST_AGREEMENT_NAMESPACE, &[pid.as_str()])
}

pub(crate) fn access_request_key(pid: &RecordId) -> WorkflowResult<String> {
    composite_key(DATA_ACCESS_REQUEST_NAMESPACE, &[pid.as_str()])
}

/// Looks a patient up in the caller's partition, then in the shared partition.
pub(crate) fn find_patient(
    ctx: &mut TxContext<'_>,
    pid: &RecordId,
) -> WorkflowResult<Option<Located<PatientRecord>>> {
    for partition in [ctx.own_partition(), ctx.shared_partition()] {
        if let Some(record) = ctx.get_json::<PatientRecord>(&partition, pid.as_str())? {
            return Ok(Some(Located { partition, record }));
        }
        tracing::debug!(%partition, pid = %pid, "patient not in partition");
    }
    Ok(None)
}

pub(crate) fn load_patient(
    ctx: &mut TxContext<'_>,
    pid: &RecordId,
) -> WorkflowResult<Located<PatientRecord>> {
    find_patient(ctx, pid)?.ok_or_else(|| WorkflowError::NotFound(format!("patient {pid}")))
}

/// Doctors never leave their home partition, so only the caller's partition is searched.
pub(crate) fn find_doctor(
    ctx: &mut TxContext<'_>,
    did: &RecordId,
) -> WorkflowResult<Option<Located<DoctorRecord>>> {
    let partition = ctx.own_partition();
    Ok(ctx
        .get_json::<DoctorRecord>(&partition, did.as_str())?
        .map(|record| Located { partition, record }))
}

pub(crate) fn load_doctor(
    ctx: &mut TxContext<'_>,
    did: &RecordId,
) -> WorkflowResult<Located<DoctorRecord>> {
    find_doctor(ctx, did)?.ok_or_else(|| {
        WorkflowError::NotFound(format!("doctor {did} in partition {}", ctx.own_partition()))
    })
}

pub(crate) fn save_patient(
    ctx: &mut TxContext<'_>,
    located: &Located<PatientRecord>,
) -> WorkflowResult<()> {
    ctx.put_json(
        &located.partition,
        located.record.pid.as_str(),
        &located.record,
    )
}

pub(crate) fn save_doctor(
    ctx: &mut TxContext<'_>,
    located: &Located<DoctorRecord>,
) -> WorkflowResult<()> {
    ctx.put_json(&located.partition, located.record.did.as_str(), &located.record)
}

/// Fails unless the caller is the target patient or the requesting doctor of a pending consent.
///
/// Ids are compared only within the matching role.
pub(crate) fn require_withdrawal_party(
    caller: &Caller,
    pid: &RecordId,
    requester: &RecordId,
) -> WorkflowResult<()> {
    let allowed = match caller.role {
        Role::Patient => caller.id == pid.as_str(),
        Role::Doctor => caller.id == requester.as_str(),
        Role::Admin => false,
    };
    if !allowed {
        return Err(WorkflowError::Unauthorized(format!(
            "only patient {pid} or doctor {requester} may withdraw this request; caller is {} {}",
            caller.role, caller.id
        )));
    }
    Ok(())
}

/// Shared fixtures for workflow tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use crate::config::CoreConfig;
    use crate::context::TxContext;
    use crate::identity::{Role, StaticClaims};
    use crate::records::{PersonalInfo, RecordId};
    use crate::store::InMemoryLedger;
    use medshare_types::DomainId;

    pub fn domain(s: &str) -> DomainId {
        DomainId::new(s).unwrap()
    }

    pub fn id(s: &str) -> RecordId {
        RecordId::parse(s).unwrap()
    }

    /// Node configurations for the two member domains of the shared partition.
    pub fn configs() -> (CoreConfig, CoreConfig) {
        let members = vec![domain("Org1MSP"), domain("Org2MSP")];
        (
            CoreConfig::new(domain("Org1MSP"), members.clone()).unwrap(),
            CoreConfig::new(domain("Org2MSP"), members).unwrap(),
        )
    }

    pub fn patient(id: &str, org: &str) -> StaticClaims {
        StaticClaims::member(Role::Patient, id, domain(org))
    }

    pub fn doctor(id: &str, org: &str) -> StaticClaims {
        StaticClaims::member(Role::Doctor, id, domain(org))
    }

    pub fn admin(org: &str) -> StaticClaims {
        StaticClaims::member(Role::Admin, "admin", domain(org))
    }

    pub fn info(first_name: &str) -> PersonalInfo {
        PersonalInfo {
            first_name: first_name.into(),
            last_name: "Tester".into(),
            age: 40,
            gender: "female".into(),
            email: "tester@example.org".into(),
            contact_number: "0123456789".into(),
            city: "Leeds".into(),
            state: "West Yorkshire".into(),
            country: "UK".into(),
            role_tag: "patient".into(),
        }
    }

    /// Runs `op` in its own transaction and commits it if it succeeds.
    pub fn run<T>(
        cfg: &CoreConfig,
        ledger: &InMemoryLedger,
        claims: &StaticClaims,
        op: impl FnOnce(&mut TxContext<'_>) -> crate::WorkflowResult<T>,
    ) -> crate::WorkflowResult<T> {
        let mut ctx = TxContext::begin(cfg, ledger, claims)?;
        let out = op(&mut ctx)?;
        ctx.commit()?;
        Ok(out)
    }
}
