//! In-domain access requests.
//!
//! A doctor asks for access to a patient of their own domain with a single-signature
//! [`DataAccessRequest`], stored in the domain's private partition. Once the patient has
//! validated it, [`grant_data_access`] links doctor and patient and deletes the request.
//! [`revoke_access`] removes the link again at any time.

use super::{
    access_request_key, find_doctor, load_doctor, load_patient, require_withdrawal_party,
    save_doctor, save_patient,
};
use crate::context::TxContext;
use crate::records::{ConsentMetadata, DataAccessRequest, RecordId, RecordKind};
use crate::signature::{KeyStore, SignatureService};
use crate::validation::require_non_empty;
use crate::{WorkflowError, WorkflowResult};

/// Arguments of [`create_data_access_request`], as supplied by the requesting doctor.
#[derive(Clone, Debug)]
pub struct AccessRequest<'r> {
    pub patient_id: &'r str,
    pub client_sign: &'r str,
    pub user: &'r str,
    pub org: &'r str,
}

/// The calling doctor asks for access to a patient's record.
///
/// # Errors
///
/// - `WorkflowError::AlreadyHasAccess` if the doctor already lists the patient.
/// - `WorkflowError::AlreadyExists` if a request for the patient is already pending.
/// - `WorkflowError::InvalidInput` if the signature, the user or the org is empty.
pub fn create_data_access_request(
    ctx: &mut TxContext<'_>,
    request: AccessRequest<'_>,
) -> WorkflowResult<DataAccessRequest> {
    let did = ctx.caller().doctor_id()?;
    let pid = RecordId::parse_as(request.patient_id, RecordKind::Patient)?;
    require_non_empty("client_sign", request.client_sign)?;
    require_non_empty("user", request.user)?;
    require_non_empty("org", request.org)?;

    let doctor = load_doctor(ctx, &did)?;
    if doctor.record.has_patient(&pid) {
        return Err(WorkflowError::AlreadyHasAccess {
            doctor: did.to_string(),
            patient: pid.to_string(),
        });
    }

    let own = ctx.own_partition();
    let key = access_request_key(&pid)?;
    if ctx.exists(&own, &key)? {
        return Err(WorkflowError::AlreadyExists(format!(
            "data access request for patient {pid}"
        )));
    }

    let access_request = DataAccessRequest {
        meta_data: ConsentMetadata {
            org: request.org.to_owned(),
            user: request.user.to_owned(),
            id: did,
        },
        patient_id: pid,
        client_sign: request.client_sign.to_owned(),
        valid: false,
    };

    ctx.put_json(&own, &key, &access_request)?;
    tracing::info!(
        pid = %access_request.patient_id,
        did = %access_request.meta_data.id,
        "created data access request"
    );
    Ok(access_request)
}

pub fn read_data_access_request(
    ctx: &mut TxContext<'_>,
    patient_id: &str,
) -> WorkflowResult<DataAccessRequest> {
    let pid = RecordId::parse_as(patient_id, RecordKind::Patient)?;
    load_request(ctx, &pid)
}

/// The calling patient looks up the request that targets them.
pub fn notify_data_access_request(ctx: &mut TxContext<'_>) -> WorkflowResult<DataAccessRequest> {
    let pid = ctx.caller().patient_id()?;
    load_request(ctx, &pid)
}

/// The calling patient records the supplied outcome of checking their request's signature.
pub fn validate_data_access_request(ctx: &mut TxContext<'_>, valid: bool) -> WorkflowResult<()> {
    let pid = ctx.caller().patient_id()?;
    let mut request = load_request(ctx, &pid)?;
    request.valid = valid;
    store_request(ctx, &request)?;
    tracing::info!(pid = %pid, valid, "validated data access request");
    Ok(())
}

/// The calling patient verifies the requester's signature and records the result.
pub fn verify_and_validate_data_access_request<K: KeyStore>(
    ctx: &mut TxContext<'_>,
    signatures: &SignatureService<K>,
) -> WorkflowResult<bool> {
    let pid = ctx.caller().patient_id()?;
    let mut request = load_request(ctx, &pid)?;
    request.valid = signatures.verify_access_request(&request)?;
    store_request(ctx, &request)?;
    tracing::info!(pid = %pid, valid = request.valid, "verified data access request");
    Ok(request.valid)
}

/// Withdraws a pending request. Allowed for the target patient and the requesting doctor.
pub fn delete_data_access_request(
    ctx: &mut TxContext<'_>,
    patient_id: &str,
) -> WorkflowResult<()> {
    let pid = RecordId::parse_as(patient_id, RecordKind::Patient)?;
    let request = load_request(ctx, &pid)?;

    require_withdrawal_party(ctx.caller(), &pid, &request.meta_data.id)?;

    let own = ctx.own_partition();
    ctx.delete(&own, &access_request_key(&pid)?)?;
    tracing::info!(pid = %pid, "deleted data access request");
    Ok(())
}

/// The calling patient grants the pending, validated request.
///
/// The requesting doctor joins the patient's access list, the patient joins the doctor's, and
/// the request is deleted, all in one transaction.
///
/// # Errors
///
/// - `WorkflowError::NotFound` if there is no request, or the doctor or patient record is absent.
/// - `WorkflowError::NotOwner` if the caller does not own the patient record.
/// - `WorkflowError::Consent` if the request is not validated true.
/// - `WorkflowError::AlreadyExists` / `WorkflowError::AlreadyHasAccess` if the link already exists
///   on either side.
pub fn grant_data_access(ctx: &mut TxContext<'_>) -> WorkflowResult<()> {
    let pid = ctx.caller().patient_id()?;
    let request = load_request(ctx, &pid)?;
    request.patient_id.expect_kind(RecordKind::Patient)?;
    if request.patient_id != pid {
        return Err(WorkflowError::Unauthorized(format!(
            "data access request targets {}, not {pid}",
            request.patient_id
        )));
    }

    let mut patient = load_patient(ctx, &pid)?;
    if !patient.record.is_owner(&ctx.caller().underlying_id) {
        return Err(WorkflowError::NotOwner(pid.to_string()));
    }
    if !request.valid {
        return Err(WorkflowError::Consent(format!(
            "data access request for patient {pid} has not been validated"
        )));
    }

    let did = request.meta_data.id;
    let mut doctor = load_doctor(ctx, &did)?;
    patient.record.add_doctor(&did)?;
    doctor.record.add_patient(&pid)?;

    save_patient(ctx, &patient)?;
    save_doctor(ctx, &doctor)?;
    let own = ctx.own_partition();
    ctx.delete(&own, &access_request_key(&pid)?)?;
    tracing::info!(pid = %pid, did = %did, "granted data access");
    Ok(())
}

/// The calling patient removes a doctor's access.
///
/// The doctor leaves the patient's access list and, if the doctor is registered in the caller's
/// domain, the patient leaves the doctor's list. A doctor of the other domain keeps a stale entry
/// in their own list, but doctor reads require both sides of the link, so access ends either way.
///
/// # Errors
///
/// Returns `WorkflowError::NotFound` if the doctor does not currently have access.
pub fn revoke_access(ctx: &mut TxContext<'_>, doctor_id: &str) -> WorkflowResult<()> {
    let pid = ctx.caller().patient_id()?;
    let did = RecordId::parse_as(doctor_id, RecordKind::Doctor)?;

    let mut patient = load_patient(ctx, &pid)?;
    patient.record.remove_doctor(&did)?;
    save_patient(ctx, &patient)?;

    match find_doctor(ctx, &did)? {
        Some(mut doctor) => {
            doctor.record.remove_patient(&pid)?;
            save_doctor(ctx, &doctor)?;
        }
        None => {
            // Doctors admitted through a share agreement live in their own domain's partition.
            tracing::warn!(did = %did, "revoked doctor is not registered in this domain");
        }
    }

    tracing::info!(pid = %pid, did = %did, "revoked access");
    Ok(())
}

fn load_request(ctx: &mut TxContext<'_>, pid: &RecordId) -> WorkflowResult<DataAccessRequest> {
    let own = ctx.own_partition();
    ctx.get_json(&own, &access_request_key(pid)?)?
        .ok_or_else(|| WorkflowError::NotFound(format!("data access request for patient {pid}")))
}

fn store_request(ctx: &mut TxContext<'_>, request: &DataAccessRequest) -> WorkflowResult<()> {
    let own = ctx.own_partition();
    ctx.put_json(&own, &access_request_key(&request.patient_id)?, request)
}
