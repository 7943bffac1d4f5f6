//! Cross-domain share agreements.
//!
//! A doctor from another domain asks for a patient's record by creating a [`RequestAgreement`]
//! in the shared partition, signed by the doctor and by the doctor's domain custodian. The
//! patient validates it, then consumes it with [`share_asset_data`], which relocates the record
//! into the shared partition and deletes the agreement.
//!
//! ```text
//! NONE --create--> PENDING --validate--> VALIDATED(true)  --share--> CONSUMED (deleted)
//!                                    \-> VALIDATED(false) (blocked; may be re-validated)
//! ```

use super::{
    agreement_key, find_doctor, find_patient, load_doctor, require_withdrawal_party, save_doctor,
};
use crate::context::TxContext;
use crate::records::{
    ConsentMetadata, DigitalSignatures, PatientRecord, RecordId, RecordKind, RequestAgreement,
};
use crate::signature::{KeyStore, SignatureService};
use crate::validation::require_non_empty;
use crate::{WorkflowError, WorkflowResult};

/// Arguments of [`create_request_agreement`], as supplied by the requesting doctor.
#[derive(Clone, Debug)]
pub struct AgreementRequest<'r> {
    pub patient_id: &'r str,
    pub client_sign: &'r str,
    pub org_sign: &'r str,
    pub user: &'r str,
    pub org: &'r str,
}

/// The calling doctor requests a patient record held by another domain.
///
/// Stores an unvalidated agreement in the shared partition, keyed by patient id, and adds the
/// patient to the doctor's own patient list in the same transaction. A list entry left over from
/// an agreement the patient withdrew is kept as is.
///
/// # Errors
///
/// - `WorkflowError::AlreadyExists` if an agreement for the patient is already live, or the
///   patient's record is already visible to the doctor's domain.
/// - `WorkflowError::InvalidInput` if a signature, the user or the org is empty.
pub fn create_request_agreement(
    ctx: &mut TxContext<'_>,
    request: AgreementRequest<'_>,
) -> WorkflowResult<RequestAgreement> {
    let did = ctx.caller().doctor_id()?;
    let pid = RecordId::parse_as(request.patient_id, RecordKind::Patient)?;
    require_non_empty("clientSign", request.client_sign)?;
    require_non_empty("orgSign", request.org_sign)?;
    require_non_empty("user", request.user)?;
    require_non_empty("org", request.org)?;

    let shared = ctx.shared_partition();
    let key = agreement_key(&pid)?;
    if ctx.exists(&shared, &key)? {
        return Err(WorkflowError::AlreadyExists(format!(
            "request agreement for patient {pid}"
        )));
    }

    if let Some(visible) = find_patient(ctx, &pid)? {
        return Err(WorkflowError::AlreadyExists(format!(
            "patient {pid} record in partition {}",
            visible.partition
        )));
    }

    let mut doctor = load_doctor(ctx, &did)?;
    if doctor.record.has_patient(&pid) {
        tracing::debug!(pid = %pid, did = %did, "patient already listed by requesting doctor");
    } else {
        doctor.record.add_patient(&pid)?;
        save_doctor(ctx, &doctor)?;
    }

    let agreement = RequestAgreement {
        meta_data: ConsentMetadata {
            org: request.org.to_owned(),
            user: request.user.to_owned(),
            id: did,
        },
        pid,
        hid: ctx.caller().underlying_id.clone(),
        digital_signatures: DigitalSignatures {
            client_sign: request.client_sign.to_owned(),
            org_sign: request.org_sign.to_owned(),
        },
        valid: false,
    };

    ctx.put_json(&shared, &key, &agreement)?;
    tracing::info!(pid = %agreement.pid, did = %agreement.meta_data.id, "created request agreement");
    Ok(agreement)
}

/// Reads the live agreement for a patient.
pub fn read_request_agreement(
    ctx: &mut TxContext<'_>,
    patient_id: &str,
) -> WorkflowResult<RequestAgreement> {
    let pid = RecordId::parse_as(patient_id, RecordKind::Patient)?;
    load_agreement(ctx, &pid)
}

/// The calling patient looks up the agreement that targets their own record.
pub fn notify_request_agreement(ctx: &mut TxContext<'_>) -> WorkflowResult<RequestAgreement> {
    let pid = ctx.caller().patient_id()?;
    load_agreement(ctx, &pid)
}

/// The calling patient records the outcome of checking their agreement's signatures.
///
/// The outcome is taken as supplied; [`verify_and_validate_request_agreement`] computes it
/// instead.
pub fn validate_request_agreement(ctx: &mut TxContext<'_>, valid: bool) -> WorkflowResult<()> {
    let pid = ctx.caller().patient_id()?;
    let mut agreement = load_agreement(ctx, &pid)?;
    agreement.valid = valid;
    store_agreement(ctx, &agreement)?;
    tracing::info!(pid = %pid, valid, "validated request agreement");
    Ok(())
}

/// The calling patient verifies both agreement signatures and records the result.
///
/// # Returns
///
/// The recorded validity: true only if the requester and custodian signatures both verify.
pub fn verify_and_validate_request_agreement<K: KeyStore>(
    ctx: &mut TxContext<'_>,
    signatures: &SignatureService<K>,
) -> WorkflowResult<bool> {
    let pid = ctx.caller().patient_id()?;
    let mut agreement = load_agreement(ctx, &pid)?;
    agreement.valid = signatures.verify_agreement(&agreement)?;
    store_agreement(ctx, &agreement)?;
    tracing::info!(pid = %pid, valid = agreement.valid, "verified request agreement");
    Ok(agreement.valid)
}

/// Withdraws a live agreement. Allowed for the target patient and the requesting doctor.
///
/// The patient also leaves the requesting doctor's list when that doctor is registered in the
/// caller's domain; otherwise the entry stays until the doctor requests again.
pub fn delete_request_agreement(ctx: &mut TxContext<'_>, patient_id: &str) -> WorkflowResult<()> {
    let pid = RecordId::parse_as(patient_id, RecordKind::Patient)?;
    let agreement = load_agreement(ctx, &pid)?;
    let did = agreement.meta_data.id;
    require_withdrawal_party(ctx.caller(), &pid, &did)?;

    let shared = ctx.shared_partition();
    ctx.delete(&shared, &agreement_key(&pid)?)?;

    match find_doctor(ctx, &did)? {
        Some(mut doctor) if doctor.record.has_patient(&pid) => {
            doctor.record.remove_patient(&pid)?;
            save_doctor(ctx, &doctor)?;
        }
        Some(_) => {}
        None => tracing::debug!(did = %did, "requesting doctor is not registered in this domain"),
    }

    tracing::info!(pid = %pid, did = %did, "deleted request agreement");
    Ok(())
}

/// The calling patient consumes a validated agreement and shares their record.
///
/// The record gains the requester's HID as an owner and the requesting doctor in its access
/// list, moves from the patient's partition to the shared partition, and the agreement is
/// deleted. All of it commits together or not at all.
///
/// # Errors
///
/// - `WorkflowError::NotFound` if there is no agreement, or the record is not in the caller's
///   own partition.
/// - `WorkflowError::NotOwner` if the caller does not own the record.
/// - `WorkflowError::Consent` if the agreement carries no HID or is not validated true.
pub fn share_asset_data(ctx: &mut TxContext<'_>) -> WorkflowResult<PatientRecord> {
    let pid = ctx.caller().patient_id()?;
    let agreement = load_agreement(ctx, &pid)?;

    let own = ctx.own_partition();
    let mut record: PatientRecord = ctx.get_json(&own, pid.as_str())?.ok_or_else(|| {
        WorkflowError::NotFound(format!("patient {pid} in partition {own}"))
    })?;

    if !record.is_owner(&ctx.caller().underlying_id) {
        return Err(WorkflowError::NotOwner(pid.to_string()));
    }
    if agreement.hid.is_empty() {
        return Err(WorkflowError::Consent(format!(
            "request agreement for patient {pid} has no HID"
        )));
    }
    if !agreement.valid {
        return Err(WorkflowError::Consent(format!(
            "request agreement for patient {pid} has not been validated"
        )));
    }

    let shared = ctx.shared_partition();
    record.add_owner(&agreement.hid);
    record.add_doctor(&agreement.meta_data.id)?;
    record.meta.collection_name = shared.to_string();

    ctx.put_json(&shared, pid.as_str(), &record)?;
    ctx.delete(&own, pid.as_str())?;
    ctx.delete(&shared, &agreement_key(&pid)?)?;
    tracing::info!(pid = %pid, from = %own, to = %shared, "shared patient record");
    Ok(record)
}

fn load_agreement(ctx: &mut TxContext<'_>, pid: &RecordId) -> WorkflowResult<RequestAgreement> {
    let shared = ctx.shared_partition();
    ctx.get_json(&shared, &agreement_key(pid)?)?
        .ok_or_else(|| WorkflowError::NotFound(format!("request agreement for patient {pid}")))
}

fn store_agreement(ctx: &mut TxContext<'_>, agreement: &RequestAgreement) -> WorkflowResult<()> {
    let shared = ctx.shared_partition();
    ctx.put_json(&shared, &agreement_key(&agreement.pid)?, agreement)
}
