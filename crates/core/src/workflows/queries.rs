//! Read-only lookups and listings.
//!
//! Empty listings are returned as `data: []`; only a missing subject record is `NotFound`.

use super::{find_doctor, find_patient, load_doctor, load_patient};
use crate::context::TxContext;
use crate::identity::Role;
use crate::records::{
    DoctorRecord, Listing, MedicalRecord, PatientRecord, PatientSummary, RecordId, RecordKind,
};
use crate::store::PartitionKey;
use crate::{WorkflowError, WorkflowResult};

// ============================================================================
// PATIENT VIEWS
// ============================================================================

/// The calling patient's own record, wherever it currently lives.
pub fn get_patient_info(ctx: &mut TxContext<'_>) -> WorkflowResult<PatientRecord> {
    let pid = ctx.caller().patient_id()?;
    Ok(load_patient(ctx, &pid)?.record)
}

/// Records of the doctors in the calling patient's access list.
///
/// Doctors registered in another domain are not readable from this node and are left out.
pub fn get_doctor_info(ctx: &mut TxContext<'_>) -> WorkflowResult<Listing<DoctorRecord>> {
    let pid = ctx.caller().patient_id()?;
    let patient = load_patient(ctx, &pid)?;

    let mut doctors = Vec::with_capacity(patient.record.treated_by.len());
    for did in &patient.record.treated_by {
        match find_doctor(ctx, did)? {
            Some(doctor) => doctors.push(doctor.record),
            None => tracing::debug!(did = %did, "doctor not visible from this domain"),
        }
    }
    Ok(doctors.into())
}

pub fn get_medical_reports(ctx: &mut TxContext<'_>) -> WorkflowResult<Listing<MedicalRecord>> {
    let pid = ctx.caller().patient_id()?;
    Ok(load_patient(ctx, &pid)?.record.medical_records.into())
}

// ============================================================================
// DOCTOR VIEWS
// ============================================================================

/// Summaries of every patient in the calling doctor's list that this domain can read.
///
/// A patient is listed only while their record still names the doctor, so a revocation made
/// from the patient's domain takes effect even though the doctor's own list is out of reach.
pub fn read_patients_data(ctx: &mut TxContext<'_>) -> WorkflowResult<Listing<PatientSummary>> {
    let did = ctx.caller().doctor_id()?;
    let doctor = load_doctor(ctx, &did)?;

    let mut summaries = Vec::with_capacity(doctor.record.pids.len());
    for pid in &doctor.record.pids {
        match find_patient(ctx, pid)? {
            Some(patient) if patient.record.is_treated_by(&did) => {
                summaries.push(patient.record.summary())
            }
            Some(_) => tracing::debug!(pid = %pid, did = %did, "access revoked by patient"),
            None => tracing::debug!(pid = %pid, "patient not visible from this domain"),
        }
    }
    Ok(summaries.into())
}

/// Summary of one patient, if the calling doctor has access to them.
///
/// # Errors
///
/// Returns `WorkflowError::Unauthorized` unless the patient is in the doctor's list and the
/// doctor is in the patient's.
pub fn read_patient_data(
    ctx: &mut TxContext<'_>,
    patient_id: &str,
) -> WorkflowResult<PatientSummary> {
    let did = ctx.caller().doctor_id()?;
    let pid = RecordId::parse_as(patient_id, RecordKind::Patient)?;

    let doctor = load_doctor(ctx, &did)?;
    let no_access = || {
        WorkflowError::Unauthorized(format!("doctor {did} does not have access to patient {pid}"))
    };
    if !doctor.record.has_patient(&pid) {
        return Err(no_access());
    }

    let patient = load_patient(ctx, &pid)?;
    if !patient.record.is_treated_by(&did) {
        return Err(no_access());
    }
    Ok(patient.record.summary())
}

// ============================================================================
// CUSTODIAN SCANS
// ============================================================================

/// Every patient record in the calling admin's private partition.
pub fn get_patient_data_org(ctx: &mut TxContext<'_>) -> WorkflowResult<Listing<PatientRecord>> {
    ctx.caller().require_role(Role::Admin)?;
    let own = ctx.own_partition();
    scan_kind(ctx, &own, RecordKind::Patient)
}

/// Every patient record relocated to the shared partition.
pub fn get_patient_data(ctx: &mut TxContext<'_>) -> WorkflowResult<Listing<PatientRecord>> {
    ctx.caller().require_role(Role::Admin)?;
    let shared = ctx.shared_partition();
    scan_kind(ctx, &shared, RecordKind::Patient)
}

/// Every doctor record in the calling admin's private partition.
pub fn get_doctor_data_org(ctx: &mut TxContext<'_>) -> WorkflowResult<Listing<DoctorRecord>> {
    ctx.caller().require_role(Role::Admin)?;
    let own = ctx.own_partition();
    scan_kind(ctx, &own, RecordKind::Doctor)
}

fn scan_kind<T: serde::de::DeserializeOwned>(
    ctx: &mut TxContext<'_>,
    partition: &PartitionKey,
    kind: RecordKind,
) -> WorkflowResult<Listing<T>> {
    let records = ctx.scan_json(partition, |key| {
        RecordId::parse(key).is_ok_and(|id| id.kind() == kind)
    })?;
    tracing::debug!(%partition, kind = kind.as_str(), count = records.len(), "scanned records");
    Ok(records.into())
}
