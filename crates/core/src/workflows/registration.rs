//! Registration and record maintenance.

use super::{find_patient, load_doctor, load_patient, save_doctor, save_patient, Located};
use crate::context::TxContext;
use crate::records::{
    DoctorRecord, MedicalRecord, PartitionMeta, PatientRecord, PersonalInfo, RecordId, RecordKind,
};
use crate::validation::{require_non_empty, validate_medical_record, validate_personal_info};
use crate::{WorkflowError, WorkflowResult};

/// Registers the calling patient in their domain's partition.
///
/// The caller's id becomes the record id and the caller's underlying identity its sole owner.
///
/// # Errors
///
/// Returns `WorkflowError::AlreadyExists` if the patient is already visible to the caller's
/// domain (in its own partition or the shared one), and `WorkflowError::InvalidInput` if `info`
/// is incomplete.
pub fn register_patient(
    ctx: &mut TxContext<'_>,
    info: PersonalInfo,
) -> WorkflowResult<PatientRecord> {
    let pid = ctx.caller().patient_id()?;
    validate_personal_info(&info)?;

    if let Some(existing) = find_patient(ctx, &pid)? {
        return Err(WorkflowError::AlreadyExists(format!(
            "patient {pid} in partition {}",
            existing.partition
        )));
    }

    let partition = ctx.own_partition();
    let record = PatientRecord {
        meta: PartitionMeta {
            collection_name: partition.to_string(),
        },
        pid,
        personal_info: info,
        medical_records: Vec::new(),
        treated_by: Vec::new(),
        owners: vec![ctx.caller().underlying_id.clone()],
    };

    ctx.put_json(&partition, record.pid.as_str(), &record)?;
    tracing::info!(pid = %record.pid, %partition, "registered patient");
    Ok(record)
}

/// Registers the calling doctor in their domain's partition.
///
/// The doctor's home id (HID) is the caller's underlying identity string.
pub fn register_doctor(
    ctx: &mut TxContext<'_>,
    info: PersonalInfo,
    specialization: &str,
) -> WorkflowResult<DoctorRecord> {
    let did = ctx.caller().doctor_id()?;
    validate_personal_info(&info)?;
    require_non_empty("specialization", specialization)?;

    let partition = ctx.own_partition();
    if ctx.exists(&partition, did.as_str())? {
        return Err(WorkflowError::AlreadyExists(format!(
            "doctor {did} in partition {partition}"
        )));
    }

    let record = DoctorRecord {
        meta: PartitionMeta {
            collection_name: partition.to_string(),
        },
        did,
        personal_info: info,
        specialization: specialization.to_owned(),
        hid: ctx.caller().underlying_id.clone(),
        pids: Vec::new(),
    };

    ctx.put_json(&partition, record.did.as_str(), &record)?;
    tracing::info!(did = %record.did, %partition, "registered doctor");
    Ok(record)
}

/// The calling patient appoints a doctor of their domain.
///
/// Adds the doctor to the patient's access list and the patient to the doctor's; both records
/// are written in the same transaction.
pub fn appoint_doctor(ctx: &mut TxContext<'_>, doctor_id: &str) -> WorkflowResult<()> {
    let pid = ctx.caller().patient_id()?;
    let did = RecordId::parse_as(doctor_id, RecordKind::Doctor)?;

    let mut patient = load_patient(ctx, &pid)?;
    let mut doctor = load_doctor(ctx, &did)?;

    patient.record.add_doctor(&did)?;
    doctor.record.add_patient(&pid)?;

    save_patient(ctx, &patient)?;
    save_doctor(ctx, &doctor)?;
    tracing::info!(pid = %pid, did = %did, "appointed doctor");
    Ok(())
}

/// The calling doctor adds a medical record to a patient they treat.
///
/// # Errors
///
/// Returns `WorkflowError::Unauthorized` unless the doctor is in the patient's access list and
/// the patient in the doctor's, and `WorkflowError::AlreadyExists` if the patient already has
/// a record of the same type.
pub fn add_medical_record(
    ctx: &mut TxContext<'_>,
    patient_id: &str,
    mut record: MedicalRecord,
) -> WorkflowResult<()> {
    let did = ctx.caller().doctor_id()?;
    let pid = RecordId::parse_as(patient_id, RecordKind::Patient)?;
    validate_medical_record(&record)?;

    let doctor = load_doctor(ctx, &did)?;
    let mut patient: Located<PatientRecord> = load_patient(ctx, &pid)?;

    if !patient.record.is_treated_by(&did) || !doctor.record.has_patient(&pid) {
        return Err(WorkflowError::Unauthorized(format!(
            "doctor {did} does not have access to patient {pid}"
        )));
    }

    record.issued_by = did.to_string();
    record.owner = pid.to_string();
    let report_type = record.report_type.clone();
    patient.record.add_medical_record(record)?;

    save_patient(ctx, &patient)?;
    tracing::info!(pid = %pid, did = %did, report_type = %report_type, "added medical record");
    Ok(())
}
