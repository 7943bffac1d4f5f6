//! Record model.
//!
//! These are the entities persisted in ledger partitions and the consent objects that govern
//! them. Field names on the wire are fixed because independent client tooling reads and signs
//! them; see each type's serde attributes.

use crate::{WorkflowError, WorkflowResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// RECORD IDS
// ============================================================================

/// The entity kind a record id refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Patient,
    Doctor,
}

impl RecordKind {
    /// Trailing character that marks ids of this kind.
    pub fn suffix(&self) -> char {
        match self {
            RecordKind::Patient => 'P',
            RecordKind::Doctor => 'D',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Patient => "patient",
            RecordKind::Doctor => "doctor",
        }
    }

    fn from_suffix(c: char) -> Option<Self> {
        match c {
            'P' => Some(RecordKind::Patient),
            'D' => Some(RecordKind::Doctor),
            _ => None,
        }
    }
}

/// Opaque record id with its entity kind.
///
/// Ids arrive from identity attributes and client input as strings whose last character is the
/// kind (`"1P"`, `"4D"`). They are stored and serialized exactly as received.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    kind: RecordKind,
    raw: String,
}

impl RecordId {
    /// Parses an id of any kind.
    pub fn parse(raw: &str) -> WorkflowResult<Self> {
        if raw.len() < 2 || raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(WorkflowError::InvalidInput(format!(
                "{raw:?} is not a valid record id"
            )));
        }

        let kind = raw
            .chars()
            .last()
            .and_then(RecordKind::from_suffix)
            .ok_or_else(|| {
                WorkflowError::InvalidInput(format!("record id {raw:?} has no kind suffix"))
            })?;

        Ok(Self {
            kind,
            raw: raw.to_owned(),
        })
    }

    /// Parses an id and checks it refers to the expected kind of entity.
    pub fn parse_as(raw: &str, expected: RecordKind) -> WorkflowResult<Self> {
        let id = Self::parse(raw).map_err(|_| WorkflowError::WrongIdKind {
            id: raw.to_owned(),
            expected: expected.as_str(),
        })?;
        id.expect_kind(expected)?;
        Ok(id)
    }

    pub fn expect_kind(&self, expected: RecordKind) -> WorkflowResult<()> {
        if self.kind != expected {
            return Err(WorkflowError::WrongIdKind {
                id: self.raw.clone(),
                expected: expected.as_str(),
            });
        }
        Ok(())
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for RecordId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RecordId::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// ENTITIES
// ============================================================================

/// Personal details shared by patients and doctors.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalInfo {
    pub first_name: String,
    pub last_name: String,
    pub age: i32,
    pub gender: String,
    pub email: String,
    pub contact_number: String,
    pub city: String,
    pub state: String,
    pub country: String,
    /// Free-form role tag supplied by the registrant.
    #[serde(rename = "type")]
    pub role_tag: String,
}

impl PersonalInfo {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Date {
    pub day: i32,
    pub month: i32,
    pub year: i32,
}

/// One report in a patient's record. Unique per patient by `report_type`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecord {
    #[serde(rename = "type")]
    pub report_type: String,
    pub m_report: BTreeMap<String, String>,
    pub date_of_issue: Date,
    /// Owning patient id, stamped when the record is added.
    #[serde(default)]
    pub owner: String,
    /// Issuing doctor id, stamped when the record is added.
    #[serde(default)]
    pub issued_by: String,
}

/// Label of the partition a record currently lives in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionMeta {
    pub collection_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub meta: PartitionMeta,
    pub pid: RecordId,
    pub personal_info: PersonalInfo,
    #[serde(default)]
    pub medical_records: Vec<MedicalRecord>,
    /// Doctors with active access.
    #[serde(default, rename = "doctorInfo")]
    pub treated_by: Vec<RecordId>,
    /// Underlying identity strings of the record's owners.
    #[serde(default)]
    pub owners: Vec<String>,
}

impl PatientRecord {
    pub fn is_owner(&self, underlying_id: &str) -> bool {
        self.owners.iter().any(|o| o == underlying_id)
    }

    /// Adds an owner if not already present.
    pub fn add_owner(&mut self, underlying_id: &str) {
        if !self.is_owner(underlying_id) {
            self.owners.push(underlying_id.to_owned());
        }
    }

    pub fn is_treated_by(&self, doctor: &RecordId) -> bool {
        self.treated_by.contains(doctor)
    }

    pub fn add_doctor(&mut self, doctor: &RecordId) -> WorkflowResult<()> {
        if self.is_treated_by(doctor) {
            return Err(WorkflowError::AlreadyExists(format!(
                "doctor {doctor} for patient {}",
                self.pid
            )));
        }
        self.treated_by.push(doctor.clone());
        Ok(())
    }

    pub fn remove_doctor(&mut self, doctor: &RecordId) -> WorkflowResult<()> {
        let before = self.treated_by.len();
        self.treated_by.retain(|d| d != doctor);
        if self.treated_by.len() == before {
            return Err(WorkflowError::NotFound(format!(
                "doctor {doctor} in access list of patient {}",
                self.pid
            )));
        }
        Ok(())
    }

    pub fn has_medical_record(&self, report_type: &str) -> bool {
        self.medical_records
            .iter()
            .any(|r| r.report_type == report_type)
    }

    pub fn add_medical_record(&mut self, record: MedicalRecord) -> WorkflowResult<()> {
        if self.has_medical_record(&record.report_type) {
            return Err(WorkflowError::AlreadyExists(format!(
                "medical record of type {:?} for patient {}",
                record.report_type, self.pid
            )));
        }
        self.medical_records.push(record);
        Ok(())
    }

    pub fn summary(&self) -> PatientSummary {
        PatientSummary {
            pid: self.pid.clone(),
            personal_info: self.personal_info.clone(),
            medical_records: self.medical_records.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorRecord {
    pub meta: PartitionMeta,
    pub did: RecordId,
    pub personal_info: PersonalInfo,
    pub specialization: String,
    /// Underlying identity string of the doctor, used as the home id in share agreements.
    pub hid: String,
    #[serde(default)]
    pub pids: Vec<RecordId>,
}

impl DoctorRecord {
    pub fn has_patient(&self, patient: &RecordId) -> bool {
        self.pids.contains(patient)
    }

    pub fn add_patient(&mut self, patient: &RecordId) -> WorkflowResult<()> {
        if self.has_patient(patient) {
            return Err(WorkflowError::AlreadyHasAccess {
                doctor: self.did.to_string(),
                patient: patient.to_string(),
            });
        }
        self.pids.push(patient.clone());
        Ok(())
    }

    pub fn remove_patient(&mut self, patient: &RecordId) -> WorkflowResult<()> {
        let before = self.pids.len();
        self.pids.retain(|p| p != patient);
        if self.pids.len() == before {
            return Err(WorkflowError::NotFound(format!(
                "patient {patient} in access list of doctor {}",
                self.did
            )));
        }
        Ok(())
    }
}

// ============================================================================
// CONSENT OBJECTS
// ============================================================================

/// Who created a consent object. Stored exactly as supplied, never normalised.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentMetadata {
    /// Domain of the requesting user.
    pub org: String,
    /// User label of the requester within `org`.
    pub user: String,
    /// Business id of the requesting doctor.
    pub id: RecordId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitalSignatures {
    /// Requester signature over the canonical payload.
    pub client_sign: String,
    /// Custodian signature over the same payload.
    pub org_sign: String,
}

/// Cross-domain share consent, stored in the shared partition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAgreement {
    pub meta_data: ConsentMetadata,
    pub pid: RecordId,
    pub hid: String,
    pub digital_signatures: DigitalSignatures,
    pub valid: bool,
}

/// In-domain access consent, stored in the requester's private partition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAccessRequest {
    pub meta_data: ConsentMetadata,
    pub patient_id: RecordId,
    pub client_sign: String,
    pub valid: bool,
}

// ============================================================================
// LISTINGS
// ============================================================================

/// Wrapper for read-only collection results.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing<T> {
    pub data: Vec<T>,
}

impl<T> From<Vec<T>> for Listing<T> {
    fn from(data: Vec<T>) -> Self {
        Self { data }
    }
}

/// The part of a patient record a treating doctor may read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub pid: RecordId,
    pub personal_info: PersonalInfo,
    pub medical_records: Vec<MedicalRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient() -> PatientRecord {
        PatientRecord {
            meta: PartitionMeta {
                collection_name: "Org1MSPPrivateCollection".into(),
            },
            pid: RecordId::parse("1P").unwrap(),
            personal_info: PersonalInfo::default(),
            medical_records: Vec::new(),
            treated_by: Vec::new(),
            owners: vec!["x509::CN=1P,O=Org1MSP".into()],
        }
    }

    #[test]
    fn test_record_id_kind_comes_from_suffix() {
        assert_eq!(RecordId::parse("1P").unwrap().kind(), RecordKind::Patient);
        assert_eq!(
            RecordId::parse("c0ffee-4D").unwrap().kind(),
            RecordKind::Doctor
        );
        assert!(RecordId::parse("1X").is_err());
        assert!(RecordId::parse("P").is_err());
        assert!(RecordId::parse("1 P").is_err());
    }

    #[test]
    fn test_parse_as_rejects_wrong_kind() {
        let err = RecordId::parse_as("1D", RecordKind::Patient).unwrap_err();
        assert!(matches!(err, WorkflowError::WrongIdKind { expected: "patient", .. }));
    }

    #[test]
    fn test_patient_record_wire_names() {
        let value = serde_json::to_value(patient()).unwrap();
        let obj = value.as_object().unwrap();
        for key in [
            "meta",
            "pid",
            "personalInfo",
            "medicalRecords",
            "doctorInfo",
            "owners",
        ] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(value["meta"]["collectionName"], "Org1MSPPrivateCollection");
        assert_eq!(value["pid"], "1P");
        assert!(value["personalInfo"].get("type").is_some());
        assert!(value["personalInfo"].get("contactNumber").is_some());
    }

    #[test]
    fn test_consent_wire_names() {
        let agreement = RequestAgreement {
            meta_data: ConsentMetadata {
                org: "Org2MSP".into(),
                user: "User1".into(),
                id: RecordId::parse("2D").unwrap(),
            },
            pid: RecordId::parse("1P").unwrap(),
            hid: "x509::CN=2D,O=Org2MSP".into(),
            digital_signatures: DigitalSignatures {
                client_sign: "a".into(),
                org_sign: "b".into(),
            },
            valid: false,
        };
        let value = serde_json::to_value(&agreement).unwrap();
        assert_eq!(value["metaData"]["org"], "Org2MSP");
        assert_eq!(value["digitalSignatures"]["clientSign"], "a");
        assert_eq!(value["digitalSignatures"]["orgSign"], "b");

        let request = DataAccessRequest {
            meta_data: agreement.meta_data.clone(),
            patient_id: agreement.pid.clone(),
            client_sign: "c".into(),
            valid: true,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["meta_data"]["id"], "2D");
        assert_eq!(value["patient_id"], "1P");
        assert_eq!(value["client_sign"], "c");
    }

    #[test]
    fn test_doctor_access_lists_stay_unique() {
        let mut record = patient();
        let doctor = RecordId::parse("1D").unwrap();

        record.add_doctor(&doctor).unwrap();
        assert!(record.add_doctor(&doctor).is_err());
        record.remove_doctor(&doctor).unwrap();
        assert!(matches!(
            record.remove_doctor(&doctor),
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[test]
    fn test_medical_records_unique_by_type() {
        let mut record = patient();
        let report = MedicalRecord {
            report_type: "blood".into(),
            ..MedicalRecord::default()
        };
        record.add_medical_record(report.clone()).unwrap();
        assert!(matches!(
            record.add_medical_record(report),
            Err(WorkflowError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_listing_wraps_data() {
        let listing: Listing<u8> = vec![1, 2].into();
        assert_eq!(
            serde_json::to_string(&listing).unwrap(),
            r#"{"data":[1,2]}"#
        );
    }
}
