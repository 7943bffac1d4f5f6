//! Operation facade.
//!
//! [`RecordContract`] is what a node exposes to callers: one method per operation, each taking
//! the caller's [`IdentityClaims`] plus the operation's arguments. Every call runs in its own
//! transaction and is committed only if the operation succeeds. A
//! [`WorkflowError::StorageConflict`](crate::WorkflowError::StorageConflict) from the commit is
//! returned as-is for the external caller to resubmit.

use crate::config::CoreConfig;
use crate::context::TxContext;
use crate::identity::{required_attribute, IdentityClaims};
use crate::records::{
    DataAccessRequest, DoctorRecord, Listing, MedicalRecord, PatientRecord, PatientSummary,
    PersonalInfo, RequestAgreement,
};
use crate::signature::{KeyStore, SignatureService};
use crate::store::Ledger;
use crate::workflows::access::{self, AccessRequest};
use crate::workflows::consent::{self, AgreementRequest};
use crate::workflows::{queries, registration};
use crate::WorkflowResult;
use std::sync::Arc;

/// A node's entry point to the workflows, bound to its configuration and ledger.
#[derive(Debug)]
pub struct RecordContract<L> {
    config: Arc<CoreConfig>,
    ledger: Arc<L>,
}

impl<L> Clone for RecordContract<L> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            ledger: Arc::clone(&self.ledger),
        }
    }
}

impl<L: Ledger> RecordContract<L> {
    pub fn new(config: Arc<CoreConfig>, ledger: Arc<L>) -> Self {
        Self { config, ledger }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Runs `op` in a fresh transaction for `claims` and commits it if `op` succeeds.
    fn submit<T>(
        &self,
        claims: &dyn IdentityClaims,
        op: impl FnOnce(&mut TxContext<'_>) -> WorkflowResult<T>,
    ) -> WorkflowResult<T> {
        let mut ctx = TxContext::begin(&self.config, self.ledger.as_ref(), claims)?;
        let out = op(&mut ctx)?;
        ctx.commit()?;
        Ok(out)
    }

    // ========================================================================
    // IDENTITY
    // ========================================================================

    /// Value of one of the caller's identity attributes.
    pub fn get_identity_attribute(
        &self,
        claims: &dyn IdentityClaims,
        name: &str,
    ) -> WorkflowResult<String> {
        required_attribute(claims, name)
    }

    /// The caller's raw underlying identity string.
    pub fn get_invoked_client_identity(&self, claims: &dyn IdentityClaims) -> WorkflowResult<String> {
        claims.caller_underlying_id()
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    pub fn register_patient(
        &self,
        claims: &dyn IdentityClaims,
        info: PersonalInfo,
    ) -> WorkflowResult<PatientRecord> {
        self.submit(claims, |ctx| registration::register_patient(ctx, info))
    }

    pub fn register_doctor(
        &self,
        claims: &dyn IdentityClaims,
        info: PersonalInfo,
        specialization: &str,
    ) -> WorkflowResult<DoctorRecord> {
        self.submit(claims, |ctx| {
            registration::register_doctor(ctx, info, specialization)
        })
    }

    pub fn appoint_doctor(&self, claims: &dyn IdentityClaims, doctor_id: &str) -> WorkflowResult<()> {
        self.submit(claims, |ctx| registration::appoint_doctor(ctx, doctor_id))
    }

    pub fn add_medical_record(
        &self,
        claims: &dyn IdentityClaims,
        patient_id: &str,
        record: MedicalRecord,
    ) -> WorkflowResult<()> {
        self.submit(claims, |ctx| {
            registration::add_medical_record(ctx, patient_id, record)
        })
    }

    // ========================================================================
    // SHARE AGREEMENTS
    // ========================================================================

    pub fn create_request_agreement(
        &self,
        claims: &dyn IdentityClaims,
        request: AgreementRequest<'_>,
    ) -> WorkflowResult<RequestAgreement> {
        self.submit(claims, |ctx| consent::create_request_agreement(ctx, request))
    }

    pub fn read_request_agreement(
        &self,
        claims: &dyn IdentityClaims,
        patient_id: &str,
    ) -> WorkflowResult<RequestAgreement> {
        self.submit(claims, |ctx| consent::read_request_agreement(ctx, patient_id))
    }

    pub fn notify_request_agreement(
        &self,
        claims: &dyn IdentityClaims,
    ) -> WorkflowResult<RequestAgreement> {
        self.submit(claims, consent::notify_request_agreement)
    }

    /// Records a validity outcome computed by the caller.
    ///
    /// The outcome is trusted as supplied; see
    /// [`RecordContract::verify_and_validate_request_agreement`] for the variant that checks the
    /// signatures itself.
    pub fn validate_request_agreement(
        &self,
        claims: &dyn IdentityClaims,
        valid: bool,
    ) -> WorkflowResult<()> {
        self.submit(claims, |ctx| consent::validate_request_agreement(ctx, valid))
    }

    pub fn verify_and_validate_request_agreement<K: KeyStore>(
        &self,
        claims: &dyn IdentityClaims,
        signatures: &SignatureService<K>,
    ) -> WorkflowResult<bool> {
        self.submit(claims, |ctx| {
            consent::verify_and_validate_request_agreement(ctx, signatures)
        })
    }

    pub fn delete_request_agreement(
        &self,
        claims: &dyn IdentityClaims,
        patient_id: &str,
    ) -> WorkflowResult<()> {
        self.submit(claims, |ctx| consent::delete_request_agreement(ctx, patient_id))
    }

    pub fn share_asset_data(&self, claims: &dyn IdentityClaims) -> WorkflowResult<PatientRecord> {
        self.submit(claims, consent::share_asset_data)
    }

    // ========================================================================
    // ACCESS REQUESTS
    // ========================================================================

    pub fn create_data_access_request(
        &self,
        claims: &dyn IdentityClaims,
        request: AccessRequest<'_>,
    ) -> WorkflowResult<DataAccessRequest> {
        self.submit(claims, |ctx| access::create_data_access_request(ctx, request))
    }

    pub fn read_data_access_request(
        &self,
        claims: &dyn IdentityClaims,
        patient_id: &str,
    ) -> WorkflowResult<DataAccessRequest> {
        self.submit(claims, |ctx| access::read_data_access_request(ctx, patient_id))
    }

    pub fn notify_data_access_request(
        &self,
        claims: &dyn IdentityClaims,
    ) -> WorkflowResult<DataAccessRequest> {
        self.submit(claims, access::notify_data_access_request)
    }

    pub fn validate_data_access_request(
        &self,
        claims: &dyn IdentityClaims,
        valid: bool,
    ) -> WorkflowResult<()> {
        self.submit(claims, |ctx| access::validate_data_access_request(ctx, valid))
    }

    pub fn verify_and_validate_data_access_request<K: KeyStore>(
        &self,
        claims: &dyn IdentityClaims,
        signatures: &SignatureService<K>,
    ) -> WorkflowResult<bool> {
        self.submit(claims, |ctx| {
            access::verify_and_validate_data_access_request(ctx, signatures)
        })
    }

    pub fn delete_data_access_request(
        &self,
        claims: &dyn IdentityClaims,
        patient_id: &str,
    ) -> WorkflowResult<()> {
        self.submit(claims, |ctx| access::delete_data_access_request(ctx, patient_id))
    }

    pub fn grant_data_access(&self, claims: &dyn IdentityClaims) -> WorkflowResult<()> {
        self.submit(claims, access::grant_data_access)
    }

    pub fn revoke_access(&self, claims: &dyn IdentityClaims, doctor_id: &str) -> WorkflowResult<()> {
        self.submit(claims, |ctx| access::revoke_access(ctx, doctor_id))
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn get_patient_info(&self, claims: &dyn IdentityClaims) -> WorkflowResult<PatientRecord> {
        self.submit(claims, queries::get_patient_info)
    }

    pub fn get_doctor_info(
        &self,
        claims: &dyn IdentityClaims,
    ) -> WorkflowResult<Listing<DoctorRecord>> {
        self.submit(claims, queries::get_doctor_info)
    }

    pub fn get_medical_reports(
        &self,
        claims: &dyn IdentityClaims,
    ) -> WorkflowResult<Listing<MedicalRecord>> {
        self.submit(claims, queries::get_medical_reports)
    }

    pub fn read_patients_data(
        &self,
        claims: &dyn IdentityClaims,
    ) -> WorkflowResult<Listing<PatientSummary>> {
        self.submit(claims, queries::read_patients_data)
    }

    pub fn read_patient_data(
        &self,
        claims: &dyn IdentityClaims,
        patient_id: &str,
    ) -> WorkflowResult<PatientSummary> {
        self.submit(claims, |ctx| queries::read_patient_data(ctx, patient_id))
    }

    pub fn get_patient_data_org(
        &self,
        claims: &dyn IdentityClaims,
    ) -> WorkflowResult<Listing<PatientRecord>> {
        self.submit(claims, queries::get_patient_data_org)
    }

    pub fn get_patient_data(
        &self,
        claims: &dyn IdentityClaims,
    ) -> WorkflowResult<Listing<PatientRecord>> {
        self.submit(claims, queries::get_patient_data)
    }

    pub fn get_doctor_data_org(
        &self,
        claims: &dyn IdentityClaims,
    ) -> WorkflowResult<Listing<DoctorRecord>> {
        self.submit(claims, queries::get_doctor_data_org)
    }
}
