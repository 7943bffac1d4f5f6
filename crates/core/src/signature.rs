//! Consent signatures.
//!
//! Consent objects are signed over a canonical payload: the compact JSON serialization of their
//! business fields in declaration order, without signatures or the validity flag. Signer and
//! verifier build the payload from the same structs, so identical logical fields always produce
//! identical bytes.
//!
//! ## Scheme
//!
//! - digest: SHA-256 of the payload bytes
//! - signature: ECDSA P-256 over the digest, ASN.1 DER encoded, then base64 (standard alphabet)
//! - keys: each `(user, domain)` identity has a PKCS#8 private key and an X.509 certificate,
//!   supplied through a [`KeyStore`]
//!
//! Verification never errors on a signature that is merely wrong. It errors only when the
//! signature text is not base64 or the signer's key material is missing or unparseable.

use crate::constants::CUSTODIAN_USER;
use crate::records::{
    ConsentMetadata, DataAccessRequest, DigitalSignatures, RecordId, RequestAgreement,
};
use crate::{WorkflowError, WorkflowResult};
use base64::{engine::general_purpose, Engine as _};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use x509_parser::prelude::*;

// ============================================================================
// SIGNER IDENTITIES AND KEY MATERIAL
// ============================================================================

/// A signing identity: a user label within a domain.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SignerIdentity {
    pub user: String,
    pub domain: String,
}

impl SignerIdentity {
    pub fn new(user: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            domain: domain.into(),
        }
    }

    /// The identity that countersigns share agreements on behalf of `domain`.
    pub fn custodian(domain: impl Into<String>) -> Self {
        Self::new(CUSTODIAN_USER, domain)
    }
}

impl fmt::Display for SignerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.domain)
    }
}

/// Source of enrolled key material.
pub trait KeyStore {
    /// PKCS#8 PEM private key of `signer`, if held.
    fn private_key_pem(&self, signer: &SignerIdentity) -> WorkflowResult<Option<String>>;

    /// X.509 certificate of `signer` (PEM, or DER bytes), if held.
    fn certificate(&self, signer: &SignerIdentity) -> WorkflowResult<Option<Vec<u8>>>;
}

#[derive(Clone, Debug, Default)]
struct WalletEntry {
    certificate: Option<Vec<u8>>,
    private_key_pem: Option<String>,
}

/// In-process [`KeyStore`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryWallet {
    entries: HashMap<SignerIdentity, WalletEntry>,
}

impl InMemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a full enrolment: certificate and private key.
    pub fn insert(
        &mut self,
        signer: SignerIdentity,
        certificate_pem: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) {
        let entry = self.entries.entry(signer).or_default();
        entry.certificate = Some(certificate_pem.into().into_bytes());
        entry.private_key_pem = Some(private_key_pem.into());
    }

    /// Stores only a certificate, enough to verify but not to sign.
    pub fn insert_certificate(&mut self, signer: SignerIdentity, certificate: impl Into<Vec<u8>>) {
        self.entries.entry(signer).or_default().certificate = Some(certificate.into());
    }

    pub fn contains(&self, signer: &SignerIdentity) -> bool {
        self.entries.contains_key(signer)
    }
}

impl KeyStore for InMemoryWallet {
    fn private_key_pem(&self, signer: &SignerIdentity) -> WorkflowResult<Option<String>> {
        Ok(self
            .entries
            .get(signer)
            .and_then(|e| e.private_key_pem.clone()))
    }

    fn certificate(&self, signer: &SignerIdentity) -> WorkflowResult<Option<Vec<u8>>> {
        Ok(self.entries.get(signer).and_then(|e| e.certificate.clone()))
    }
}

// ============================================================================
// CANONICAL PAYLOADS
// ============================================================================

/// Signed fields of a share agreement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementTerms {
    pub meta_data: ConsentMetadata,
    pub pid: RecordId,
    pub hid: String,
}

impl AgreementTerms {
    /// Requester identity named by the terms.
    pub fn requester(&self) -> SignerIdentity {
        SignerIdentity::new(&self.meta_data.user, &self.meta_data.org)
    }

    /// Custodian identity of the requester's domain.
    pub fn custodian(&self) -> SignerIdentity {
        SignerIdentity::custodian(&self.meta_data.org)
    }

    pub fn canonical_payload(&self) -> WorkflowResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(WorkflowError::Serialization)
    }
}

/// Signed fields of a data access request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AccessTerms {
    pub meta_data: ConsentMetadata,
    pub patient_id: RecordId,
}

impl AccessTerms {
    pub fn requester(&self) -> SignerIdentity {
        SignerIdentity::new(&self.meta_data.user, &self.meta_data.org)
    }

    pub fn canonical_payload(&self) -> WorkflowResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(WorkflowError::Serialization)
    }
}

impl RequestAgreement {
    pub fn terms(&self) -> AgreementTerms {
        AgreementTerms {
            meta_data: self.meta_data.clone(),
            pid: self.pid.clone(),
            hid: self.hid.clone(),
        }
    }
}

impl DataAccessRequest {
    pub fn terms(&self) -> AccessTerms {
        AccessTerms {
            meta_data: self.meta_data.clone(),
            patient_id: self.patient_id.clone(),
        }
    }
}

// ============================================================================
// SIGNING AND VERIFICATION
// ============================================================================

/// Signs and verifies canonical payloads with key material from a [`KeyStore`].
#[derive(Clone, Debug)]
pub struct SignatureService<K> {
    keys: K,
}

impl<K: KeyStore> SignatureService<K> {
    pub fn new(keys: K) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &K {
        &self.keys
    }

    /// Signs `payload` as `signer`.
    ///
    /// # Returns
    ///
    /// Base64 text of the DER-encoded ECDSA signature over SHA-256(`payload`).
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `WorkflowError::MissingKeyMaterial` if no private key is held for `signer`,
    /// - `WorkflowError::EcdsaPrivateKeyParse` if the key is not a PKCS#8 P-256 key,
    /// - `WorkflowError::CertificatePublicKeyMismatch` if the held certificate belongs to a
    ///   different key.
    pub fn sign(&self, signer: &SignerIdentity, payload: &[u8]) -> WorkflowResult<String> {
        let key_pem = self
            .keys
            .private_key_pem(signer)?
            .ok_or_else(|| WorkflowError::MissingKeyMaterial(format!("private key of {signer}")))?;
        let signing_key = SigningKey::from_pkcs8_pem(&key_pem)
            .map_err(|e| WorkflowError::EcdsaPrivateKeyParse(Box::new(e)))?;

        if let Some(cert_bytes) = self.keys.certificate(signer)? {
            let public_key_bytes = signing_key
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec();
            if extract_cert_public_key_sec1(&cert_bytes)? != public_key_bytes {
                return Err(WorkflowError::CertificatePublicKeyMismatch);
            }
        }

        let digest = Sha256::digest(payload);
        let signature: Signature = signing_key
            .sign_prehash(&digest)
            .map_err(|e| WorkflowError::EcdsaSign(Box::new(e)))?;

        Ok(general_purpose::STANDARD.encode(signature.to_der().as_bytes()))
    }

    /// Verifies `signature_text` over `payload` against `signer`'s enrolled certificate.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::SignatureEncoding` for text that is not base64, and
    /// `WorkflowError::MissingKeyMaterial` / `WorkflowError::EcdsaPublicKeyParse` when the
    /// signer's certificate is absent or unusable. A well-formed but wrong signature is
    /// `Ok(false)`.
    pub fn verify(
        &self,
        signer: &SignerIdentity,
        payload: &[u8],
        signature_text: &str,
    ) -> WorkflowResult<bool> {
        let der = general_purpose::STANDARD
            .decode(signature_text.trim())
            .map_err(WorkflowError::SignatureEncoding)?;

        let cert_bytes = self
            .keys
            .certificate(signer)?
            .ok_or_else(|| WorkflowError::MissingKeyMaterial(format!("certificate of {signer}")))?;
        let verifying_key = verifying_key_from_certificate(&cert_bytes)?;

        let signature = match Signature::from_der(&der) {
            Ok(s) => s,
            Err(_) => return Ok(false),
        };

        let digest = Sha256::digest(payload);
        let ok = verifying_key.verify_prehash(&digest, &signature).is_ok();
        tracing::debug!(signer = %signer, ok, "verified consent signature");
        Ok(ok)
    }

    /// Signs agreement terms as both the requester and the requester domain's custodian.
    pub fn sign_agreement(&self, terms: &AgreementTerms) -> WorkflowResult<DigitalSignatures> {
        let payload = terms.canonical_payload()?;
        Ok(DigitalSignatures {
            client_sign: self.sign(&terms.requester(), &payload)?,
            org_sign: self.sign(&terms.custodian(), &payload)?,
        })
    }

    /// Dual-signature check of a share agreement: requester AND custodian must verify.
    pub fn verify_agreement(&self, agreement: &RequestAgreement) -> WorkflowResult<bool> {
        let terms = agreement.terms();
        let payload = terms.canonical_payload()?;
        let signatures = &agreement.digital_signatures;

        let requester_ok = self.verify(&terms.requester(), &payload, &signatures.client_sign)?;
        let custodian_ok = self.verify(&terms.custodian(), &payload, &signatures.org_sign)?;
        Ok(requester_ok && custodian_ok)
    }

    pub fn sign_access(&self, terms: &AccessTerms) -> WorkflowResult<String> {
        self.sign(&terms.requester(), &terms.canonical_payload()?)
    }

    pub fn verify_access_request(&self, request: &DataAccessRequest) -> WorkflowResult<bool> {
        let terms = request.terms();
        self.verify(
            &terms.requester(),
            &terms.canonical_payload()?,
            &request.client_sign,
        )
    }
}

fn extract_cert_public_key_sec1(cert_bytes: &[u8]) -> WorkflowResult<Vec<u8>> {
    let cert_der: Vec<u8> = if cert_bytes
        .windows("-----BEGIN CERTIFICATE-----".len())
        .any(|w| w == b"-----BEGIN CERTIFICATE-----")
    {
        let (_, pem) = x509_parser::pem::parse_x509_pem(cert_bytes)
            .map_err(|e| WorkflowError::EcdsaPublicKeyParse(Box::new(e)))?;
        pem.contents.to_vec()
    } else {
        cert_bytes.to_vec()
    };

    let (_, cert) = X509Certificate::from_der(cert_der.as_slice())
        .map_err(|e| WorkflowError::EcdsaPublicKeyParse(Box::new(e)))?;
    Ok(cert.public_key().subject_public_key.data.to_vec())
}

fn verifying_key_from_certificate(cert_bytes: &[u8]) -> WorkflowResult<VerifyingKey> {
    let key_bytes = extract_cert_public_key_sec1(cert_bytes)?;
    VerifyingKey::from_sec1_bytes(&key_bytes)
        .map_err(|e| WorkflowError::EcdsaPublicKeyParse(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use medshare_certificates::Certificate;
    use p256::pkcs8::EncodePrivateKey;

    fn enrolled_wallet(signers: &[SignerIdentity]) -> InMemoryWallet {
        let mut wallet = InMemoryWallet::new();
        for signer in signers {
            let enrolled = Certificate::enrol(&signer.user, &signer.domain).unwrap();
            wallet.insert(
                signer.clone(),
                enrolled.certificate_pem,
                enrolled.private_key_pem,
            );
        }
        wallet
    }

    fn terms() -> AgreementTerms {
        AgreementTerms {
            meta_data: ConsentMetadata {
                org: "Org2MSP".into(),
                user: "User1".into(),
                id: RecordId::parse("2D").unwrap(),
            },
            pid: RecordId::parse("1P").unwrap(),
            hid: "x509::CN=2D,O=Org2MSP".into(),
        }
    }

    fn flip_bit(bytes: &[u8], bit: usize) -> Vec<u8> {
        let mut out = bytes.to_vec();
        out[bit / 8] ^= 1 << (bit % 8);
        out
    }

    #[test]
    fn test_agreement_payload_is_byte_stable() {
        let payload = terms().canonical_payload().unwrap();
        assert_eq!(
            String::from_utf8(payload).unwrap(),
            r#"{"metaData":{"org":"Org2MSP","user":"User1","id":"2D"},"pid":"1P","hid":"x509::CN=2D,O=Org2MSP"}"#
        );
    }

    #[test]
    fn test_access_payload_is_byte_stable() {
        let terms = AccessTerms {
            meta_data: terms().meta_data,
            patient_id: RecordId::parse("1P").unwrap(),
        };
        assert_eq!(
            String::from_utf8(terms.canonical_payload().unwrap()).unwrap(),
            r#"{"meta_data":{"org":"Org2MSP","user":"User1","id":"2D"},"patient_id":"1P"}"#
        );
    }

    #[test]
    fn test_sign_then_verify_roundtrip() {
        let signer = SignerIdentity::new("User1", "Org1MSP");
        let service = SignatureService::new(enrolled_wallet(&[signer.clone()]));

        let payload = b"{\"pid\":\"1P\"}";
        let signature = service.sign(&signer, payload).unwrap();
        assert!(service.verify(&signer, payload, &signature).unwrap());
    }

    #[test]
    fn test_single_bit_mutations_fail_verification() {
        let signer = SignerIdentity::new("User1", "Org1MSP");
        let service = SignatureService::new(enrolled_wallet(&[signer.clone()]));

        let payload = terms().canonical_payload().unwrap();
        let signature = service.sign(&signer, &payload).unwrap();
        let der = general_purpose::STANDARD.decode(&signature).unwrap();

        for bit in (0..payload.len() * 8).step_by(7) {
            let mutated = flip_bit(&payload, bit);
            assert!(
                !service.verify(&signer, &mutated, &signature).unwrap(),
                "payload bit {bit}"
            );
        }

        for bit in 0..der.len() * 8 {
            let mutated = general_purpose::STANDARD.encode(flip_bit(&der, bit));
            assert!(
                !service.verify(&signer, &payload, &mutated).unwrap(),
                "signature bit {bit}"
            );
        }
    }

    #[test]
    fn test_verify_with_other_identity_is_false() {
        let alice = SignerIdentity::new("User1", "Org1MSP");
        let bob = SignerIdentity::new("User2", "Org1MSP");
        let service = SignatureService::new(enrolled_wallet(&[alice.clone(), bob.clone()]));

        let signature = service.sign(&alice, b"payload").unwrap();
        assert!(!service.verify(&bob, b"payload", &signature).unwrap());
    }

    #[test]
    fn test_malformed_base64_is_an_error() {
        let signer = SignerIdentity::new("User1", "Org1MSP");
        let service = SignatureService::new(enrolled_wallet(&[signer.clone()]));

        let err = service.verify(&signer, b"payload", "not base64!").unwrap_err();
        assert!(matches!(err, WorkflowError::SignatureEncoding(_)));
    }

    #[test]
    fn test_undecodable_der_is_false() {
        let signer = SignerIdentity::new("User1", "Org1MSP");
        let service = SignatureService::new(enrolled_wallet(&[signer.clone()]));

        let garbage = general_purpose::STANDARD.encode(b"definitely not der");
        assert!(!service.verify(&signer, b"payload", &garbage).unwrap());
    }

    #[test]
    fn test_missing_key_material_is_an_error() {
        let service = SignatureService::new(InMemoryWallet::new());
        let signer = SignerIdentity::new("User1", "Org1MSP");

        assert!(matches!(
            service.sign(&signer, b"payload"),
            Err(WorkflowError::MissingKeyMaterial(_))
        ));
        let sig = general_purpose::STANDARD.encode(b"x");
        assert!(matches!(
            service.verify(&signer, b"payload", &sig),
            Err(WorkflowError::MissingKeyMaterial(_))
        ));
    }

    #[test]
    fn test_certificate_only_wallet_can_verify_but_not_sign() {
        let signer = SignerIdentity::new("User1", "Org1MSP");
        let full = SignatureService::new(enrolled_wallet(&[signer.clone()]));
        let signature = full.sign(&signer, b"payload").unwrap();

        let mut certs = InMemoryWallet::new();
        certs.insert_certificate(
            signer.clone(),
            full.keys().certificate(&signer).unwrap().unwrap(),
        );
        let verifier = SignatureService::new(certs);

        assert!(verifier.verify(&signer, b"payload", &signature).unwrap());
        assert!(verifier.sign(&signer, b"payload").is_err());
    }

    #[test]
    fn test_sign_rejects_certificate_of_another_key() {
        let signer = SignerIdentity::new("User1", "Org1MSP");
        let enrolled = Certificate::enrol("User1", "Org1MSP").unwrap();
        let other_key = SigningKey::random(&mut rand::thread_rng())
            .to_pkcs8_pem(p256::pkcs8::LineEnding::LF)
            .unwrap();

        let mut wallet = InMemoryWallet::new();
        wallet.insert(signer.clone(), enrolled.certificate_pem, other_key.as_str());
        let service = SignatureService::new(wallet);

        assert!(matches!(
            service.sign(&signer, b"payload"),
            Err(WorkflowError::CertificatePublicKeyMismatch)
        ));
    }

    #[test]
    fn test_dual_signature_agreement_requires_both() {
        let terms = terms();
        let wallet = enrolled_wallet(&[terms.requester(), terms.custodian()]);
        let service = SignatureService::new(wallet);
        let signatures = service.sign_agreement(&terms).unwrap();

        let mut agreement = RequestAgreement {
            meta_data: terms.meta_data.clone(),
            pid: terms.pid.clone(),
            hid: terms.hid.clone(),
            digital_signatures: signatures.clone(),
            valid: false,
        };
        assert!(service.verify_agreement(&agreement).unwrap());

        // Custodian slot holding the requester's signature must not pass.
        agreement.digital_signatures.org_sign = signatures.client_sign.clone();
        assert!(!service.verify_agreement(&agreement).unwrap());

        agreement.digital_signatures = signatures;
        agreement.hid.push('x');
        assert!(!service.verify_agreement(&agreement).unwrap());
    }

    #[test]
    fn test_access_request_verification() {
        let terms = AccessTerms {
            meta_data: terms().meta_data,
            patient_id: RecordId::parse("1P").unwrap(),
        };
        let service = SignatureService::new(enrolled_wallet(&[terms.requester()]));
        let request = DataAccessRequest {
            meta_data: terms.meta_data.clone(),
            patient_id: terms.patient_id.clone(),
            client_sign: service.sign_access(&terms).unwrap(),
            valid: false,
        };
        assert!(service.verify_access_request(&request).unwrap());

        let tampered = DataAccessRequest {
            patient_id: RecordId::parse("9P").unwrap(),
            ..request
        };
        assert!(!service.verify_access_request(&tampered).unwrap());
    }
}
