use rcgen::{
    CertificateParams, DistinguishedName, DnType, Ia5String, IsCa, KeyPair, KeyUsagePurpose,
    SanType, SerialNumber,
};
use thiserror::Error;

/// Errors that can occur during certificate creation.
#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("Failed to generate certificate: {0}")]
    GenerationError(String),
    #[error("Invalid identity for certificate: {0}")]
    InvalidIdentity(String),
}

/// PEM material for one enrolled identity.
#[derive(Clone, Debug)]
pub struct EnrolledIdentity {
    /// X.509 certificate carrying the identity's P-256 public key.
    pub certificate_pem: String,
    /// PKCS#8 private key matching the certificate.
    pub private_key_pem: String,
}

/// Issues enrolment certificates for ledger identities.
///
/// Each identity is a `(user, domain)` pair. The certificate subject carries the user as
/// Common Name and the domain as Organisation, and the pair is repeated as a
/// `medshare://<domain>/<user>` URI in subjectAltName.
pub struct Certificate;

impl Certificate {
    /// Creates a new self-signed ECDSA P-256 certificate and private key for an identity.
    ///
    /// # Arguments
    ///
    /// * `user` - The identity's user label within its domain (e.g. "User1", "Admin").
    /// * `domain` - The custodial domain the identity is enrolled in (e.g. "Org1MSP").
    ///
    /// # Errors
    ///
    /// Returns `CertificateError::InvalidIdentity` if either value is blank, and
    /// `CertificateError::GenerationError` if key or certificate generation fails.
    pub fn enrol(user: &str, domain: &str) -> Result<EnrolledIdentity, CertificateError> {
        let user = user.trim();
        let domain = domain.trim();
        if user.is_empty() || domain.is_empty() {
            return Err(CertificateError::InvalidIdentity(
                "user and domain are required".into(),
            ));
        }

        let mut params = CertificateParams::default();

        let mut subject = DistinguishedName::new();
        subject.push(DnType::CommonName, user);
        subject.push(DnType::OrganizationName, domain);
        params.distinguished_name = subject;

        params.is_ca = IsCa::NoCa;

        let uri = format!("medshare://{}/{}", domain, user);
        let uri = Ia5String::try_from(uri)
            .map_err(|e| CertificateError::InvalidIdentity(e.to_string()))?;
        params.subject_alt_names.push(SanType::URI(uri));

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::ContentCommitment,
        ];

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + time::Duration::days(365);

        params.serial_number = Some(SerialNumber::from(vec![0, 1, 2, 3, 4, 5, 6, 7]));

        // rcgen defaults to ECDSA P-256 with SHA-256.
        let key_pair =
            KeyPair::generate().map_err(|e| CertificateError::GenerationError(e.to_string()))?;

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CertificateError::GenerationError(e.to_string()))?;

        Ok(EnrolledIdentity {
            certificate_pem: cert.pem(),
            private_key_pem: key_pair.serialize_pem(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::extensions::GeneralName;

    #[test]
    fn test_enrol_produces_pem_material() {
        let identity = Certificate::enrol("User1", "Org1MSP").unwrap();

        assert!(identity.certificate_pem.contains("BEGIN CERTIFICATE"));
        assert!(identity.certificate_pem.contains("END CERTIFICATE"));
        assert!(identity.private_key_pem.contains("BEGIN PRIVATE KEY"));
        assert!(identity.private_key_pem.contains("END PRIVATE KEY"));
    }

    #[test]
    fn test_enrol_embeds_identity_in_subject_and_san() {
        let identity = Certificate::enrol("Admin", "Org2MSP").unwrap();

        let (_, pem) = x509_parser::pem::parse_x509_pem(identity.certificate_pem.as_bytes())
            .expect("valid PEM");
        let cert = pem.parse_x509().expect("valid certificate");

        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .expect("common name");
        assert_eq!(cn, "Admin");

        let san = cert
            .subject_alternative_name()
            .expect("well-formed extensions")
            .expect("subjectAltName present");
        let uris: Vec<&str> = san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::URI(uri) => Some(*uri),
                _ => None,
            })
            .collect();
        assert_eq!(uris, vec!["medshare://Org2MSP/Admin"]);
    }

    #[test]
    fn test_enrol_rejects_blank_identity() {
        let err = Certificate::enrol("  ", "Org1MSP").unwrap_err();
        assert!(matches!(err, CertificateError::InvalidIdentity(_)));
    }

    #[test]
    fn test_each_enrolment_has_a_fresh_key() {
        let a = Certificate::enrol("User1", "Org1MSP").unwrap();
        let b = Certificate::enrol("User1", "Org1MSP").unwrap();
        assert_ne!(a.private_key_pem, b.private_key_pem);
    }
}
