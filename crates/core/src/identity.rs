//! Caller identity.
//!
//! The host authenticates every call and exposes the caller's certificate claims through
//! [`IdentityClaims`]. They are resolved exactly once per call into a [`Caller`], which the
//! workflows use for every role, ownership and partition decision.

use crate::constants::{ID_ATTRIBUTE, ROLE_ATTRIBUTE};
use crate::records::{RecordId, RecordKind};
use crate::{WorkflowError, WorkflowResult};
use medshare_types::DomainId;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Claims the host exposes about an authenticated caller.
pub trait IdentityClaims {
    /// Value of a certificate attribute, or `None` if the certificate does not carry it.
    fn attribute(&self, name: &str) -> WorkflowResult<Option<String>>;

    /// Domain (membership service) the caller is enrolled in.
    fn caller_domain(&self) -> WorkflowResult<DomainId>;

    /// The raw, globally unique identity string of the caller's certificate.
    fn caller_underlying_id(&self) -> WorkflowResult<String>;
}

/// Role carried by a caller's certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Patient,
    Doctor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = WorkflowError;

    /// Role attributes are matched case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(Role::Patient),
            "doctor" => Ok(Role::Doctor),
            "admin" => Ok(Role::Admin),
            other => Err(WorkflowError::Unauthorized(format!(
                "unrecognised role {other:?}"
            ))),
        }
    }
}

/// An authenticated caller, resolved once from [`IdentityClaims`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub role: Role,
    /// Business id from the `id` attribute (e.g. `"1P"`).
    pub id: String,
    pub domain: DomainId,
    pub underlying_id: String,
}

impl Caller {
    /// Resolves a caller from its claims.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::MissingAttribute` if the role or id attribute is absent, and
    /// `WorkflowError::Unauthorized` if the role is not one the system knows.
    pub fn resolve(claims: &dyn IdentityClaims) -> WorkflowResult<Self> {
        let role: Role = required_attribute(claims, ROLE_ATTRIBUTE)?.parse()?;
        let id = required_attribute(claims, ID_ATTRIBUTE)?;

        Ok(Self {
            role,
            id,
            domain: claims.caller_domain()?,
            underlying_id: claims.caller_underlying_id()?,
        })
    }

    /// Fails unless the caller holds `role`.
    pub fn require_role(&self, role: Role) -> WorkflowResult<()> {
        if self.role != role {
            return Err(WorkflowError::Unauthorized(format!(
                "operation requires role {role}; caller has role {}",
                self.role
            )));
        }
        Ok(())
    }

    /// The caller's business id, checked to be of the expected kind.
    pub fn record_id(&self, kind: RecordKind) -> WorkflowResult<RecordId> {
        RecordId::parse_as(&self.id, kind)
    }

    /// Shorthand for a patient caller's own id.
    pub fn patient_id(&self) -> WorkflowResult<RecordId> {
        self.require_role(Role::Patient)?;
        self.record_id(RecordKind::Patient)
    }

    /// Shorthand for a doctor caller's own id.
    pub fn doctor_id(&self) -> WorkflowResult<RecordId> {
        self.require_role(Role::Doctor)?;
        self.record_id(RecordKind::Doctor)
    }
}

/// Reads an attribute that must be present.
pub fn required_attribute(claims: &dyn IdentityClaims, name: &str) -> WorkflowResult<String> {
    claims
        .attribute(name)?
        .ok_or_else(|| WorkflowError::MissingAttribute(name.to_owned()))
}

// ============================================================================
// STATIC CLAIMS
// ============================================================================

/// Fixed claims for in-process callers such as tests and local tooling.
#[derive(Clone, Debug)]
pub struct StaticClaims {
    attributes: BTreeMap<String, String>,
    domain: DomainId,
    underlying_id: String,
}

impl StaticClaims {
    pub fn new(domain: DomainId, underlying_id: impl Into<String>) -> Self {
        Self {
            attributes: BTreeMap::new(),
            domain,
            underlying_id: underlying_id.into(),
        }
    }

    /// Claims for an enrolled member with the usual `role` and `id` attributes.
    ///
    /// The underlying id follows the `x509::CN=<id>,O=<domain>` form of an enrolment
    /// certificate subject.
    pub fn member(role: Role, id: &str, domain: DomainId) -> Self {
        let underlying_id = format!("x509::CN={id},O={domain}");
        Self::new(domain, underlying_id)
            .with_attribute(ROLE_ATTRIBUTE, role.as_str())
            .with_attribute(ID_ATTRIBUTE, id)
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_owned(), value.to_owned());
        self
    }
}

impl IdentityClaims for StaticClaims {
    fn attribute(&self, name: &str) -> WorkflowResult<Option<String>> {
        Ok(self.attributes.get(name).cloned())
    }

    fn caller_domain(&self) -> WorkflowResult<DomainId> {
        Ok(self.domain.clone())
    }

    fn caller_underlying_id(&self) -> WorkflowResult<String> {
        Ok(self.underlying_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org1() -> DomainId {
        DomainId::new("Org1MSP").unwrap()
    }

    #[test]
    fn test_role_parsing_is_case_insensitive() {
        assert_eq!("Patient".parse::<Role>().unwrap(), Role::Patient);
        assert_eq!("DOCTOR".parse::<Role>().unwrap(), Role::Doctor);
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("nurse".parse::<Role>().is_err());
    }

    #[test]
    fn test_resolve_reads_all_claims() {
        let claims = StaticClaims::member(Role::Doctor, "7D", org1());
        let caller = Caller::resolve(&claims).unwrap();

        assert_eq!(caller.role, Role::Doctor);
        assert_eq!(caller.id, "7D");
        assert_eq!(caller.domain, org1());
        assert_eq!(caller.underlying_id, "x509::CN=7D,O=Org1MSP");
        assert_eq!(caller.doctor_id().unwrap().as_str(), "7D");
    }

    #[test]
    fn test_resolve_requires_role_attribute() {
        let claims = StaticClaims::new(org1(), "x509::CN=1P").with_attribute(ID_ATTRIBUTE, "1P");
        let err = Caller::resolve(&claims).unwrap_err();
        assert!(matches!(err, WorkflowError::MissingAttribute(ref name) if name == "role"));
    }

    #[test]
    fn test_require_role_rejects_other_roles() {
        let caller = Caller::resolve(&StaticClaims::member(Role::Patient, "1P", org1())).unwrap();
        assert!(caller.require_role(Role::Patient).is_ok());
        assert!(matches!(
            caller.require_role(Role::Doctor),
            Err(WorkflowError::Unauthorized(_))
        ));
        assert!(caller.doctor_id().is_err());
    }

    #[test]
    fn test_id_kind_must_match_role() {
        let caller = Caller::resolve(&StaticClaims::member(Role::Patient, "1D", org1())).unwrap();
        assert!(matches!(
            caller.patient_id(),
            Err(WorkflowError::WrongIdKind { .. })
        ));
    }
}
