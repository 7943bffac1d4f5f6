//! Error type for every core operation.
//!
//! All failures surface as a single [`WorkflowError`]; [`WorkflowError::kind`] maps each
//! variant onto the coarse taxonomy callers branch on (for example, only
//! [`ErrorKind::StorageConflict`] is worth resubmitting).

/// Coarse classification of a [`WorkflowError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Wrong role, cross-domain write or non-owner action.
    Authorization,
    /// Empty or invalid field, duplicate unique key, wrong id kind.
    Validation,
    /// Record, agreement or request absent.
    NotFound,
    /// Consent object missing validation, invalid, or failed signature checks.
    Consent,
    /// The host ledger rejected the commit because a read key changed underneath it.
    StorageConflict,
    /// Stored bytes could not be encoded or decoded.
    Serialization,
    /// Malformed signature encoding or missing/unusable key material.
    Crypto,
    /// The ledger itself is unusable (e.g. a poisoned lock).
    Storage,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("unauthorised: {0}")]
    Unauthorized(String),
    #[error("missing identity attribute: {0}")]
    MissingAttribute(String),
    #[error(
        "client from domain {client} is not authorised to read or write private data on a {local} node"
    )]
    DomainMismatch { client: String, local: String },
    #[error("domain {domain} may not write to partition {partition}")]
    PartitionNotWritable { partition: String, domain: String },
    #[error("invoked client identity does not own record {0}")]
    NotOwner(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("doctor {doctor} already has access to patient {patient}")]
    AlreadyHasAccess { doctor: String, patient: String },
    #[error("invalid record id {id}: expected a {expected} id")]
    WrongIdKind { id: String, expected: &'static str },

    #[error("{0} not found")]
    NotFound(String),

    #[error("consent rejected: {0}")]
    Consent(String),

    #[error("storage conflict on {key:?} in partition {partition}; resubmit the transaction")]
    StorageConflict { partition: String, key: String },
    #[error("ledger state unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("failed to serialize record: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize stored record {key:?}: {source}")]
    Deserialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid signature encoding: {0}")]
    SignatureEncoding(base64::DecodeError),
    #[error("no enrolled key material for {0}")]
    MissingKeyMaterial(String),
    #[error("failed to parse ECDSA private key: {0}")]
    EcdsaPrivateKeyParse(Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to parse ECDSA public key/certificate: {0}")]
    EcdsaPublicKeyParse(Box<dyn std::error::Error + Send + Sync>),
    #[error("enrolled certificate public key does not match signing key")]
    CertificatePublicKeyMismatch,
    #[error("failed to sign: {0}")]
    EcdsaSign(Box<dyn std::error::Error + Send + Sync>),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_)
            | Self::MissingAttribute(_)
            | Self::DomainMismatch { .. }
            | Self::PartitionNotWritable { .. }
            | Self::NotOwner(_) => ErrorKind::Authorization,
            Self::InvalidInput(_)
            | Self::AlreadyExists(_)
            | Self::AlreadyHasAccess { .. }
            | Self::WrongIdKind { .. } => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Consent(_) => ErrorKind::Consent,
            Self::StorageConflict { .. } => ErrorKind::StorageConflict,
            Self::LedgerUnavailable(_) => ErrorKind::Storage,
            Self::Serialization(_) | Self::Deserialization { .. } => ErrorKind::Serialization,
            Self::SignatureEncoding(_)
            | Self::MissingKeyMaterial(_)
            | Self::EcdsaPrivateKeyParse(_)
            | Self::EcdsaPublicKeyParse(_)
            | Self::CertificatePublicKeyMismatch
            | Self::EcdsaSign(_) => ErrorKind::Crypto,
        }
    }

    /// Whether an external caller may resubmit the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::StorageConflict
    }
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;
