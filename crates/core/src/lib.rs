//! # MedShare Core
//!
//! Consent and delegation workflows for medical records held by two custodial domains on a
//! partitioned key-value ledger.
//!
//! This crate contains the record model and the workflows that move records between partitions:
//! - Patient and doctor registration, appointments and medical records
//! - Cross-domain share agreements, dual-signed and validated by the patient
//! - In-domain access requests, grants and revocation
//! - ECDSA P-256 signing and verification of consent objects
//!
//! Every operation runs in a [`context::TxContext`] over a staged [`store::Transaction`]; nothing
//! reaches the ledger unless the whole operation succeeds. [`RecordContract`] wraps each
//! operation in its own transaction for node callers.
//!
//! **No transport concerns**: enrolment services, wallets on disk and network endpoints belong to
//! the host platform and client tooling.

pub mod config;
pub mod constants;
pub mod context;
pub mod contract;
pub mod error;
pub mod identity;
pub mod records;
pub mod signature;
pub mod store;
pub mod validation;
pub mod workflows;

pub use config::CoreConfig;
pub use contract::RecordContract;
pub use error::{ErrorKind, WorkflowError, WorkflowResult};
pub use identity::{Caller, IdentityClaims, Role, StaticClaims};
pub use records::{RecordId, RecordKind};
pub use signature::{InMemoryWallet, KeyStore, SignatureService, SignerIdentity};
pub use store::{InMemoryLedger, Ledger, PartitionKey};
pub use workflows::access::AccessRequest;
pub use workflows::consent::AgreementRequest;
