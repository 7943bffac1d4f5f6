//! Constants used throughout the MedShare core crate.
//!
//! Names that appear on the wire or in partition/key construction live here so that signer,
//! verifier and store agree on them.

/// Suffix appended to domain identifiers to name their private partition.
pub const PARTITION_SUFFIX: &str = "PrivateCollection";

/// Composite-key namespace for cross-domain share agreements.
pub const REQUEST_AGREEMENT_NAMESPACE: &str = "requestAgreement";

/// Composite-key namespace for in-domain data access requests.
pub const DATA_ACCESS_REQUEST_NAMESPACE: &str = "dataAccessRequest";

/// Delimiter used by composite keys. Plain record ids never contain it, which keeps the two
/// key spaces disjoint within a partition.
pub const COMPOSITE_KEY_DELIMITER: char = '\u{0}';

/// User label of the custodian identity that countersigns share agreements for a domain.
pub const CUSTODIAN_USER: &str = "Admin";

/// Identity attribute carrying the caller's role.
pub const ROLE_ATTRIBUTE: &str = "role";

/// Identity attribute carrying the caller's business id.
pub const ID_ATTRIBUTE: &str = "id";

/// Environment variable naming the executing node's domain.
pub const LOCAL_DOMAIN_ENV: &str = "MEDSHARE_LOCAL_DOMAIN";

/// Environment variable listing the shared partition's member domains, comma separated.
pub const SHARED_DOMAINS_ENV: &str = "MEDSHARE_SHARED_DOMAINS";
