use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use medshare_certificates::Certificate;
use medshare_core::constants::{LOCAL_DOMAIN_ENV, SHARED_DOMAINS_ENV};
use medshare_core::records::{
    ConsentMetadata, DataAccessRequest, DigitalSignatures, RecordId, RecordKind, RequestAgreement,
};
use medshare_core::signature::{AccessTerms, AgreementTerms};
use medshare_core::{CoreConfig, InMemoryWallet, SignatureService, SignerIdentity};
use medshare_types::{DomainId, NonEmptyText};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "medshare")]
#[command(about = "MedShare consent signing and verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrol an identity and write its certificate and private key into a wallet directory
    Enrol {
        /// User label within the domain (e.g. User1, Admin)
        user: String,
        /// Domain the user is enrolled in (e.g. Org2MSP)
        domain: String,
        /// Wallet directory
        #[arg(long, default_value = "wallet")]
        wallet: PathBuf,
    },
    /// Print the partition names for the node configured in the environment
    Partitions,
    /// Print the canonical payload of a share agreement
    AgreementPayload(AgreementArgs),
    /// Sign a share agreement as the requester and the domain custodian
    SignAgreement {
        #[command(flatten)]
        terms: AgreementArgs,
        #[arg(long, default_value = "wallet")]
        wallet: PathBuf,
    },
    /// Verify both signatures of a share agreement
    VerifyAgreement {
        #[command(flatten)]
        terms: AgreementArgs,
        /// Requester signature (base64)
        #[arg(long)]
        client_sign: String,
        /// Custodian signature (base64)
        #[arg(long)]
        org_sign: String,
        #[arg(long, default_value = "wallet")]
        wallet: PathBuf,
    },
    /// Print the canonical payload of an access request
    AccessPayload(AccessArgs),
    /// Sign an access request as the requester
    SignAccess {
        #[command(flatten)]
        terms: AccessArgs,
        #[arg(long, default_value = "wallet")]
        wallet: PathBuf,
    },
    /// Verify the signature of an access request
    VerifyAccess {
        #[command(flatten)]
        terms: AccessArgs,
        /// Requester signature (base64)
        #[arg(long)]
        client_sign: String,
        #[arg(long, default_value = "wallet")]
        wallet: PathBuf,
    },
}

/// Signed fields of a share agreement.
#[derive(Args, Clone, Debug)]
struct AgreementArgs {
    /// Requesting domain
    #[arg(long)]
    org: String,
    /// Requesting user label
    #[arg(long)]
    user: String,
    /// Requesting doctor id (e.g. 2D)
    #[arg(long)]
    id: String,
    /// Target patient id (e.g. 1P)
    #[arg(long)]
    pid: String,
    /// Underlying identity of the requesting doctor
    #[arg(long)]
    hid: String,
}

impl AgreementArgs {
    fn terms(&self) -> anyhow::Result<AgreementTerms> {
        Ok(AgreementTerms {
            meta_data: metadata(&self.org, &self.user, &self.id)?,
            pid: RecordId::parse_as(&self.pid, RecordKind::Patient)?,
            hid: self.hid.clone(),
        })
    }
}

/// Signed fields of an access request.
#[derive(Args, Clone, Debug)]
struct AccessArgs {
    /// Requesting domain
    #[arg(long)]
    org: String,
    /// Requesting user label
    #[arg(long)]
    user: String,
    /// Requesting doctor id (e.g. 1D)
    #[arg(long)]
    id: String,
    /// Target patient id (e.g. 1P)
    #[arg(long)]
    patient_id: String,
}

impl AccessArgs {
    fn terms(&self) -> anyhow::Result<AccessTerms> {
        Ok(AccessTerms {
            meta_data: metadata(&self.org, &self.user, &self.id)?,
            patient_id: RecordId::parse_as(&self.patient_id, RecordKind::Patient)?,
        })
    }
}

fn metadata(org: &str, user: &str, id: &str) -> anyhow::Result<ConsentMetadata> {
    Ok(ConsentMetadata {
        org: org.to_owned(),
        user: user.to_owned(),
        id: RecordId::parse_as(id, RecordKind::Doctor)?,
    })
}

// ============================================================================
// WALLET DIRECTORY
// ============================================================================

fn certificate_path(wallet: &Path, signer: &SignerIdentity) -> PathBuf {
    wallet.join(format!("{signer}.cert.pem"))
}

fn private_key_path(wallet: &Path, signer: &SignerIdentity) -> PathBuf {
    wallet.join(format!("{signer}.key.pem"))
}

/// Writes a fresh enrolment for `user` in `domain` and returns the certificate path.
fn enrol(wallet: &Path, user: &str, domain: &str) -> anyhow::Result<PathBuf> {
    let user = NonEmptyText::new(user).context("user label")?;
    let domain = DomainId::new(domain).context("domain id")?;
    let signer = SignerIdentity::new(user.as_str(), domain.as_str());

    let enrolled = Certificate::enrol(user.as_str(), domain.as_str())?;
    fs::create_dir_all(wallet)
        .with_context(|| format!("creating wallet directory {}", wallet.display()))?;

    let cert_path = certificate_path(wallet, &signer);
    fs::write(&cert_path, enrolled.certificate_pem)
        .with_context(|| format!("writing {}", cert_path.display()))?;
    let key_path = private_key_path(wallet, &signer);
    fs::write(&key_path, enrolled.private_key_pem)
        .with_context(|| format!("writing {}", key_path.display()))?;

    tracing::info!(%signer, wallet = %wallet.display(), "enrolled identity");
    Ok(cert_path)
}

/// Loads the material of `signers` from a wallet directory.
///
/// A certificate is required for every signer; private keys are loaded when present.
fn load_wallet(wallet: &Path, signers: &[SignerIdentity]) -> anyhow::Result<InMemoryWallet> {
    let mut keys = InMemoryWallet::new();
    for signer in signers {
        let cert_path = certificate_path(wallet, signer);
        let certificate = fs::read_to_string(&cert_path)
            .with_context(|| format!("no certificate for {signer} at {}", cert_path.display()))?;

        let key_path = private_key_path(wallet, signer);
        if key_path.exists() {
            let private_key = fs::read_to_string(&key_path)
                .with_context(|| format!("reading {}", key_path.display()))?;
            keys.insert(signer.clone(), certificate, private_key);
        } else {
            tracing::debug!(%signer, "no private key in wallet; verification only");
            keys.insert_certificate(signer.clone(), certificate);
        }
    }
    Ok(keys)
}

// ============================================================================
// COMMANDS
// ============================================================================

fn partitions(local: &str, shared: &str) -> anyhow::Result<String> {
    let config = CoreConfig::from_env_values(local, shared)?;
    Ok(format!(
        "private: {}\nshared: {}",
        config.private_partition(config.local_domain()),
        config.shared_partition()
    ))
}

fn agreement_payload(args: &AgreementArgs) -> anyhow::Result<String> {
    Ok(String::from_utf8(args.terms()?.canonical_payload()?)?)
}

fn sign_agreement(args: &AgreementArgs, wallet: &Path) -> anyhow::Result<String> {
    let terms = args.terms()?;
    let keys = load_wallet(wallet, &[terms.requester(), terms.custodian()])?;
    let signatures = SignatureService::new(keys).sign_agreement(&terms)?;
    Ok(serde_json::to_string_pretty(&signatures)?)
}

fn verify_agreement(
    args: &AgreementArgs,
    client_sign: &str,
    org_sign: &str,
    wallet: &Path,
) -> anyhow::Result<bool> {
    let terms = args.terms()?;
    let keys = load_wallet(wallet, &[terms.requester(), terms.custodian()])?;
    let agreement = RequestAgreement {
        meta_data: terms.meta_data,
        pid: terms.pid,
        hid: terms.hid,
        digital_signatures: DigitalSignatures {
            client_sign: client_sign.to_owned(),
            org_sign: org_sign.to_owned(),
        },
        valid: false,
    };
    Ok(SignatureService::new(keys).verify_agreement(&agreement)?)
}

fn access_payload(args: &AccessArgs) -> anyhow::Result<String> {
    Ok(String::from_utf8(args.terms()?.canonical_payload()?)?)
}

fn sign_access(args: &AccessArgs, wallet: &Path) -> anyhow::Result<String> {
    let terms = args.terms()?;
    let keys = load_wallet(wallet, &[terms.requester()])?;
    Ok(SignatureService::new(keys).sign_access(&terms)?)
}

fn verify_access(args: &AccessArgs, client_sign: &str, wallet: &Path) -> anyhow::Result<bool> {
    let terms = args.terms()?;
    let keys = load_wallet(wallet, &[terms.requester()])?;
    let request = DataAccessRequest {
        meta_data: terms.meta_data,
        patient_id: terms.patient_id,
        client_sign: client_sign.to_owned(),
        valid: false,
    };
    Ok(SignatureService::new(keys).verify_access_request(&request)?)
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("medshare=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Enrol {
            user,
            domain,
            wallet,
        }) => {
            let path = enrol(&wallet, &user, &domain)?;
            println!("Enrolled {user}@{domain}: {}", path.display());
        }
        Some(Commands::Partitions) => {
            let local = std::env::var(LOCAL_DOMAIN_ENV)
                .with_context(|| format!("{LOCAL_DOMAIN_ENV} is not set"))?;
            let shared = std::env::var(SHARED_DOMAINS_ENV)
                .with_context(|| format!("{SHARED_DOMAINS_ENV} is not set"))?;
            println!("{}", partitions(&local, &shared)?);
        }
        Some(Commands::AgreementPayload(args)) => println!("{}", agreement_payload(&args)?),
        Some(Commands::SignAgreement { terms, wallet }) => {
            println!("{}", sign_agreement(&terms, &wallet)?)
        }
        Some(Commands::VerifyAgreement {
            terms,
            client_sign,
            org_sign,
            wallet,
        }) => {
            let valid = verify_agreement(&terms, &client_sign, &org_sign, &wallet)?;
            println!("{valid}");
            if !valid {
                bail!("agreement signatures do not verify");
            }
        }
        Some(Commands::AccessPayload(args)) => println!("{}", access_payload(&args)?),
        Some(Commands::SignAccess { terms, wallet }) => {
            println!("{}", sign_access(&terms, &wallet)?)
        }
        Some(Commands::VerifyAccess {
            terms,
            client_sign,
            wallet,
        }) => {
            let valid = verify_access(&terms, &client_sign, &wallet)?;
            println!("{valid}");
            if !valid {
                bail!("access request signature does not verify");
            }
        }
        None => {
            println!("Use 'medshare --help' for commands");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn agreement() -> AgreementArgs {
        AgreementArgs {
            org: "Org2MSP".into(),
            user: "User1".into(),
            id: "2D".into(),
            pid: "1P".into(),
            hid: "x509::CN=2D,O=Org2MSP".into(),
        }
    }

    fn access() -> AccessArgs {
        AccessArgs {
            org: "Org1MSP".into(),
            user: "User1".into(),
            id: "1D".into(),
            patient_id: "1P".into(),
        }
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_payloads_are_compact_json_in_field_order() {
        assert_eq!(
            agreement_payload(&agreement()).unwrap(),
            r#"{"metaData":{"org":"Org2MSP","user":"User1","id":"2D"},"pid":"1P","hid":"x509::CN=2D,O=Org2MSP"}"#
        );
        assert_eq!(
            access_payload(&access()).unwrap(),
            r#"{"meta_data":{"org":"Org1MSP","user":"User1","id":"1D"},"patient_id":"1P"}"#
        );
    }

    #[test]
    fn test_payload_rejects_swapped_ids() {
        let mut args = agreement();
        args.pid = "2D".into();
        assert!(agreement_payload(&args).is_err());
    }

    #[test]
    fn test_enrol_writes_certificate_and_key() {
        let dir = TempDir::new().unwrap();
        let cert = enrol(dir.path(), "User1", "Org2MSP").unwrap();
        assert!(cert.ends_with("User1@Org2MSP.cert.pem"));
        assert!(dir.path().join("User1@Org2MSP.key.pem").exists());

        assert!(enrol(dir.path(), " ", "Org2MSP").is_err());
        assert!(enrol(dir.path(), "User1", "Org 2").is_err());
    }

    #[test]
    fn test_sign_then_verify_agreement_from_wallet_directory() {
        let dir = TempDir::new().unwrap();
        enrol(dir.path(), "User1", "Org2MSP").unwrap();
        enrol(dir.path(), "Admin", "Org2MSP").unwrap();

        let json = sign_agreement(&agreement(), dir.path()).unwrap();
        let sigs: DigitalSignatures = serde_json::from_str(&json).unwrap();
        assert!(
            verify_agreement(&agreement(), &sigs.client_sign, &sigs.org_sign, dir.path()).unwrap()
        );

        // Swapped signatures fail the check without erroring.
        assert!(
            !verify_agreement(&agreement(), &sigs.org_sign, &sigs.client_sign, dir.path()).unwrap()
        );
    }

    #[test]
    fn test_verify_access_with_certificate_only() {
        let signing = TempDir::new().unwrap();
        enrol(signing.path(), "User1", "Org1MSP").unwrap();
        let sig = sign_access(&access(), signing.path()).unwrap();

        let verifying = TempDir::new().unwrap();
        fs::copy(
            signing.path().join("User1@Org1MSP.cert.pem"),
            verifying.path().join("User1@Org1MSP.cert.pem"),
        )
        .unwrap();
        assert!(verify_access(&access(), &sig, verifying.path()).unwrap());
        assert!(sign_access(&access(), verifying.path()).is_err());
    }

    #[test]
    fn test_missing_certificate_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(verify_access(&access(), "c2ln", dir.path()).is_err());
    }

    #[test]
    fn test_partitions_from_env_values() {
        let out = partitions("Org1MSP", "Org1MSP,Org2MSP").unwrap();
        assert_eq!(
            out,
            "private: Org1MSPPrivateCollection\nshared: Org1MSPOrg2MSPPrivateCollection"
        );
        assert!(partitions("Org3MSP", "Org1MSP,Org2MSP").is_err());
    }
}
