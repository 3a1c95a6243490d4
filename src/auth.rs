//! Client certificate resolution.
//!
//! The load balancer terminates mTLS and passes the client certificate in a
//! header, URL-encoded. It is parsed, matched to a legacy certificate record
//! by serial number, and paired with the private key the gateway holds for
//! that record so the legacy call can be made on the partner's behalf.

use crate::error::CertificateError;
use crate::registry::Privilege;
use crate::schemas::ApiSurface;
use async_trait::async_trait;
use chrono::NaiveDate;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use x509_parser::pem::parse_x509_pem;

/// Legacy certificate record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyCertificate {
    pub legacy_certificate_id: String,
    pub cert_id: String,
    pub serial_number: String,
    #[serde(default)]
    pub agency_code: Option<String>,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    #[serde(default)]
    pub privileges: BTreeSet<Privilege>,
}

impl LegacyCertificate {
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiration_date.is_some_and(|d| d < today)
    }

    pub fn has_privileges(&self, required: &BTreeSet<Privilege>) -> bool {
        required.is_subset(&self.privileges)
    }

    /// Checks the internal path applies before acting on this identity.
    pub fn validate_for(&self, api: ApiSurface, today: NaiveDate) -> Result<(), CertificateError> {
        if self.is_expired(today) {
            return Err(CertificateError::Expired(self.cert_id.clone()));
        }
        if api == ApiSurface::Grantors && self.agency_code.is_none() {
            return Err(CertificateError::MissingAgency(self.cert_id.clone()));
        }
        Ok(())
    }
}

/// A client certificate that resolved to a configured legacy record.
#[derive(Clone)]
pub struct ClientCertificate {
    pub serial_number: String,
    /// SHA-256 of the DER certificate, lowercase hex.
    pub fingerprint: String,
    pub certificate_pem: String,
    /// Private key followed by the certificate, as the legacy TLS client expects.
    pub pem: String,
    pub legacy_certificate: LegacyCertificate,
}

impl fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificate")
            .field("serial_number", &self.serial_number)
            .field("fingerprint", &self.fingerprint)
            .field("legacy_certificate", &self.legacy_certificate)
            .finish_non_exhaustive()
    }
}

/// Outcome of resolving the mTLS header.
#[derive(Debug, Clone)]
pub enum CertificateResolution {
    Resolved(ClientCertificate),
    /// Valid certificate with no key configured. Upstream must not be called.
    NotConfigured,
    /// Certificate could not be parsed or matched. Forward without one.
    LookupError(String),
}

/// Parsed identity of a PEM certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateIdentity {
    pub serial_number: String,
    pub fingerprint: String,
    pub pem: String,
}

/// Decode the header value and parse the certificate it carries.
pub fn parse_client_certificate(raw: &str) -> Result<CertificateIdentity, CertificateError> {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|e| CertificateError::InvalidPem(e.to_string()))?;
    let (_, pem) = parse_x509_pem(decoded.as_bytes())
        .map_err(|e| CertificateError::InvalidPem(e.to_string()))?;
    let certificate = pem
        .parse_x509()
        .map_err(|e| CertificateError::InvalidPem(e.to_string()))?;

    Ok(CertificateIdentity {
        serial_number: certificate.tbs_certificate.serial.to_string(),
        fingerprint: hex::encode(Sha256::digest(&pem.contents)),
        pem: decoded.trim().to_string(),
    })
}

/// Lookup of legacy certificate records.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn find_by_serial(&self, serial_number: &str) -> Result<Option<LegacyCertificate>, CertificateError>;
}

/// Store backed by records from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCertificateStore {
    by_serial: HashMap<String, LegacyCertificate>,
}

impl StaticCertificateStore {
    pub fn new(records: impl IntoIterator<Item = LegacyCertificate>) -> Self {
        Self {
            by_serial: records
                .into_iter()
                .map(|r| (r.serial_number.clone(), r))
                .collect(),
        }
    }
}

#[async_trait]
impl CertificateStore for StaticCertificateStore {
    async fn find_by_serial(&self, serial_number: &str) -> Result<Option<LegacyCertificate>, CertificateError> {
        Ok(self.by_serial.get(serial_number).cloned())
    }
}

/// Private keys keyed by `legacy_certificate_id`.
pub type ClientKeyMap = HashMap<String, String>;

pub struct CertificateResolver {
    store: Arc<dyn CertificateStore>,
    keys: ClientKeyMap,
}

impl CertificateResolver {
    pub fn new(store: Arc<dyn CertificateStore>, keys: ClientKeyMap) -> Self {
        Self { store, keys }
    }

    /// Whether any key is configured. With none, certificates are never resolved.
    pub fn has_client_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    pub async fn resolve(&self, raw: &str) -> CertificateResolution {
        let identity = match parse_client_certificate(raw) {
            Ok(identity) => identity,
            Err(e) => return CertificateResolution::LookupError(e.to_string()),
        };

        let legacy = match self.store.find_by_serial(&identity.serial_number).await {
            Ok(Some(legacy)) => legacy,
            Ok(None) => {
                return CertificateResolution::LookupError(
                    CertificateError::LegacyCertificateNotFound(identity.serial_number).to_string(),
                )
            }
            Err(e) => return CertificateResolution::LookupError(e.to_string()),
        };

        let key = match self.keys.get(&legacy.legacy_certificate_id) {
            Some(key) if !key.trim().is_empty() => key,
            _ => {
                info!(
                    legacy_certificate_id = %legacy.legacy_certificate_id,
                    serial_number = %identity.serial_number,
                    "Client certificate has no configured key"
                );
                return CertificateResolution::NotConfigured;
            }
        };

        debug!(
            legacy_certificate_id = %legacy.legacy_certificate_id,
            fingerprint = %identity.fingerprint,
            "Resolved client certificate"
        );

        CertificateResolution::Resolved(ClientCertificate {
            pem: format!("{}\n\n{}", key.trim(), identity.pem),
            serial_number: identity.serial_number,
            fingerprint: identity.fingerprint,
            certificate_pem: identity.pem,
            legacy_certificate: legacy,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub struct TestCertificate {
        pub cert_pem: String,
        pub key_pem: String,
        pub serial_number: String,
    }

    pub fn generate_certificate() -> TestCertificate {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["partner.example".to_string()]).unwrap();
        params.serial_number = Some(rcgen::SerialNumber::from_slice(&[0x1b, 0x58]));
        let cert = params.self_signed(&key).unwrap();
        let cert_pem = cert.pem();
        let serial_number = parse_client_certificate(&cert_pem).unwrap().serial_number;
        TestCertificate {
            cert_pem,
            key_pem: key.serialize_pem(),
            serial_number,
        }
    }

    pub fn url_encode(pem: &str) -> String {
        percent_encoding::utf8_percent_encode(pem, percent_encoding::NON_ALPHANUMERIC).to_string()
    }

    pub fn legacy_record(serial_number: &str) -> LegacyCertificate {
        LegacyCertificate {
            legacy_certificate_id: "legacy-1".to_string(),
            cert_id: "cert-1".to_string(),
            serial_number: serial_number.to_string(),
            agency_code: Some("HHS".to_string()),
            expiration_date: None,
            privileges: [Privilege::LegacyAgencyGrantRetriever].into_iter().collect(),
        }
    }
}
