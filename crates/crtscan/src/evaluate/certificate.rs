//! Decoded view of a stored certificate and the report fields derived from it.

use crate::error::RecordError;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::ParsedExtension;
use x509_parser::time::ASN1Time;

/// Columns every certificate evaluator reports, in order.
pub const CERTIFICATE_COLUMNS: [&str; 9] = [
    "crt.sh",
    "Validation",
    "Issuer",
    "Country",
    "Province",
    "Subject",
    "NotBefore",
    "NotAfter",
    "Details",
];

const CRTSH_LINK_PREFIX: &str = "https://crt.sh?sha256=";

/// id-ad-ocsp
const OID_ACCESS_OCSP: &str = "1.3.6.1.5.5.7.48.1";

/// CA/Browser Forum policy identifiers.
const POLICY_EV: &str = "2.23.140.1.1";
const POLICY_DV: &str = "2.23.140.1.2.1";
const POLICY_OV: &str = "2.23.140.1.2.2";
const POLICY_IV: &str = "2.23.140.1.2.3";

/// Validation level asserted through certificate policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLevel {
    Ev,
    Ov,
    Iv,
    Dv,
    Unknown,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Ev => "EV",
            ValidationLevel::Ov => "OV",
            ValidationLevel::Iv => "IV",
            ValidationLevel::Dv => "DV",
            ValidationLevel::Unknown => "unknown",
        }
    }

    fn from_policy(oid: &str) -> Option<Self> {
        match oid {
            POLICY_EV => Some(ValidationLevel::Ev),
            POLICY_OV => Some(ValidationLevel::Ov),
            POLICY_IV => Some(ValidationLevel::Iv),
            POLICY_DV => Some(ValidationLevel::Dv),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ValidationLevel::Ev => 4,
            ValidationLevel::Ov => 3,
            ValidationLevel::Iv => 2,
            ValidationLevel::Dv => 1,
            ValidationLevel::Unknown => 0,
        }
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed certificate borrowing its DER bytes.
pub struct Certificate<'a> {
    der: &'a [u8],
    x509: X509Certificate<'a>,
}

impl<'a> Certificate<'a> {
    /// Parse DER bytes as stored by crt.sh.
    pub fn parse(der: &'a [u8]) -> Result<Self, RecordError> {
        let (_, x509) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| RecordError::Decode(format!("invalid certificate: {e}")))?;
        Ok(Self { der, x509 })
    }

    /// Link to the certificate on crt.sh, keyed by SHA-256 of the DER.
    pub fn crtsh_link(&self) -> String {
        let digest = Sha256::digest(self.der);
        format!("{CRTSH_LINK_PREFIX}{}", hex::encode(digest))
    }

    /// Highest validation level among the certificate policies.
    pub fn validation_level(&self) -> ValidationLevel {
        let mut level = ValidationLevel::Unknown;
        for ext in self.x509.extensions() {
            if let ParsedExtension::CertificatePolicies(policies) = ext.parsed_extension() {
                for policy in policies.iter() {
                    let oid = policy.policy_id.to_id_string();
                    if let Some(found) = ValidationLevel::from_policy(&oid) {
                        if found.rank() > level.rank() {
                            level = found;
                        }
                    }
                }
            }
        }
        level
    }

    /// First countryName of the subject, as stored.
    pub fn country(&self) -> Option<&str> {
        self.x509
            .subject()
            .iter_country()
            .find_map(|attr| attr.as_str().ok())
    }

    /// First stateOrProvinceName of the subject.
    pub fn province(&self) -> Option<&str> {
        self.x509
            .subject()
            .iter_state_or_province()
            .find_map(|attr| attr.as_str().ok())
    }

    /// Whether basicConstraints marks this as a CA certificate.
    pub fn is_ca(&self) -> bool {
        matches!(self.x509.basic_constraints(), Ok(Some(bc)) if bc.value.ca)
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        to_utc(self.x509.validity().not_before)
    }

    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        to_utc(self.x509.validity().not_after)
    }

    /// HTTP(S) URIs from the CRL distribution points extension, in order.
    pub fn crl_urls(&self) -> Vec<String> {
        use x509_parser::extensions::{DistributionPointName, GeneralName};

        let mut urls = Vec::new();
        for ext in self.x509.extensions() {
            let ParsedExtension::CRLDistributionPoints(points) = ext.parsed_extension() else {
                continue;
            };
            for point in points.points.iter() {
                let Some(DistributionPointName::FullName(names)) = &point.distribution_point else {
                    continue;
                };
                for name in names {
                    if let GeneralName::URI(uri) = name {
                        let lower = uri.to_ascii_lowercase();
                        if lower.starts_with("http://") || lower.starts_with("https://") {
                            urls.push(uri.to_string());
                        }
                    }
                }
            }
        }
        urls
    }

    /// OCSP responder URIs from the authority information access extension.
    pub fn ocsp_urls(&self) -> Vec<String> {
        use x509_parser::extensions::GeneralName;

        let mut urls = Vec::new();
        for ext in self.x509.extensions() {
            let ParsedExtension::AuthorityInfoAccess(aia) = ext.parsed_extension() else {
                continue;
            };
            for desc in aia.accessdescs.iter() {
                if desc.access_method.to_id_string() != OID_ACCESS_OCSP {
                    continue;
                }
                if let GeneralName::URI(uri) = &desc.access_location {
                    urls.push(uri.to_string());
                }
            }
        }
        urls
    }

    /// Big-endian serial bytes as encoded in the certificate.
    pub fn raw_serial(&self) -> &[u8] {
        self.x509.raw_serial()
    }

    /// The report fields for [`CERTIFICATE_COLUMNS`].
    pub fn report_fields(&self, details: &str) -> Vec<String> {
        vec![
            self.crtsh_link(),
            self.validation_level().to_string(),
            self.x509.issuer().to_string(),
            self.country().map(str::to_uppercase).unwrap_or_default(),
            self.province().unwrap_or_default().to_string(),
            self.x509.subject().to_string(),
            format_time(self.not_before()),
            format_time(self.not_after()),
            details.to_string(),
        ]
    }
}

fn to_utc(time: ASN1Time) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.timestamp(), 0)
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S %z UTC").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATE_UNKNOWN: &[u8] = include_bytes!("../../tests/fixtures/state_unknown.der");
    const STATE_KNOWN: &[u8] = include_bytes!("../../tests/fixtures/state_known.der");
    const NO_PROVINCE: &[u8] = include_bytes!("../../tests/fixtures/no_province.der");
    const CA_LONG: &[u8] = include_bytes!("../../tests/fixtures/ca_long.der");
    const WITH_CRL: &[u8] = include_bytes!("../../tests/fixtures/with_crl.der");
    const MULTI_CRL: &[u8] = include_bytes!("../../tests/fixtures/multi_crl.der");
    const OCSP_ONLY: &[u8] = include_bytes!("../../tests/fixtures/ocsp_only.der");

    #[test]
    fn test_parse_rejects_garbage() {
        let err = Certificate::parse(b"definitely not DER").err();
        assert!(matches!(err, Some(RecordError::Decode(_))));
    }

    #[test]
    fn test_crtsh_link_uses_sha256_of_der() {
        let cert = Certificate::parse(STATE_UNKNOWN).unwrap();
        assert_eq!(
            cert.crtsh_link(),
            "https://crt.sh?sha256=c2f23b8cbef142b04cfa6173b35505b1e40d11efc130bb02a7d75b89f4e23cb3"
        );
    }

    #[test]
    fn test_subject_attributes() {
        let cert = Certificate::parse(STATE_UNKNOWN).unwrap();
        assert_eq!(cert.country(), Some("US"));
        assert_eq!(cert.province(), Some("Narnia"));
        assert!(!cert.is_ca());

        let plain = Certificate::parse(NO_PROVINCE).unwrap();
        assert_eq!(plain.province(), None);
    }

    #[test]
    fn test_validation_level_from_policies() {
        let level = |der: &[u8]| Certificate::parse(der).unwrap().validation_level();
        assert_eq!(level(STATE_UNKNOWN), ValidationLevel::Ov);
        assert_eq!(level(NO_PROVINCE), ValidationLevel::Dv);
        assert_eq!(level(WITH_CRL), ValidationLevel::Ev);
        assert_eq!(level(CA_LONG), ValidationLevel::Unknown);
    }

    #[test]
    fn test_report_fields_upper_case_country() {
        let cert = Certificate::parse(STATE_KNOWN).unwrap();
        let fields = cert.report_fields("note");
        assert_eq!(fields.len(), CERTIFICATE_COLUMNS.len());
        assert!(fields[0].starts_with(CRTSH_LINK_PREFIX));
        assert_eq!(fields[1], "OV");
        assert!(fields[2].contains("Crtscan Test CA"));
        assert_eq!(fields[3], "US");
        assert_eq!(fields[4], "California");
        assert!(fields[5].contains("ca.example.com"));
        assert!(fields[6].ends_with(" +0000 UTC"), "{}", fields[6]);
        assert_eq!(fields[6].len(), "2026-10-16 23:57:17 +0000 UTC".len());
        assert_eq!(fields[8], "note");
    }

    #[test]
    fn test_ca_flag_and_crl_urls() {
        assert!(Certificate::parse(CA_LONG).unwrap().is_ca());
        let cert = Certificate::parse(WITH_CRL).unwrap();
        assert_eq!(
            cert.crl_urls(),
            vec!["http://127.0.0.1:9/crtscan-test.crl".to_string()]
        );
        assert_eq!(cert.raw_serial(), &[0x10, 0x09]);
        assert!(cert.ocsp_urls().is_empty());
        assert!(Certificate::parse(STATE_UNKNOWN).unwrap().crl_urls().is_empty());
    }

    #[test]
    fn test_crl_urls_skip_ldap() {
        let cert = Certificate::parse(MULTI_CRL).unwrap();
        assert_eq!(
            cert.crl_urls(),
            vec![
                "http://127.0.0.1:9/crtscan-empty.crl".to_string(),
                "http://127.0.0.1:9/crtscan-test.crl".to_string(),
            ]
        );
    }

    #[test]
    fn test_ocsp_urls() {
        let cert = Certificate::parse(OCSP_ONLY).unwrap();
        assert_eq!(cert.ocsp_urls(), vec!["http://127.0.0.1:9/ocsp".to_string()]);
        assert!(cert.crl_urls().is_empty());
    }
}
