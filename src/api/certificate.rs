use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::api::ErrorObject;

/// Certificate creation request.
///
/// # Example JSON
///
/// ```json
/// {
///   "certificate_domains": "example.com,www.example.com",
///   "certificate_validity_days": 90,
///   "certificate_csr": "-----BEGIN CERTIFICATE REQUEST-----MIIC..."
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCertificate {
    /// Comma separated list of domains, common name first.
    pub certificate_domains: String,

    pub certificate_validity_days: u32,

    /// PEM encoded CSR with line breaks removed.
    pub certificate_csr: String,
}

/// Form body for the challenge endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationRequest<'a> {
    pub validation_method: &'a str,
}

/// Lifecycle status of a certificate, as defined by the CA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CertificateStatus {
    /// Created, challenge not yet completed.
    Draft,

    /// Challenge passed, CA is issuing.
    PendingValidation,

    Issued,
    Cancelled,
    Revoked,
    Expired,

    /// Any value this client does not know about.
    Other(String),
}

impl CertificateStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CertificateStatus::Draft => "draft",
            CertificateStatus::PendingValidation => "pending_validation",
            CertificateStatus::Issued => "issued",
            CertificateStatus::Cancelled => "cancelled",
            CertificateStatus::Revoked => "revoked",
            CertificateStatus::Expired => "expired",
            CertificateStatus::Other(other) => other,
        }
    }
}

impl From<String> for CertificateStatus {
    fn from(status: String) -> Self {
        match status.as_str() {
            "draft" => CertificateStatus::Draft,
            "pending_validation" => CertificateStatus::PendingValidation,
            "issued" => CertificateStatus::Issued,
            "cancelled" => CertificateStatus::Cancelled,
            "revoked" => CertificateStatus::Revoked,
            "expired" => CertificateStatus::Expired,
            _ => CertificateStatus::Other(status),
        }
    }
}

impl From<CertificateStatus> for String {
    fn from(status: CertificateStatus) -> Self {
        status.as_str().to_owned()
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ZeroSSL certificate object.
///
/// Returned by the create, challenge and info endpoints. Either `error` is set or the
/// remaining fields describe the certificate.
///
/// # Example JSON
///
/// ```json
/// {
///   "id": "a8f6e0d3b2c1",
///   "common_name": "example.com",
///   "additional_domains": "www.example.com",
///   "created": "2025-01-05 10:00:00",
///   "expires": "2025-04-05 23:59:59",
///   "status": "draft",
///   "validation": {
///     "other_methods": {
///       "example.com": {
///         "file_validation_url_http": "http://example.com/.well-known/pki-validation/ABCD.txt",
///         "file_validation_url_https": "https://example.com/.well-known/pki-validation/ABCD.txt",
///         "file_validation_content": ["3F2A...", "comodoca.com", "a7c3..."],
///         "cname_validation_p1": "_ABCD.example.com",
///         "cname_validation_p2": "3F2A.a7c3.ssl.com"
///       }
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CertificateStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_domains: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    /// Uses `YYYY-MM-DD HH:MM:SS` format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    /// Per-domain validation details, keyed by domain name.
    #[serde(default)]
    pub other_methods: BTreeMap<String, DomainValidation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainValidation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cname_validation_p1: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cname_validation_p2: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_validation_url_http: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_validation_url_https: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_validation_content: Option<FileContent>,
}

/// Content of a validation file.
///
/// ZeroSSL sends it as an array of lines; older responses used a single string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileContent {
    Lines(Vec<String>),
    Text(String),
}

impl FileContent {
    /// Text to write into the validation file.
    pub fn to_text(&self) -> String {
        match self {
            FileContent::Lines(lines) => lines.join("\n"),
            FileContent::Text(text) => text.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FileContent::Lines(lines) => lines.iter().all(|line| line.is_empty()),
            FileContent::Text(text) => text.is_empty(),
        }
    }
}
