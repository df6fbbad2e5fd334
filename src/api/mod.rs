//! JSON API payloads.
//!
//! Not intended to be used directly. Provided to aid debugging.

use std::fmt;

use serde::{Deserialize, Serialize};

mod certificate;
mod dns;
mod download;
mod message;
mod revocation;

pub use self::{
    certificate::{
        Certificate, CertificateStatus, CreateCertificate, DomainValidation, FileContent,
        Validation, ValidationRequest,
    },
    dns::{DnsMessage, DnsRecord, DnsRecordUpdate, DnsResponse, TokenStatus},
    download::CertificateBundle,
    message::{MessageResponse, PublicAddress, SendMessage},
    revocation::{Revocation, SuccessFlag, SuccessResponse},
};

/// Error object embedded in a ZeroSSL response.
///
/// ZeroSSL answers most logical failures with HTTP 200 and a body like:
///
/// ```json
/// {
///   "success": false,
///   "error": { "code": 2832, "type": "certificate_not_ready" }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,

    #[serde(rename = "type", default)]
    pub _type: String,
}

/// Displays the CA supplied type string unmodified.
impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self._type.is_empty() {
            match self.code {
                Some(code) => write!(f, "error code {code}"),
                None => f.write_str("unknown error"),
            }
        } else {
            f.write_str(&self._type)
        }
    }
}
