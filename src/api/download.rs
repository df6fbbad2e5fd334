use serde::{Deserialize, Serialize};

use crate::api::ErrorObject;

/// Certificate download response (`/download/return`).
///
/// # Example JSON
///
/// ```json
/// {
///   "certificate.crt": "-----BEGIN CERTIFICATE-----\nMIIG...",
///   "ca_bundle.crt": "-----BEGIN CERTIFICATE-----\nMIIG..."
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBundle {
    #[serde(rename = "certificate.crt", skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    #[serde(rename = "ca_bundle.crt", skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl CertificateBundle {
    /// Returns the certificate payload if it is present and not blank.
    pub fn certificate(&self) -> Option<&str> {
        self.certificate
            .as_deref()
            .filter(|cert| !cert.trim().is_empty())
    }
}
