use std::fmt;

use serde::{Deserialize, Serialize};

/// Body of a DNS record update.
///
/// Validation records must not be proxied, otherwise the CA resolves the proxy instead of
/// the CNAME target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecordUpdate<'a> {
    #[serde(rename = "type")]
    pub _type: &'a str,
    pub name: &'a str,
    pub content: &'a str,
    pub proxiable: bool,
    pub proxied: bool,

    /// `1` means automatic, the shortest TTL the provider allows.
    pub ttl: u32,
}

impl<'a> DnsRecordUpdate<'a> {
    pub fn cname(name: &'a str, content: &'a str) -> Self {
        Self {
            _type: "CNAME",
            name,
            content,
            proxiable: false,
            proxied: false,
            ttl: 1,
        }
    }
}

/// Envelope of every Cloudflare v4 response.
///
/// # Example JSON
///
/// ```json
/// {
///   "success": false,
///   "errors": [{ "code": 81044, "message": "Record does not exist." }],
///   "messages": [],
///   "result": null
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsResponse<T> {
    pub success: bool,

    #[serde(default)]
    pub errors: Vec<DnsMessage>,

    #[serde(default)]
    pub messages: Vec<DnsMessage>,

    pub result: Option<T>,
}

impl<T> DnsResponse<T> {
    /// Joins all reported errors into one line.
    pub fn error_text(&self) -> String {
        if self.errors.is_empty() {
            return "request not successful and no error given".to_owned();
        }

        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsMessage {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for DnsMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: String,

    #[serde(rename = "type")]
    pub _type: String,

    pub name: String,
    pub content: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxied: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
}

/// Result of the token verification endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStatus {
    pub id: String,
    pub status: String,
}

impl TokenStatus {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}
