use std::{fmt, io, path::PathBuf};

use thiserror::Error;

use crate::api::ErrorObject;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// External service an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    ZeroSsl,
    Cloudflare,
    Telegram,
    IpLookup,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Service::ZeroSsl => "ZeroSSL",
            Service::Cloudflare => "Cloudflare",
            Service::Telegram => "Telegram",
            Service::IpLookup => "IP lookup",
        })
    }
}

/// Errors raised while renewing a certificate.
///
/// Variants are ordered by how the orchestrator classifies them: transport faults first,
/// then logical errors reported by an API, then local preconditions.
#[derive(Debug, Error)]
pub enum Error {
    /// Non-2xx status, connection fault or timeout.
    #[error("{service} unreachable: {message}")]
    Transport {
        service: Service,
        status: Option<u16>,
        message: String,
    },

    /// A 2xx response whose payload signals failure.
    #[error("{service} API error: {reason}")]
    Api { service: Service, reason: String },

    /// The response decoded but lacks the fields this client relies on.
    #[error("unexpected API response: {0}")]
    UnexpectedResponse(String),

    /// Missing file, failed subprocess or similar.
    #[error("{0}")]
    Local(String),

    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The CA still reports `draft` after the challenge was triggered.
    #[error("certificate {id} is not verified yet")]
    NotVerified { id: String },

    /// The CA reported a status this client does not know how to progress.
    #[error("certificate {id} has unexpected status `{status}`")]
    UnknownStatus { id: String, status: String },

    /// A bounded retry loop ran out of attempts.
    ///
    /// `last` holds the transport error of the final attempt, if that is how it failed.
    #[error("{operation} did not complete after {attempts} attempts{}", last_cause(.last))]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        last: Option<Box<Error>>,
    },

    /// Writing one of the active key/certificate files failed.
    #[error("failed to install {}: {source}", path.display())]
    Install { path: PathBuf, source: io::Error },

    /// The certificate files were installed but the reload command failed.
    #[error("certificate installed but server reload failed (exit code {code:?}): {stderr}")]
    ReloadFailed { code: Option<i32>, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn last_cause(last: &Option<Box<Error>>) -> String {
    last.as_ref().map(|err| format!(": {err}")).unwrap_or_default()
}

impl Error {
    pub(crate) fn api(service: Service, err: &ErrorObject) -> Self {
        Error::Api {
            service,
            reason: err.to_string(),
        }
    }

    /// Returns true for errors the designated retry loops may absorb.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    /// HTTP status code of a transport error, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        let err = Error::Transport {
            service: Service::ZeroSsl,
            status: Some(502),
            message: "502 Bad Gateway".to_owned(),
        };
        assert!(err.is_transport());
        assert_eq!(err.status(), Some(502));
        assert!(err.to_string().contains("ZeroSSL"));

        let err = Error::Api {
            service: Service::Cloudflare,
            reason: "Invalid record id".to_owned(),
        };
        assert!(!err.is_transport());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn exhausted_retries_name_the_last_fault() {
        let err = Error::RetriesExhausted {
            operation: "verification",
            attempts: 3,
            last: Some(Box::new(Error::Transport {
                service: Service::ZeroSsl,
                status: None,
                message: "timed out after 30s".to_owned(),
            })),
        };
        assert_eq!(
            err.to_string(),
            "verification did not complete after 3 attempts: ZeroSSL unreachable: timed out after 30s"
        );

        let err = Error::RetriesExhausted {
            operation: "verification",
            attempts: 3,
            last: None,
        };
        assert_eq!(err.to_string(), "verification did not complete after 3 attempts");
    }

    #[test]
    fn api_error_keeps_reported_type_verbatim() {
        let err = Error::api(
            Service::ZeroSsl,
            &ErrorObject {
                code: Some(2831),
                _type: "certificate_not_found".to_owned(),
            },
        );
        assert_eq!(err.to_string(), "ZeroSSL API error: certificate_not_found");
    }
}
