//! Turns a certificate creation response into per-domain validation records.

use std::{
    fmt,
    path::{Component, Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{
    api,
    csr::CertificateRequest,
    error::{Error, Result},
};

/// Domain control validation method, as named by the CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationMethod {
    /// A CNAME record derived from the CSR hash.
    #[serde(rename = "CNAME_CSR_HASH")]
    CnameCsrHash,

    /// A file served over HTTPS under `/.well-known/pki-validation/`.
    #[serde(rename = "HTTPS_CSR_HASH")]
    HttpsCsrHash,

    /// Same as [`HttpsCsrHash`](Self::HttpsCsrHash) but served over plain HTTP.
    #[serde(rename = "HTTP_CSR_HASH")]
    HttpCsrHash,
}

impl ValidationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationMethod::CnameCsrHash => "CNAME_CSR_HASH",
            ValidationMethod::HttpsCsrHash => "HTTPS_CSR_HASH",
            ValidationMethod::HttpCsrHash => "HTTP_CSR_HASH",
        }
    }

    pub fn is_cname(&self) -> bool {
        matches!(self, ValidationMethod::CnameCsrHash)
    }
}

impl fmt::Display for ValidationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CNAME_CSR_HASH" | "CNAME" => Ok(ValidationMethod::CnameCsrHash),
            "HTTPS_CSR_HASH" | "HTTPS" => Ok(ValidationMethod::HttpsCsrHash),
            "HTTP_CSR_HASH" | "HTTP" => Ok(ValidationMethod::HttpCsrHash),
            _ => Err(format!(
                "unknown validation method `{s}`, expected CNAME_CSR_HASH, HTTPS_CSR_HASH or HTTP_CSR_HASH"
            )),
        }
    }
}

/// What has to be published for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationKind {
    /// Point the record `name` at `value`.
    Cname { name: String, value: String },

    /// Serve `content` at `path`, relative to the web root.
    HttpFile { path: PathBuf, content: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecord {
    pub domain: String,
    pub kind: ValidationKind,
}

/// Validation records of one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeData {
    /// Certificate ID at the CA.
    pub id: String,

    pub common_name: ChallengeRecord,

    /// Present exactly when an alternate name was requested.
    pub additional_domains: Option<ChallengeRecord>,
}

impl ChallengeData {
    /// All records, common name first.
    pub fn records(&self) -> impl Iterator<Item = &ChallengeRecord> {
        std::iter::once(&self.common_name).chain(self.additional_domains.as_ref())
    }
}

/// Extracts the records relevant to `method` from a creation response.
///
/// Fails with [`Error::UnexpectedResponse`] when the response lacks the validation details of
/// a requested domain, e.g. when the CA changed its schema.
pub fn translate(
    cert: &api::Certificate,
    request: &CertificateRequest,
    method: ValidationMethod,
) -> Result<ChallengeData> {
    let id = cert
        .id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::UnexpectedResponse("certificate has no id".to_owned()))?;

    let methods = cert
        .validation
        .as_ref()
        .map(|validation| &validation.other_methods)
        .ok_or_else(|| {
            Error::UnexpectedResponse(format!("certificate {id} has no validation details"))
        })?;

    // look up by domain: the alternate name is optional
    let record_for = |domain: &str| -> Result<ChallengeRecord> {
        let details = methods.get(domain).ok_or_else(|| {
            Error::UnexpectedResponse(format!("no validation details for {domain}"))
        })?;

        Ok(ChallengeRecord {
            domain: domain.to_owned(),
            kind: validation_kind(domain, details, method)?,
        })
    };

    let common_name = record_for(request.common_name.as_str())?;
    let additional_domains = request.alt_name.as_deref().map(record_for).transpose()?;

    Ok(ChallengeData {
        id: id.to_owned(),
        common_name,
        additional_domains,
    })
}

fn validation_kind(
    domain: &str,
    details: &api::DomainValidation,
    method: ValidationMethod,
) -> Result<ValidationKind> {
    let missing = |field: &str| Error::UnexpectedResponse(format!("{field} missing for {domain}"));

    match method {
        ValidationMethod::CnameCsrHash => {
            let name = non_empty(details.cname_validation_p1.as_deref())
                .ok_or_else(|| missing("cname_validation_p1"))?;
            let value = non_empty(details.cname_validation_p2.as_deref())
                .ok_or_else(|| missing("cname_validation_p2"))?;

            Ok(ValidationKind::Cname {
                name: name.to_owned(),
                value: value.to_owned(),
            })
        }

        ValidationMethod::HttpsCsrHash | ValidationMethod::HttpCsrHash => {
            let (scheme, url) = if method == ValidationMethod::HttpsCsrHash {
                ("https", details.file_validation_url_https.as_deref())
            } else {
                ("http", details.file_validation_url_http.as_deref())
            };

            let url = non_empty(url).ok_or_else(|| missing("file validation url"))?;
            let content = details
                .file_validation_content
                .as_ref()
                .filter(|content| !content.is_empty())
                .ok_or_else(|| missing("file_validation_content"))?;

            Ok(ValidationKind::HttpFile {
                path: relative_path(url, scheme, domain)?,
                content: content.to_text(),
            })
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

/// Strips `<scheme>://<domain>/` from `url`, leaving a path safe to join onto a web root.
fn relative_path(url: &str, scheme: &str, domain: &str) -> Result<PathBuf> {
    let prefix = format!("{scheme}://{domain}/");

    let rest = url
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(&prefix))
        .map(|_| &url[prefix.len()..])
        .ok_or_else(|| {
            Error::UnexpectedResponse(format!("validation url {url} is not under {prefix}"))
        })?;

    // the CA may append a query string; it is not part of the file name
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let path = Path::new(rest);

    let safe = path.components().next().is_some()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

    if !safe {
        return Err(Error::UnexpectedResponse(format!(
            "validation url {url} does not name a file below the web root"
        )));
    }

    Ok(path.to_path_buf())
}
