//! ZeroSSL REST API client.

use std::{fmt, str::FromStr};

use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::{
    api,
    error::{Error, Result, Service},
    req::{http_client, req_send},
    translate::ValidationMethod,
    util::read_json,
};

/// Operations the renewal needs from the certificate authority.
///
/// Implementations report transport faults as [`Error::Transport`] and error objects in an
/// otherwise successful response as [`Error::Api`], so callers never see an `error` field.
pub trait CaClient {
    /// Creates a certificate from a CSR. The response carries the validation details.
    fn create_certificate(&self, request: &api::CreateCertificate) -> Result<api::Certificate>;

    /// Asks the CA to check the published validation records.
    fn verify_domains(&self, id: &str, method: ValidationMethod) -> Result<api::Certificate>;

    /// Current state of a certificate.
    fn certificate(&self, id: &str) -> Result<api::Certificate>;

    /// Certificate and CA bundle of an issued certificate.
    fn download(&self, id: &str) -> Result<api::CertificateBundle>;

    /// Cancels a certificate that has not been issued yet.
    fn cancel(&self, id: &str) -> Result<()>;

    fn revoke(&self, id: &str, reason: RevocationReason) -> Result<()>;
}

/// Reasons the CA accepts for revocation.
///
/// A subset of the reason codes of [RFC 5280 §5.3.1].
///
/// [RFC 5280 §5.3.1]: https://tools.ietf.org/html/rfc5280#section-5.3.1
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RevocationReason {
    #[default]
    Unspecified,
    KeyCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Unspecified => "unspecified",
            RevocationReason::KeyCompromise => "keyCompromise",
            RevocationReason::AffiliationChanged => "affiliationChanged",
            RevocationReason::Superseded => "superseded",
            RevocationReason::CessationOfOperation => "cessationOfOperation",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevocationReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        [
            RevocationReason::Unspecified,
            RevocationReason::KeyCompromise,
            RevocationReason::AffiliationChanged,
            RevocationReason::Superseded,
            RevocationReason::CessationOfOperation,
        ]
        .into_iter()
        .find(|reason| reason.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("unknown revocation reason `{s}`"))
    }
}

/// Blocking client of the ZeroSSL certificates API.
#[derive(Debug, Clone)]
pub struct ZeroSsl {
    client: Client,
    base_url: String,
    access_key: String,
}

impl ZeroSsl {
    /// Creates a client against `base_url`, usually `https://api.zerossl.com`.
    pub fn new(base_url: &str, access_key: &str) -> Result<Self> {
        Ok(Self {
            client: http_client(Service::ZeroSsl)?,
            base_url: base_url.trim_end_matches('/').to_owned(),
            access_key: access_key.to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/certificates{path}", self.base_url)
    }

    fn call<T: DeserializeOwned>(&self, method: &str, path: &str, req: RequestBuilder) -> Result<T> {
        log::debug!("Call endpoint: {method} /certificates{path}");
        let res = req_send(Service::ZeroSsl, req.query(&[("access_key", &self.access_key)]))?;
        read_json(Service::ZeroSsl, res)
    }

    fn get_certificate(&self, method: &str, path: &str, req: RequestBuilder) -> Result<api::Certificate> {
        let cert: api::Certificate = self.call(method, path, req)?;

        if let Some(err) = &cert.error {
            return Err(Error::api(Service::ZeroSsl, err));
        }

        Ok(cert)
    }

    fn confirm(&self, what: &str, id: &str, res: api::SuccessResponse) -> Result<()> {
        if let Some(err) = &res.error {
            return Err(Error::api(Service::ZeroSsl, err));
        }

        match res.success {
            Some(flag) if flag.is_success() => Ok(()),
            Some(_) => Err(Error::Api {
                service: Service::ZeroSsl,
                reason: format!("request accepted but certificate {id} was not {what}"),
            }),
            None => Err(Error::UnexpectedResponse(format!(
                "{what} response for {id} has no success flag"
            ))),
        }
    }
}

impl CaClient for ZeroSsl {
    fn create_certificate(&self, request: &api::CreateCertificate) -> Result<api::Certificate> {
        let req = self.client.post(self.url("")).json(request);
        let cert = self.get_certificate("POST", "", req)?;

        log::info!(
            "Created certificate {} for {}",
            cert.id.as_deref().unwrap_or("<no id>"),
            request.certificate_domains
        );

        Ok(cert)
    }

    fn verify_domains(&self, id: &str, method: ValidationMethod) -> Result<api::Certificate> {
        let path = format!("/{}/challenges", checked_id(id)?);
        let form = api::ValidationRequest {
            validation_method: method.as_str(),
        };
        let req = self.client.post(self.url(&path)).form(&form);
        self.get_certificate("POST", &path, req)
    }

    fn certificate(&self, id: &str) -> Result<api::Certificate> {
        let path = format!("/{}", checked_id(id)?);
        let req = self.client.get(self.url(&path));
        self.get_certificate("GET", &path, req)
    }

    fn download(&self, id: &str) -> Result<api::CertificateBundle> {
        let path = format!("/{}/download/return", checked_id(id)?);
        let req = self.client.get(self.url(&path));
        let bundle: api::CertificateBundle = self.call("GET", &path, req)?;

        if let Some(err) = &bundle.error {
            return Err(Error::api(Service::ZeroSsl, err));
        }

        Ok(bundle)
    }

    fn cancel(&self, id: &str) -> Result<()> {
        let path = format!("/{}/cancel", checked_id(id)?);
        let req = self.client.post(self.url(&path));
        let res = self.call("POST", &path, req)?;
        self.confirm("cancelled", id, res)
    }

    fn revoke(&self, id: &str, reason: RevocationReason) -> Result<()> {
        let path = format!("/{}/revoke", checked_id(id)?);
        let form = api::Revocation {
            reason: reason.as_str(),
        };
        let req = self.client.post(self.url(&path)).form(&form);
        let res = self.call("POST", &path, req)?;
        self.confirm("revoked", id, res)
    }
}

/// Certificate IDs are hex hashes; anything else would change the request path.
fn checked_id(id: &str) -> Result<&str> {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(id)
    } else {
        Err(Error::Local(format!("invalid certificate ID `{id}`")))
    }
}
