//! Cloudflare DNS record updates for CNAME validation.

use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::{
    api::{DnsRecord, DnsRecordUpdate, DnsResponse, TokenStatus},
    config::CloudflareSettings,
    error::{Error, Result, Service},
    req::{http_client, req_send},
    util::read_json,
};

/// Points pre-created DNS records at new values.
pub trait DnsRecordUpdater {
    /// Overwrites record `record_id` with a CNAME from `name` to `value`.
    fn update_cname(&self, record_id: &str, name: &str, value: &str) -> Result<()>;
}

/// Cloudflare v4 API client scoped to one zone.
#[derive(Debug, Clone)]
pub struct Cloudflare {
    client: Client,
    base_url: String,
    zone_id: String,
    token: String,
    mail: Option<String>,
}

impl Cloudflare {
    pub fn new(settings: &CloudflareSettings, zone_id: &str) -> Result<Self> {
        Ok(Self {
            client: http_client(Service::Cloudflare)?,
            base_url: settings.url.trim_end_matches('/').to_owned(),
            zone_id: zone_id.to_owned(),
            token: settings.token.clone(),
            mail: settings.mail.clone().filter(|mail| !mail.is_empty()),
        })
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.bearer_auth(&self.token);

        match &self.mail {
            Some(mail) => req.header("X-Auth-Email", mail),
            None => req,
        }
    }

    fn call<T: DeserializeOwned>(&self, path: &str, req: RequestBuilder) -> Result<T> {
        let res = req_send(Service::Cloudflare, self.authorize(req))?;
        let res: DnsResponse<T> = read_json(Service::Cloudflare, res)?;

        if !res.success {
            return Err(Error::Api {
                service: Service::Cloudflare,
                reason: res.error_text(),
            });
        }

        res.result.ok_or_else(|| {
            Error::UnexpectedResponse(format!("Cloudflare response to {path} has no result"))
        })
    }

    /// Checks that the API token is valid and active.
    pub fn verify_token(&self) -> Result<TokenStatus> {
        let path = "/user/tokens/verify";
        log::debug!("Call endpoint: GET {path}");

        let req = self.client.get(format!("{}{path}", self.base_url));
        let status: TokenStatus = self.call(path, req)?;

        if !status.is_active() {
            return Err(Error::Api {
                service: Service::Cloudflare,
                reason: format!("token {} is {}", status.id, status.status),
            });
        }

        Ok(status)
    }

    /// Lists the zone's records, optionally only those of type `record_type`.
    ///
    /// Useful to look up the record IDs the configuration needs.
    pub fn list_records(&self, record_type: Option<&str>) -> Result<Vec<DnsRecord>> {
        let path = format!("/zones/{}/dns_records", self.zone_id);
        log::debug!("Call endpoint: GET {path}");

        let mut req = self.client.get(format!("{}{path}", self.base_url));
        if let Some(record_type) = record_type {
            req = req.query(&[("type", record_type)]);
        }

        self.call(&path, req)
    }
}

impl DnsRecordUpdater for Cloudflare {
    fn update_cname(&self, record_id: &str, name: &str, value: &str) -> Result<()> {
        let path = format!("/zones/{}/dns_records/{record_id}", self.zone_id);
        log::debug!("Call endpoint: PUT {path}");

        let req = self
            .client
            .put(format!("{}{path}", self.base_url))
            .json(&DnsRecordUpdate::cname(name, value));

        let record: DnsRecord = self.call(&path, req)?;
        log::info!("Updated DNS record {}: {} -> {}", record.id, record.name, record.content);

        Ok(())
    }
}
