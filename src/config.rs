//! Operator configuration.
//!
//! The configuration is a JSON file shared with the rest of the operator's tooling, so the
//! section and key names follow that file rather than Rust conventions:
//!
//! ```json
//! {
//!   "Certificate": {
//!     "Config": "/etc/zerossl/csr.conf",
//!     "CSR": "/etc/zerossl/domain.csr",
//!     "PendingPK": "/etc/zerossl/pending.key",
//!     "PK": "/etc/ssl/private/domain.key",
//!     "CA": "/etc/ssl/certs/domain.crt",
//!     "CAB": "/etc/ssl/certs/ca_bundle.crt",
//!     "Country": "JP",
//!     "StateOrProvince": "Tokyo",
//!     "Locality": "Toshima",
//!     "Organization": "Example",
//!     "OrganizationalUnit": "Ops",
//!     "Domains": ["example.com", "www.example.com"]
//!   },
//!   "ZeroSSLAPI": { "AccessKey": "...", "Cache": "/var/lib/zerossl/cache.json" },
//!   "CloudflareAPI": { "Token": "...", "Mail": "ops@example.com" },
//!   "CloudflareRecords": { "ZoneID": "...", "CNAMERecordsID": ["...", "..."] },
//!   "Telegram_BOTs": { "Token": "...", "ChatID": "..." }
//! }
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{de, Deserialize, Deserializer};

use crate::{
    csr::{CertificateRequest, DistinguishedName},
    error::{Error, Result},
    install::SigningMaterial,
    retry::RetryPolicy,
    translate::ValidationMethod,
};

const ZEROSSL_URL: &str = "https://api.zerossl.com";
const CLOUDFLARE_URL: &str = "https://api.cloudflare.com/client/v4";
const TELEGRAM_URL: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(rename = "Certificate")]
    pub certificate: CertificateSettings,

    #[serde(rename = "ZeroSSLAPI")]
    pub zerossl: ZeroSslSettings,

    #[serde(rename = "CloudflareAPI", default)]
    pub cloudflare: Option<CloudflareSettings>,

    #[serde(rename = "CloudflareRecords", default)]
    pub records: Option<CloudflareRecords>,

    #[serde(rename = "Telegram_BOTs", default)]
    pub telegram: Option<TelegramSettings>,

    #[serde(rename = "Renewal", default)]
    pub renewal: RenewalSettings,

    #[serde(rename = "SelfSigned", default)]
    pub self_signed: Option<SelfSignedSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateSettings {
    /// Where the rendered openssl request config is written.
    #[serde(rename = "Config")]
    pub csr_config: PathBuf,

    #[serde(rename = "CSR")]
    pub csr: PathBuf,

    #[serde(rename = "PendingPK")]
    pub pending_key: PathBuf,

    #[serde(rename = "PK")]
    pub active_key: PathBuf,

    #[serde(rename = "CA")]
    pub certificate: PathBuf,

    #[serde(rename = "CAB")]
    pub ca_bundle: PathBuf,

    // older configuration files carry the misspelt key
    #[serde(rename = "Country", alias = "Counrty")]
    pub country: String,

    #[serde(rename = "StateOrProvince")]
    pub state: String,

    #[serde(rename = "Locality")]
    pub locality: String,

    #[serde(rename = "Organization")]
    pub organization: String,

    #[serde(rename = "OrganizationalUnit")]
    pub unit: String,

    #[serde(rename = "Domains")]
    pub domains: Vec<String>,

    #[serde(rename = "ValidityDays", default = "default_validity_days")]
    pub validity_days: u32,

    /// Document root the web server serves validation files from.
    #[serde(rename = "Webroot", default)]
    pub webroot: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZeroSslSettings {
    #[serde(rename = "AccessKey")]
    pub access_key: String,

    /// Validation cache holding the last creation response.
    #[serde(rename = "Cache")]
    pub cache: PathBuf,

    #[serde(rename = "URL", default = "default_zerossl_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudflareSettings {
    #[serde(rename = "Token")]
    pub token: String,

    #[serde(rename = "Mail", default)]
    pub mail: Option<String>,

    #[serde(rename = "URL", default = "default_cloudflare_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudflareRecords {
    #[serde(rename = "ZoneID")]
    pub zone_id: String,

    /// Record IDs of the validation CNAMEs, in the same order as the domains.
    #[serde(rename = "CNAMERecordsID", default)]
    pub cname_record_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramSettings {
    #[serde(rename = "Token")]
    pub token: String,

    #[serde(rename = "ChatID", deserialize_with = "string_or_number")]
    pub chat_id: String,

    #[serde(rename = "URL", default = "default_telegram_url")]
    pub url: String,
}

/// Timing and retry knobs of a renewal run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenewalSettings {
    /// Renew once this many days or fewer are left.
    #[serde(rename = "ThresholdDays")]
    pub threshold_days: i64,

    #[serde(rename = "ValidationMethod")]
    pub validation_method: ValidationMethod,

    /// Wait between publishing validation records and asking the CA to check them.
    #[serde(rename = "PropagationSeconds")]
    pub propagation_secs: u64,

    #[serde(rename = "Verification")]
    pub verification: RetrySettings,

    #[serde(rename = "Download")]
    pub download: RetrySettings,

    /// Pause after writing the files, before reloading the server.
    #[serde(rename = "SettleSeconds")]
    pub settle_secs: u64,

    /// Command reloading the server, e.g. `["sudo", "systemctl", "reload", "nginx"]`.
    #[serde(rename = "ReloadCommand")]
    pub reload_command: Option<Vec<String>>,
}

impl Default for RenewalSettings {
    fn default() -> Self {
        Self {
            threshold_days: 14,
            validation_method: ValidationMethod::CnameCsrHash,
            propagation_secs: 15,
            verification: RetrySettings {
                attempts: 5,
                interval_secs: 30,
            },
            download: RetrySettings {
                attempts: 5,
                interval_secs: 10,
            },
            settle_secs: 5,
            reload_command: None,
        }
    }
}

impl RenewalSettings {
    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs(self.propagation_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetrySettings {
    #[serde(rename = "Attempts")]
    pub attempts: u32,

    #[serde(rename = "IntervalSeconds")]
    pub interval_secs: u64,
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        RetryPolicy::new(
            settings.attempts,
            Duration::from_secs(settings.interval_secs),
        )
    }
}

/// Self-signed certificate for `localhost` and the host's public addresses.
#[derive(Debug, Clone, Deserialize)]
pub struct SelfSignedSettings {
    #[serde(rename = "Days", default = "default_self_signed_days")]
    pub days: u32,

    #[serde(rename = "Config")]
    pub config: PathBuf,

    #[serde(rename = "PK")]
    pub key: PathBuf,

    #[serde(rename = "CA")]
    pub certificate: PathBuf,

    /// Look up the public IPv4/IPv6 address and add them as IP SANs.
    #[serde(rename = "LookupAddresses", default = "default_true")]
    pub lookup_addresses: bool,
}

fn default_validity_days() -> u32 {
    90
}

fn default_self_signed_days() -> u32 {
    47
}

fn default_true() -> bool {
    true
}

fn default_zerossl_url() -> String {
    ZEROSSL_URL.to_owned()
}

fn default_cloudflare_url() -> String {
    CLOUDFLARE_URL.to_owned()
}

fn default_telegram_url() -> String {
    TELEGRAM_URL.to_owned()
}

/// Chat IDs are numeric but often quoted in hand-written files.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(text) if text.is_empty() => Err(de::Error::custom("ChatID is empty")),
        Raw::Text(text) => Ok(text),
        Raw::Number(number) => Ok(number.to_string()),
    }
}

impl Settings {
    /// Reads and parses the configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let text = fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("cannot read {}: {err}", path.display()))
        })?;

        serde_json::from_str(&text)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| Error::Config(err.to_string()))
    }

    /// Configured domains with empty entries dropped.
    pub fn domains(&self) -> Vec<&str> {
        self.certificate
            .domains
            .iter()
            .map(|domain| domain.trim())
            .filter(|domain| !domain.is_empty())
            .collect()
    }

    /// Checks the local preconditions of a renewal run with `method`.
    pub fn validate(&self, method: ValidationMethod) -> Result<()> {
        let first = self
            .certificate
            .domains
            .first()
            .map(|domain| domain.trim())
            .unwrap_or_default();

        if first.is_empty() {
            return Err(Error::Config("no common name in Certificate.Domains".to_owned()));
        }

        if self.domains().len() > 2 {
            return Err(Error::Config(
                "at most two domains (common name and one alternate name) are supported"
                    .to_owned(),
            ));
        }

        if self.zerossl.access_key.trim().is_empty() {
            return Err(Error::Config("ZeroSSLAPI.AccessKey is empty".to_owned()));
        }

        if self.certificate.validity_days == 0 {
            return Err(Error::Config("Certificate.ValidityDays must be positive".to_owned()));
        }

        if method.is_cname() {
            if self.cloudflare.is_none() {
                return Err(Error::Config(
                    "CNAME validation needs a CloudflareAPI section".to_owned(),
                ));
            }

            let ids = self.record_ids()?;
            if ids.len() < self.domains().len() {
                return Err(Error::Config(format!(
                    "CloudflareRecords.CNAMERecordsID has {} IDs for {} domains",
                    ids.len(),
                    self.domains().len()
                )));
            }
        } else if self.certificate.webroot.is_none() {
            return Err(Error::Config(
                "file validation needs Certificate.Webroot".to_owned(),
            ));
        }

        Ok(())
    }

    /// CNAME record IDs, one per configured domain.
    pub fn record_ids(&self) -> Result<&[String]> {
        self.records
            .as_ref()
            .map(|records| records.cname_record_ids.as_slice())
            .ok_or_else(|| Error::Config("CloudflareRecords section is missing".to_owned()))
    }

    pub fn certificate_request(&self) -> Result<CertificateRequest> {
        let domains = self.domains();
        let common_name = domains
            .first()
            .ok_or_else(|| Error::Config("no common name in Certificate.Domains".to_owned()))?;

        let cert = &self.certificate;
        Ok(CertificateRequest {
            common_name: (*common_name).to_owned(),
            alt_name: domains.get(1).map(|domain| (*domain).to_owned()),
            subject: DistinguishedName {
                country: cert.country.clone(),
                state: cert.state.clone(),
                locality: cert.locality.clone(),
                organization: cert.organization.clone(),
                unit: cert.unit.clone(),
            },
            validity_days: cert.validity_days,
        })
    }

    pub fn signing_material(&self) -> SigningMaterial {
        let cert = &self.certificate;
        SigningMaterial {
            csr_config: cert.csr_config.clone(),
            csr: cert.csr.clone(),
            pending_key: cert.pending_key.clone(),
            active_key: cert.active_key.clone(),
            certificate: cert.certificate.clone(),
            ca_bundle: cert.ca_bundle.clone(),
        }
    }
}
