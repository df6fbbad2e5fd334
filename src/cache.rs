//! Validation cache: the last certificate object received from the CA.
//!
//! Provides the certificate ID for resuming a run and the expiry date for deciding whether a
//! renewal is due.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use time::{macros::format_description, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::{
    api::{Certificate, CertificateStatus},
    error::{Error, Result},
};

/// Outcome of the expiry check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// The certificate expires within the threshold.
    Due { days_left: i64 },

    NotDue { days_left: i64 },

    /// No issued certificate on record, e.g. on the first run.
    Unknown,
}

impl Expiry {
    pub fn is_due(&self) -> bool {
        !matches!(self, Expiry::NotDue { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ValidationCache {
    path: PathBuf,
}

impl ValidationCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the cached certificate object; `None` if there is no cache file yet.
    pub fn load(&self) -> Result<Option<Certificate>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::Local(format!(
                    "cannot read validation cache {}: {err}",
                    self.path.display()
                )))
            }
        };

        serde_json::from_str(&text).map(Some).map_err(|err| {
            Error::Local(format!(
                "validation cache {} is corrupt: {err}",
                self.path.display()
            ))
        })
    }

    pub fn save(&self, cert: &Certificate) -> Result<()> {
        let json = serde_json::to_string_pretty(cert)?;

        fs::write(&self.path, json).map_err(|err| {
            Error::Local(format!(
                "cannot write validation cache {}: {err}",
                self.path.display()
            ))
        })?;

        log::debug!("Saved validation cache to {}", self.path.display());
        Ok(())
    }

    /// Records `cert` as issued once its files are installed.
    ///
    /// The expiry is taken from the installed certificate when it could be read, so the next
    /// expiry check sees what the web server actually serves.
    pub fn save_issued(&self, mut cert: Certificate, not_after: Option<OffsetDateTime>) -> Result<()> {
        cert.status = Some(CertificateStatus::Issued);

        if let Some(expires) = not_after.and_then(format_expires) {
            cert.expires = Some(expires);
        }

        self.save(&cert)
    }

    /// ID of the cached certificate, used when the operator gives none.
    pub fn certificate_id(&self) -> Result<String> {
        self.load()?
            .and_then(|cert| cert.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Error::Local(format!(
                    "no certificate ID given and none cached in {}",
                    self.path.display()
                ))
            })
    }

    /// Checks the cached certificate against `threshold_days`.
    pub fn expiry(&self, threshold_days: i64) -> Result<Expiry> {
        let cert = self.load()?;
        Ok(check_expiry(
            cert.as_ref(),
            threshold_days,
            OffsetDateTime::now_utc(),
        ))
    }
}

/// Decides whether `cert` needs renewing at `now`.
///
/// Only issued certificates count: a cache left behind by a run that never got its
/// certificate issued says nothing about the one being served.
pub fn check_expiry(cert: Option<&Certificate>, threshold_days: i64, now: OffsetDateTime) -> Expiry {
    let Some(cert) = cert.filter(|cert| cert.status == Some(CertificateStatus::Issued)) else {
        return Expiry::Unknown;
    };

    let Some(expires) = cert.expires.as_deref().and_then(parse_expires) else {
        log::warn!("Cached certificate has no readable expiry date");
        return Expiry::Unknown;
    };

    let days_left = (expires - now).whole_days();

    if days_left > threshold_days {
        Expiry::NotDue { days_left }
    } else {
        Expiry::Due { days_left }
    }
}

/// Formats `at` the way the CA writes `expires`.
fn format_expires(at: OffsetDateTime) -> Option<String> {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    at.to_offset(UtcOffset::UTC).format(format).ok()
}

/// Parses the CA's `YYYY-MM-DD HH:MM:SS` timestamps, which are UTC.
fn parse_expires(expires: &str) -> Option<OffsetDateTime> {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

    PrimitiveDateTime::parse(expires.trim(), format)
        .map(PrimitiveDateTime::assume_utc)
        .ok()
}
