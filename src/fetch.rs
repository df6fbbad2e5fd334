//! Certificate download.

use der::{
    time::{OffsetDateTime, PrimitiveDateTime},
    Decode as _,
};

use crate::{
    ca::CaClient,
    error::{Error, Result},
    retry::{RetryPolicy, Sleeper},
};

/// A downloaded certificate whose payload parsed as X.509.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// PEM text exactly as returned by the CA.
    pub certificate: String,

    /// PEM chain exactly as returned by the CA, empty if none was sent.
    pub ca_bundle: String,

    /// Whole days until the certificate expires, `None` if the date could not be read.
    pub days_left: Option<i64>,

    /// Expiry date of the certificate, `None` if it could not be read.
    pub not_after: Option<OffsetDateTime>,
}

/// Downloads certificate `id`, retrying while the CA has not produced the artifact yet.
///
/// Missing or blank payloads and transport errors use up an attempt. Errors reported by the
/// CA and payloads that are not a certificate end the loop.
pub fn fetch(
    ca: &dyn CaClient,
    id: &str,
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<IssuedCertificate> {
    let mut last = None;

    for attempt in 1..=policy.max_attempts() {
        if attempt > 1 {
            sleeper.sleep(policy.interval());
        }

        let bundle = match ca.download(id) {
            Ok(bundle) => bundle,
            Err(err) if err.is_transport() => {
                log::warn!("Download attempt {attempt} failed: {err}");
                last = Some(Box::new(err));
                continue;
            }
            Err(err) => return Err(err),
        };

        last = None;

        let Some(certificate) = bundle.certificate() else {
            log::warn!(
                "Certificate {id} not ready for download ({attempt}/{})",
                policy.max_attempts()
            );
            continue;
        };

        let expires = not_after(certificate)?;
        log::info!("Downloaded certificate {id}");

        return Ok(IssuedCertificate {
            certificate: certificate.to_owned(),
            ca_bundle: bundle.ca_bundle.clone().unwrap_or_default(),
            days_left: expires.map(days_until),
            not_after: expires,
        });
    }

    Err(Error::RetriesExhausted {
        operation: "certificate download",
        attempts: policy.max_attempts(),
        last,
    })
}

/// Counts the whole days the first certificate in `pem` is still valid for.
///
/// Fails when `pem` holds no parseable certificate. Returns `None` when the expiry date is
/// outside the range the date library handles. Expired certificates give negative days.
pub fn valid_days_left(pem: &str) -> Result<Option<i64>> {
    Ok(not_after(pem)?.map(days_until))
}

fn days_until(not_after: OffsetDateTime) -> i64 {
    (not_after - OffsetDateTime::now_utc()).whole_days()
}

/// Expiry date of the first certificate in `pem`.
fn not_after(pem: &str) -> Result<Option<OffsetDateTime>> {
    let invalid = |reason: String| {
        Error::UnexpectedResponse(format!("downloaded certificate is invalid: {reason}"))
    };

    let chain = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| invalid(err.to_string()))?;

    // end-entity certificate is first
    let cert_ee = chain
        .first()
        .ok_or_else(|| invalid("no PEM certificate found".to_owned()))?;

    let cert = x509_cert::Certificate::from_der(cert_ee).map_err(|err| invalid(err.to_string()))?;

    let not_after = cert.tbs_certificate.validity.not_after.to_date_time();
    let Ok(not_after) = PrimitiveDateTime::try_from(not_after) else {
        return Ok(None);
    };

    // X.509 times are UTC
    Ok(Some(not_after.assume_utc()))
}
