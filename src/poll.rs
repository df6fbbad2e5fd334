//! Verification polling.

use crate::{
    api::{Certificate, CertificateStatus},
    ca::CaClient,
    error::{Error, Result},
    retry::{RetryPolicy, Sleeper},
    translate::ValidationMethod,
};

/// What a single CA answer means for the poll loop.
enum Progress {
    Issued(Certificate),
    Pending,
}

/// Triggers verification of certificate `id` and polls until it is issued.
///
/// Every CA call, the trigger included, counts against `policy`. Transport errors use up an
/// attempt and are retried; anything the CA reports other than `pending_validation` or
/// `issued` ends the loop.
pub fn verify(
    ca: &dyn CaClient,
    id: &str,
    method: ValidationMethod,
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<Certificate> {
    let mut triggered = false;
    let mut last = None;

    for attempt in 1..=policy.max_attempts() {
        if attempt > 1 {
            sleeper.sleep(policy.interval());
        }

        let res = if triggered {
            ca.certificate(id)
        } else {
            ca.verify_domains(id, method)
        };

        let cert = match res {
            Ok(cert) => cert,
            Err(err) if err.is_transport() => {
                log::warn!("Verification attempt {attempt} failed: {err}");
                last = Some(Box::new(err));
                continue;
            }
            Err(err) => return Err(err),
        };

        triggered = true;
        last = None;

        match progress(id, cert)? {
            Progress::Issued(cert) => {
                log::info!("Certificate {id} issued");
                return Ok(cert);
            }
            Progress::Pending => {
                log::info!(
                    "Certificate {id} pending validation ({attempt}/{})",
                    policy.max_attempts()
                );
            }
        }
    }

    Err(Error::RetriesExhausted {
        operation: "verification",
        attempts: policy.max_attempts(),
        last,
    })
}

fn progress(id: &str, cert: Certificate) -> Result<Progress> {
    // error objects were already turned into `Error::Api` by the client
    let status = cert.status.clone().ok_or_else(|| {
        Error::UnexpectedResponse(format!("certificate {id} response has no status"))
    })?;

    match status {
        CertificateStatus::Issued => Ok(Progress::Issued(cert)),
        CertificateStatus::PendingValidation => Ok(Progress::Pending),
        CertificateStatus::Draft => Err(Error::NotVerified { id: id.to_owned() }),
        status => Err(Error::UnknownStatus {
            id: id.to_owned(),
            status: status.to_string(),
        }),
    }
}
