//! Renewal run: expiry check through installation, with the operator notified of the outcome.

use crate::{
    api::{self, CertificateStatus},
    ca::{CaClient, RevocationReason},
    cache::{Expiry, ValidationCache},
    config::Settings,
    csr::{generate_csr, read_csr},
    dns::DnsRecordUpdater,
    error::{Error, Result},
    fetch::{fetch, IssuedCertificate},
    install::{InstallOutcome, Installer},
    notify::Notifier,
    poll::verify,
    process::ProcessRunner,
    publish::Publisher,
    retry::Sleeper,
    translate::{translate, ValidationMethod},
};

/// Collaborators of a run.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub ca: &'a dyn CaClient,

    /// Required for CNAME validation only.
    pub dns: Option<&'a dyn DnsRecordUpdater>,

    pub notifier: &'a dyn Notifier,
    pub runner: &'a dyn ProcessRunner,
    pub sleeper: &'a dyn Sleeper,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// The installed certificate is not due for renewal.
    Skipped { days_left: i64 },

    Renewed {
        id: String,
        install: InstallOutcome,
        days_left: Option<i64>,
    },
}

/// Result of a manual verification trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Records not seen by the CA yet.
    NotVerified,

    /// Records accepted, certificate being issued.
    Pending,

    Issued,
}

pub struct Renewal<'a> {
    settings: &'a Settings,
    services: Services<'a>,
    cache: ValidationCache,
}

impl<'a> Renewal<'a> {
    pub fn new(settings: &'a Settings, services: Services<'a>) -> Self {
        Self {
            settings,
            services,
            cache: ValidationCache::new(&settings.zerossl.cache),
        }
    }

    /// Renews the certificate if it is due, notifying the operator of the result.
    ///
    /// Any failure aborts the run after a notification. Records published before the failure
    /// stay in place.
    pub fn run(&self, method: ValidationMethod) -> Result<RenewalOutcome> {
        match self.renew(method) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                log::error!("Renewal failed: {err}");
                self.notify(&format!("Certificate renewal failed: {err}"));
                Err(err)
            }
        }
    }

    fn renew(&self, method: ValidationMethod) -> Result<RenewalOutcome> {
        let settings = self.settings;
        let renewal = &settings.renewal;
        let Services {
            ca,
            runner,
            sleeper,
            ..
        } = self.services;

        settings.validate(method)?;

        match self.cache.expiry(renewal.threshold_days)? {
            Expiry::NotDue { days_left } => {
                log::info!("Certificate valid for {days_left} more days, nothing to do");
                return Ok(RenewalOutcome::Skipped { days_left });
            }
            Expiry::Due { days_left } => {
                log::info!("Certificate expires in {days_left} days, renewing");
            }
            Expiry::Unknown => log::info!("No issued certificate on record, renewing"),
        }

        let request = settings.certificate_request()?;
        let material = settings.signing_material();

        generate_csr(&request, &material, runner)?;

        let created = ca.create_certificate(&api::CreateCertificate {
            certificate_domains: request.certificate_domains(),
            certificate_validity_days: request.validity_days,
            certificate_csr: read_csr(&material)?,
        })?;
        self.cache.save(&created)?;

        let data = translate(&created, &request, method)?;
        let publisher = self.publisher(method)?;
        publisher.publish(&data)?;

        log::info!(
            "Waiting {}s for validation records to propagate",
            renewal.propagation_secs
        );
        sleeper.sleep(renewal.propagation_delay());

        let verified = verify(ca, &data.id, method, renewal.verification.into(), sleeper);

        // files go whatever the outcome; a verification error takes precedence
        let cleanup = publisher.cleanup(&data);
        let verified = verified?;
        let cleanup_failure = cleanup.err();

        let issued = fetch(ca, &data.id, renewal.download.into(), sleeper)?;

        let installer = Installer::new(
            &material,
            renewal.settle_delay(),
            renewal.reload_command.as_deref(),
        );
        installer.write(&issued)?;

        // recorded before the reload: a failed reload still leaves this certificate in place
        let mut record = created;
        record.expires = verified.expires.or(record.expires);
        self.record_installed(record, &issued);

        let install = installer.reload(runner, sleeper)?;

        self.notify(&renewed_message(&issued, install, cleanup_failure.as_ref()));

        Ok(RenewalOutcome::Renewed {
            id: data.id,
            install,
            days_left: issued.days_left,
        })
    }

    fn publisher(&self, method: ValidationMethod) -> Result<Publisher<'_>> {
        if method.is_cname() {
            let dns = self.services.dns.ok_or_else(|| {
                Error::Config("CNAME validation needs a DNS provider".to_owned())
            })?;

            Ok(Publisher::Cname {
                dns,
                record_ids: self.settings.record_ids()?,
            })
        } else {
            let webroot = self.settings.certificate.webroot.as_deref().ok_or_else(|| {
                Error::Config("file validation needs Certificate.Webroot".to_owned())
            })?;

            Ok(Publisher::File { webroot })
        }
    }

    /// Marks `record` as the issued, installed certificate so the next run's expiry check
    /// skips it. Failing to do so is only logged; the certificate is already in place.
    fn record_installed(&self, record: api::Certificate, issued: &IssuedCertificate) {
        if let Err(err) = self.cache.save_issued(record, issued.not_after) {
            log::warn!("Certificate installed but cache not updated: {err}");
        }
    }

    /// Sends `text` below the common name line. Delivery failures are only logged.
    fn notify(&self, text: &str) {
        let common_name = self
            .settings
            .domains()
            .first()
            .copied()
            .unwrap_or("certificate");

        if let Err(err) = self.services.notifier.send(&format!("{common_name}\n{text}")) {
            log::warn!("Cannot deliver notification: {err}");
        }
    }

    /// Certificate ID to act on: the given one, else the cached one.
    fn certificate_id(&self, id: Option<&str>) -> Result<String> {
        match id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Ok(id.to_owned()),
            None => self.cache.certificate_id(),
        }
    }

    /// Triggers verification once and reports where the certificate stands.
    pub fn verify(&self, id: Option<&str>, method: ValidationMethod) -> Result<VerifyOutcome> {
        let id = self.certificate_id(id)?;
        let cert = self.services.ca.verify_domains(&id, method)?;

        let outcome = match cert.status {
            Some(CertificateStatus::Draft) => VerifyOutcome::NotVerified,
            Some(CertificateStatus::PendingValidation) => VerifyOutcome::Pending,
            Some(CertificateStatus::Issued) => VerifyOutcome::Issued,
            Some(status) => {
                return Err(Error::UnknownStatus {
                    id,
                    status: status.to_string(),
                })
            }
            None => {
                return Err(Error::UnexpectedResponse(format!(
                    "certificate {id} response has no status"
                )))
            }
        };

        log::info!("Certificate {id}: {outcome:?}");
        Ok(outcome)
    }

    /// Downloads and installs an issued certificate without reloading the server.
    pub fn download(&self, id: Option<&str>) -> Result<IssuedCertificate> {
        let id = self.certificate_id(id)?;
        let renewal = &self.settings.renewal;
        let material = self.settings.signing_material();

        let issued = fetch(
            self.services.ca,
            &id,
            renewal.download.into(),
            self.services.sleeper,
        )?;

        let installer = Installer::new(&material, renewal.settle_delay(), None);
        installer.write(&issued)?;

        let record = match self.cache.load() {
            Ok(Some(cached)) if cached.id.as_deref() == Some(id.as_str()) => cached,
            Ok(_) => api::Certificate {
                id: Some(id.clone()),
                ..Default::default()
            },
            Err(err) => {
                log::warn!("Replacing unreadable validation cache: {err}");
                api::Certificate {
                    id: Some(id.clone()),
                    ..Default::default()
                }
            }
        };
        self.record_installed(record, &issued);

        installer.reload(self.services.runner, self.services.sleeper)?;

        self.notify(&format!("Certificate {id} downloaded and installed"));
        Ok(issued)
    }

    pub fn cancel(&self, id: Option<&str>) -> Result<()> {
        let id = self.certificate_id(id)?;
        self.services.ca.cancel(&id)?;

        log::info!("Cancelled certificate {id}");
        self.notify(&format!("Certificate {id} cancelled"));
        Ok(())
    }

    pub fn revoke(&self, id: Option<&str>, reason: RevocationReason) -> Result<()> {
        let id = self.certificate_id(id)?;
        self.services.ca.revoke(&id, reason)?;

        log::info!("Revoked certificate {id} ({reason})");
        self.notify(&format!("Certificate {id} revoked ({reason})"));
        Ok(())
    }
}

fn renewed_message(
    issued: &IssuedCertificate,
    install: InstallOutcome,
    cleanup_failure: Option<&Error>,
) -> String {
    let mut text = match issued.days_left {
        Some(days) => format!("Certificate renewed, valid for {days} days."),
        None => "Certificate renewed.".to_owned(),
    };

    if install == InstallOutcome::ManualRestartRequired {
        text.push_str(" Restart the web server to load it.");
    }

    if let Some(err) = cleanup_failure {
        text.push_str(&format!(" Validation files left behind: {err}"));
    }

    text
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, fs, path::Path, time::Duration};

    use super::*;
    use crate::{
        api::Certificate,
        config::tests::SAMPLE,
        error::Service,
        fetch::tests::{bundle, certificate_pem},
        notify::tests::RecordingNotifier,
        poll::tests::{status, ScriptedCa},
        process::tests::FakeRunner,
        retry::tests::RecordingSleeper,
        translate::tests::CREATED,
    };

    #[derive(Debug, Default)]
    struct FakeDns {
        updates: RefCell<Vec<String>>,
        unsuccessful: bool,
    }

    impl DnsRecordUpdater for FakeDns {
        fn update_cname(&self, record_id: &str, _: &str, _: &str) -> Result<()> {
            self.updates.borrow_mut().push(record_id.to_owned());

            if self.unsuccessful {
                // Cloudflare answered HTTP 200 with success:false
                return Err(Error::Api {
                    service: Service::Cloudflare,
                    reason: "Record does not exist. (81044)".to_owned(),
                });
            }

            Ok(())
        }
    }

    /// Settings with every path inside `dir`.
    fn settings(dir: &Path) -> Settings {
        let mut settings = Settings::from_json(SAMPLE).unwrap();

        let cert = &mut settings.certificate;
        cert.csr_config = dir.join("csr.conf");
        cert.csr = dir.join("domain.csr");
        cert.pending_key = dir.join("pending.key");
        cert.active_key = dir.join("active.key");
        cert.certificate = dir.join("domain.crt");
        cert.ca_bundle = dir.join("ca_bundle.crt");
        cert.webroot = Some(dir.join("www"));
        settings.zerossl.cache = dir.join("cache.json");

        settings
    }

    /// Mimics openssl writing the key and CSR.
    fn openssl_effect(args: &[String]) {
        if args.first().map(String::as_str) != Some("openssl") {
            return;
        }

        let arg_after = |flag: &str| {
            let idx = args.iter().position(|arg| arg == flag).unwrap();
            args[idx + 1].clone()
        };

        fs::write(arg_after("-keyout"), "PENDING KEY").unwrap();
        fs::write(
            arg_after("-out"),
            "-----BEGIN CERTIFICATE REQUEST-----\nMIIC\n-----END CERTIFICATE REQUEST-----\n",
        )
        .unwrap();
    }

    fn openssl() -> FakeRunner {
        FakeRunner {
            effect: Some(openssl_effect),
            ..Default::default()
        }
    }

    fn issuing_ca(pem: &str) -> ScriptedCa {
        let ca = ScriptedCa::with_statuses([
            Ok(status(CertificateStatus::PendingValidation)),
            Ok(status(CertificateStatus::Issued)),
        ]);

        ScriptedCa {
            created: Some(serde_json::from_str(CREATED).unwrap()),
            downloads: RefCell::new([Ok(bundle(Some(pem)))].into_iter().collect()),
            ..ca
        }
    }

    fn cache_with(dir: &Path, days: i64, status: CertificateStatus) {
        let expires = time::OffsetDateTime::now_utc() + time::Duration::days(days);
        let cert = Certificate {
            id: Some("0ld1d".to_owned()),
            status: Some(status),
            expires: Some(format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                expires.year(),
                u8::from(expires.month()),
                expires.day(),
                expires.hour(),
                expires.minute(),
                expires.second()
            )),
            ..Default::default()
        };
        ValidationCache::new(dir.join("cache.json")).save(&cert).unwrap();
    }

    #[test]
    fn test_not_due_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        cache_with(dir.path(), 20, CertificateStatus::Issued);

        let ca = ScriptedCa::default();
        let notifier = RecordingNotifier::default();
        let runner = FakeRunner::succeeding();
        let sleeper = RecordingSleeper::default();
        let dns = FakeDns::default();

        let services = Services {
            ca: &ca,
            dns: Some(&dns),
            notifier: &notifier,
            runner: &runner,
            sleeper: &sleeper,
        };

        let outcome = Renewal::new(&settings, services)
            .run(ValidationMethod::CnameCsrHash)
            .unwrap();

        assert!(matches!(outcome, RenewalOutcome::Skipped { days_left } if days_left >= 19));
        assert!(ca.calls.borrow().is_empty());
        assert!(runner.calls.borrow().is_empty());
        assert!(dns.updates.borrow().is_empty());
        assert!(notifier.messages.borrow().is_empty());
    }

    #[test]
    fn test_absent_cache_runs_full_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let pem = certificate_pem(90);

        let ca = issuing_ca(&pem);
        let notifier = RecordingNotifier::default();
        let runner = openssl();
        let sleeper = RecordingSleeper::default();
        let dns = FakeDns::default();

        let services = Services {
            ca: &ca,
            dns: Some(&dns),
            notifier: &notifier,
            runner: &runner,
            sleeper: &sleeper,
        };

        let outcome = Renewal::new(&settings, services)
            .run(ValidationMethod::CnameCsrHash)
            .unwrap();

        assert!(matches!(
            outcome,
            RenewalOutcome::Renewed {
                ref id,
                install: InstallOutcome::ManualRestartRequired,
                days_left: Some(89..=90),
            } if id == "a8f6e0d3b2c1"
        ));

        assert_eq!(
            *ca.calls.borrow(),
            ["create", "verify", "certificate", "download"]
        );
        assert_eq!(*dns.updates.borrow(), ["rec-1", "rec-2"]);

        // propagation, one poll interval, settle
        assert_eq!(
            *sleeper.waits.borrow(),
            [
                Duration::from_secs(15),
                Duration::from_secs(30),
                Duration::from_secs(5)
            ]
        );

        let cert = &settings.certificate;
        assert_eq!(fs::read_to_string(&cert.certificate).unwrap(), pem);
        assert_eq!(fs::read_to_string(&cert.active_key).unwrap(), "PENDING KEY");

        // the cache now holds the issued certificate
        let cached = ValidationCache::new(&settings.zerossl.cache).load().unwrap().unwrap();
        assert_eq!(cached.status, Some(CertificateStatus::Issued));
        assert_eq!(cached.id.as_deref(), Some("a8f6e0d3b2c1"));

        let messages = notifier.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("example.com\nCertificate renewed"));
        assert!(messages[0].contains("Restart the web server"));
    }

    #[test]
    fn test_due_certificate_is_renewed() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        cache_with(dir.path(), 3, CertificateStatus::Issued);
        let pem = certificate_pem(90);

        let ca = issuing_ca(&pem);
        let notifier = RecordingNotifier::default();
        let runner = openssl();
        let sleeper = RecordingSleeper::default();
        let dns = FakeDns::default();

        let services = Services {
            ca: &ca,
            dns: Some(&dns),
            notifier: &notifier,
            runner: &runner,
            sleeper: &sleeper,
        };

        let outcome = Renewal::new(&settings, services)
            .run(ValidationMethod::CnameCsrHash)
            .unwrap();
        assert!(matches!(outcome, RenewalOutcome::Renewed { .. }));
    }

    #[test]
    fn test_unsuccessful_dns_update_aborts_before_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());

        let ca = issuing_ca(&certificate_pem(90));
        let notifier = RecordingNotifier::default();
        let runner = openssl();
        let sleeper = RecordingSleeper::default();
        let dns = FakeDns {
            unsuccessful: true,
            ..Default::default()
        };

        let services = Services {
            ca: &ca,
            dns: Some(&dns),
            notifier: &notifier,
            runner: &runner,
            sleeper: &sleeper,
        };

        let err = Renewal::new(&settings, services)
            .run(ValidationMethod::CnameCsrHash)
            .unwrap_err();

        assert!(matches!(err, Error::Api { .. }));
        assert_eq!(sleeper.count(), 0);
        assert_eq!(*ca.calls.borrow(), ["create"]);
        // fail fast: the second record is never touched
        assert_eq!(*dns.updates.borrow(), ["rec-1"]);

        let messages = notifier.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("example.com\nCertificate renewal failed"));
        assert!(messages[0].contains("Record does not exist."));
    }

    #[test]
    fn test_file_validation_cleans_up_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());

        let ca = ScriptedCa {
            created: Some(serde_json::from_str(CREATED).unwrap()),
            ..ScriptedCa::with_statuses([Err(Error::Api {
                service: Service::ZeroSsl,
                reason: "domain_control_validation_failed".to_owned(),
            })])
        };
        let notifier = RecordingNotifier::default();
        let runner = openssl();
        let sleeper = RecordingSleeper::default();

        let services = Services {
            ca: &ca,
            dns: None,
            notifier: &notifier,
            runner: &runner,
            sleeper: &sleeper,
        };

        let err = Renewal::new(&settings, services)
            .run(ValidationMethod::HttpsCsrHash)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "ZeroSSL API error: domain_control_validation_failed"
        );

        let validation_dir = dir.path().join("www/.well-known/pki-validation");
        assert!(validation_dir.is_dir());
        assert_eq!(fs::read_dir(&validation_dir).unwrap().count(), 0);

        // nothing was installed
        assert!(!settings.certificate.certificate.exists());
    }

    #[test]
    fn test_reload_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.renewal.reload_command =
            Some(vec!["nginx".to_owned(), "-s".to_owned(), "reload".to_owned()]);

        let ca = issuing_ca(&certificate_pem(90));
        let notifier = RecordingNotifier::default();
        let runner = openssl();
        // openssl succeeds, the reload does not
        runner.outputs.borrow_mut().extend([
            crate::process::ProcessOutput {
                code: Some(0),
                ..Default::default()
            },
            crate::process::ProcessOutput {
                code: Some(1),
                stderr: "nginx: [emerg] invalid config".to_owned(),
                ..Default::default()
            },
        ]);
        let sleeper = RecordingSleeper::default();
        let dns = FakeDns::default();

        let services = Services {
            ca: &ca,
            dns: Some(&dns),
            notifier: &notifier,
            runner: &runner,
            sleeper: &sleeper,
        };

        let err = Renewal::new(&settings, services)
            .run(ValidationMethod::CnameCsrHash)
            .unwrap_err();
        assert!(matches!(err, Error::ReloadFailed { code: Some(1), .. }));
        assert!(settings.certificate.certificate.exists());
        assert_eq!(runner.calls.borrow()[1], ["nginx", "-s", "reload"]);

        // the installed certificate is on record, so the next run does not order another one
        let cache = ValidationCache::new(&settings.zerossl.cache);
        let cached = cache.load().unwrap().unwrap();
        assert_eq!(cached.status, Some(CertificateStatus::Issued));
        assert_eq!(cached.id.as_deref(), Some("a8f6e0d3b2c1"));
        assert!(!cache.expiry(14).unwrap().is_due());

        let messages = notifier.messages.borrow();
        assert!(messages[0].contains("server reload failed"));
    }

    #[test]
    fn test_invalid_config_aborts_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.certificate.domains.clear();

        let ca = ScriptedCa::default();
        let notifier = RecordingNotifier::default();
        let runner = FakeRunner::succeeding();
        let sleeper = RecordingSleeper::default();

        let services = Services {
            ca: &ca,
            dns: None,
            notifier: &notifier,
            runner: &runner,
            sleeper: &sleeper,
        };

        let err = Renewal::new(&settings, services)
            .run(ValidationMethod::CnameCsrHash)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(runner.calls.borrow().is_empty());
        assert!(notifier.messages.borrow()[0].starts_with("certificate\n"));
    }

    #[test]
    fn test_manual_operations_use_cached_id() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        cache_with(dir.path(), 3, CertificateStatus::Draft);

        let ca = ScriptedCa::with_statuses([Ok(status(CertificateStatus::Draft))]);
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        let runner = FakeRunner::succeeding();
        let sleeper = RecordingSleeper::default();

        let services = Services {
            ca: &ca,
            dns: None,
            notifier: &notifier,
            runner: &runner,
            sleeper: &sleeper,
        };
        let renewal = Renewal::new(&settings, services);

        assert_eq!(
            renewal
                .verify(None, ValidationMethod::CnameCsrHash)
                .unwrap(),
            VerifyOutcome::NotVerified
        );

        // notification failures do not fail the operation
        renewal.cancel(None).unwrap();
        renewal
            .revoke(Some("abc123"), RevocationReason::KeyCompromise)
            .unwrap();

        assert_eq!(
            *ca.calls.borrow(),
            ["verify", "cancel", "revoke keyCompromise"]
        );
        assert_eq!(notifier.messages.borrow().len(), 2);
    }

    #[test]
    fn test_manual_download_installs_without_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.renewal.reload_command = Some(vec!["systemctl".to_owned(), "reload".to_owned()]);
        fs::write(&settings.certificate.pending_key, "PENDING KEY").unwrap();
        let pem = certificate_pem(90);

        let ca = issuing_ca(&pem);
        let notifier = RecordingNotifier::default();
        let runner = FakeRunner::succeeding();
        let sleeper = RecordingSleeper::default();

        let services = Services {
            ca: &ca,
            dns: None,
            notifier: &notifier,
            runner: &runner,
            sleeper: &sleeper,
        };

        let issued = Renewal::new(&settings, services)
            .download(Some("a8f6e0d3b2c1"))
            .unwrap();
        assert_eq!(issued.certificate, pem);
        assert!(runner.calls.borrow().is_empty());
        assert_eq!(
            fs::read_to_string(&settings.certificate.certificate).unwrap(),
            pem
        );

        let cache = ValidationCache::new(&settings.zerossl.cache);
        assert_eq!(cache.certificate_id().unwrap(), "a8f6e0d3b2c1");
        assert!(matches!(cache.expiry(14).unwrap(), Expiry::NotDue { days_left: 89..=90 }));
    }
}
