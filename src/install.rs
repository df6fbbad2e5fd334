//! Installs an issued certificate into the paths the web server reads.

use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use zeroize::Zeroizing;

use crate::{
    error::{Error, Result},
    fetch::IssuedCertificate,
    process::ProcessRunner,
    retry::Sleeper,
};

/// Files involved in signing and serving the certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningMaterial {
    /// Rendered `openssl req` configuration.
    pub csr_config: PathBuf,
    pub csr: PathBuf,

    /// Key generated with the CSR, promoted to `active_key` on install.
    pub pending_key: PathBuf,
    pub active_key: PathBuf,

    pub certificate: PathBuf,
    pub ca_bundle: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Files installed and the reload command succeeded.
    Reloaded,

    /// Files installed; no reload command is configured.
    ManualRestartRequired,
}

/// Promotes the pending key and writes the certificate files.
#[derive(Debug, Clone)]
pub struct Installer<'a> {
    material: &'a SigningMaterial,
    settle: Duration,
    reload: Option<&'a [String]>,
}

impl<'a> Installer<'a> {
    pub fn new(material: &'a SigningMaterial, settle: Duration, reload: Option<&'a [String]>) -> Self {
        Self {
            material,
            settle,
            reload: reload.filter(|cmd| !cmd.is_empty()),
        }
    }

    /// Installs `issued`, waits for the files to settle, then reloads the server.
    pub fn install(
        &self,
        issued: &IssuedCertificate,
        runner: &dyn ProcessRunner,
        sleeper: &dyn Sleeper,
    ) -> Result<InstallOutcome> {
        self.write(issued)?;
        self.reload(runner, sleeper)
    }

    /// Promotes the pending key and writes the certificate and CA bundle.
    pub fn write(&self, issued: &IssuedCertificate) -> Result<()> {
        let material = self.material;

        let key = fs::read(&material.pending_key)
            .map(Zeroizing::new)
            .map_err(|err| {
                Error::Local(format!(
                    "cannot read pending key {}: {err}",
                    material.pending_key.display()
                ))
            })?;

        write_atomic(&material.active_key, &key, true)?;
        write_atomic(&material.certificate, issued.certificate.as_bytes(), false)?;

        if issued.ca_bundle.is_empty() {
            log::warn!("CA returned no bundle; writing an empty {}", material.ca_bundle.display());
        }
        write_atomic(&material.ca_bundle, issued.ca_bundle.as_bytes(), false)?;

        log::info!(
            "Installed certificate to {} and key to {}",
            material.certificate.display(),
            material.active_key.display()
        );

        Ok(())
    }

    /// Waits for the written files to settle, then runs the reload command if there is one.
    pub fn reload(&self, runner: &dyn ProcessRunner, sleeper: &dyn Sleeper) -> Result<InstallOutcome> {
        sleeper.sleep(self.settle);

        let Some(cmd) = self.reload else {
            log::warn!("No reload command configured; restart the web server manually");
            return Ok(InstallOutcome::ManualRestartRequired);
        };

        let output = runner.run(cmd)?;
        if !output.success() {
            return Err(Error::ReloadFailed {
                code: output.code,
                stderr: output.stderr.trim().to_owned(),
            });
        }

        log::info!("Reloaded web server");
        Ok(InstallOutcome::Reloaded)
    }
}

/// Writes `contents` next to `path` and renames it into place.
pub(crate) fn write_atomic(path: &Path, contents: &[u8], private: bool) -> Result<()> {
    let tmp = temp_path(path);

    write_file(&tmp, contents, private)
        .and_then(|()| fs::rename(&tmp, path))
        .map_err(|source| {
            let _ = fs::remove_file(&tmp);
            Error::Install {
                path: path.to_owned(),
                source,
            }
        })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| OsString::from("install"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn write_file(path: &Path, contents: &[u8], private: bool) -> io::Result<()> {
    use std::{io::Write as _, os::unix::fs::OpenOptionsExt as _};

    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    if private {
        opts.mode(0o600);
    }

    let mut file = opts.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_file(path: &Path, contents: &[u8], _private: bool) -> io::Result<()> {
    fs::write(path, contents)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{process::tests::FakeRunner, retry::tests::RecordingSleeper};

    pub(crate) fn material(dir: &Path) -> SigningMaterial {
        SigningMaterial {
            csr_config: dir.join("csr.conf"),
            csr: dir.join("domain.csr"),
            pending_key: dir.join("pending.key"),
            active_key: dir.join("active.key"),
            certificate: dir.join("domain.crt"),
            ca_bundle: dir.join("ca_bundle.crt"),
        }
    }

    fn issued() -> IssuedCertificate {
        IssuedCertificate {
            certificate: "-----BEGIN CERTIFICATE-----\nMIIB\r\n-----END CERTIFICATE-----\n".to_owned(),
            ca_bundle: "-----BEGIN CERTIFICATE-----\nMIIC\n-----END CERTIFICATE-----".to_owned(),
            days_left: Some(90),
            not_after: None,
        }
    }

    #[test]
    fn test_install_writes_bytes_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let material = material(dir.path());
        fs::write(&material.pending_key, "PENDING KEY").unwrap();
        fs::write(&material.active_key, "OLD KEY").unwrap();

        let reload = vec!["systemctl".to_owned(), "reload".to_owned(), "nginx".to_owned()];
        let runner = FakeRunner::succeeding();
        let sleeper = RecordingSleeper::default();

        let outcome = Installer::new(&material, Duration::from_secs(5), Some(reload.as_slice()))
            .install(&issued(), &runner, &sleeper)
            .unwrap();

        assert_eq!(outcome, InstallOutcome::Reloaded);
        assert_eq!(fs::read_to_string(&material.active_key).unwrap(), "PENDING KEY");
        assert_eq!(
            fs::read_to_string(&material.certificate).unwrap(),
            issued().certificate
        );
        assert_eq!(
            fs::read_to_string(&material.ca_bundle).unwrap(),
            issued().ca_bundle
        );
        assert_eq!(*sleeper.waits.borrow(), [Duration::from_secs(5)]);
        assert_eq!(*runner.calls.borrow(), [reload]);

        // no temp files left behind
        assert!(!dir.path().join("domain.crt.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_installed_key_is_private() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = tempfile::tempdir().unwrap();
        let material = material(dir.path());
        fs::write(&material.pending_key, "PENDING KEY").unwrap();

        Installer::new(&material, Duration::ZERO, None)
            .install(&issued(), &FakeRunner::succeeding(), &RecordingSleeper::default())
            .unwrap();

        let mode = fs::metadata(&material.active_key).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_no_reload_command_needs_manual_restart() {
        let dir = tempfile::tempdir().unwrap();
        let material = material(dir.path());
        fs::write(&material.pending_key, "PENDING KEY").unwrap();
        let runner = FakeRunner::succeeding();

        let empty = Vec::<String>::new();
        let outcome = Installer::new(&material, Duration::ZERO, Some(empty.as_slice()))
            .install(&issued(), &runner, &RecordingSleeper::default())
            .unwrap();

        assert_eq!(outcome, InstallOutcome::ManualRestartRequired);
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn test_reload_failure() {
        let dir = tempfile::tempdir().unwrap();
        let material = material(dir.path());
        fs::write(&material.pending_key, "PENDING KEY").unwrap();

        let reload = vec!["nginx".to_owned(), "-s".to_owned(), "reload".to_owned()];
        let err = Installer::new(&material, Duration::ZERO, Some(reload.as_slice()))
            .install(
                &issued(),
                &FakeRunner::failing(1, "nginx: [emerg] invalid config\n"),
                &RecordingSleeper::default(),
            )
            .unwrap_err();

        match err {
            Error::ReloadFailed { code, stderr } => {
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "nginx: [emerg] invalid config");
            }
            err => panic!("unexpected error {err:?}"),
        }

        // files are in place even though the reload failed
        assert!(material.certificate.exists());
    }

    #[test]
    fn test_missing_pending_key() {
        let dir = tempfile::tempdir().unwrap();
        let material = material(dir.path());

        let err = Installer::new(&material, Duration::ZERO, None)
            .install(&issued(), &FakeRunner::succeeding(), &RecordingSleeper::default())
            .unwrap_err();
        assert!(matches!(err, Error::Local(_)));
        assert!(!material.certificate.exists());
    }

    #[test]
    fn test_unwritable_target_is_install_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("domain.crt");

        let err = write_atomic(&path, b"x", false).unwrap_err();
        assert!(matches!(err, Error::Install { path: ref p, .. } if *p == path));
    }
}
