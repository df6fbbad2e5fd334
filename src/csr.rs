//! Certificate signing requests.
//!
//! Key and CSR generation is delegated to `openssl req`, driven by a rendered config file.

use std::{fmt::Write as _, fs, path::Path};

use crate::{
    error::{Error, Result},
    install::SigningMaterial,
    process::ProcessRunner,
};

/// Subject fields of the requested certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
    pub unit: String,
}

/// What to ask the CA for. Immutable for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub common_name: String,
    pub alt_name: Option<String>,
    pub subject: DistinguishedName,
    pub validity_days: u32,
}

impl CertificateRequest {
    /// Common name first, then the alternate name if any.
    pub fn domains(&self) -> Vec<&str> {
        std::iter::once(self.common_name.as_str())
            .chain(self.alt_name.as_deref())
            .collect()
    }

    /// Domains in the comma separated form the CA expects.
    pub fn certificate_domains(&self) -> String {
        self.domains().join(",")
    }

    /// Renders the `openssl req` configuration for this request.
    pub fn openssl_config(&self) -> String {
        let mut config = String::from(
            "[req]\n\
             default_bits = 2048\n\
             prompt = no\n\
             encrypt_key = no\n\
             default_md = sha256\n\
             utf8 = yes\n\
             string_mask = utf8only\n\
             req_extensions = x509_v3_req\n\
             distinguished_name = req_distinguished_name\n\
             [x509_v3_req]\n\
             subjectAltName = @alt_names\n\
             [alt_names]\n",
        );

        for (idx, domain) in self.domains().iter().enumerate() {
            let _ = writeln!(config, "DNS.{} = {domain}", idx + 1);
        }

        push_subject(&mut config, &self.subject, &self.common_name);
        config
    }
}

pub(crate) fn push_subject(config: &mut String, subject: &DistinguishedName, common_name: &str) {
    let _ = write!(
        config,
        "[req_distinguished_name]\n\
         countryName = {}\n\
         stateOrProvinceName = {}\n\
         localityName = {}\n\
         organizationName = {}\n\
         organizationalUnitName = {}\n\
         commonName = {common_name}\n",
        subject.country, subject.state, subject.locality, subject.organization, subject.unit,
    );
}

/// Writes the request config and has openssl create the pending key and the CSR.
pub fn generate_csr(
    request: &CertificateRequest,
    material: &SigningMaterial,
    runner: &dyn ProcessRunner,
) -> Result<()> {
    fs::write(&material.csr_config, request.openssl_config()).map_err(|err| {
        Error::Local(format!(
            "cannot write CSR config {}: {err}",
            material.csr_config.display()
        ))
    })?;

    let args = vec![
        "openssl".to_owned(),
        "req".to_owned(),
        "-new".to_owned(),
        "-keyout".to_owned(),
        path_arg(&material.pending_key),
        "-out".to_owned(),
        path_arg(&material.csr),
        "-config".to_owned(),
        path_arg(&material.csr_config),
    ];

    let output = runner.run(&args)?;
    if !output.success() {
        return Err(Error::Local(format!(
            "openssl could not create the CSR (exit code {:?}): {}",
            output.code,
            output.stderr.trim()
        )));
    }

    log::info!("Created CSR and private key for {}", request.certificate_domains());
    Ok(())
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Reads the CSR in the single-line form the CA accepts.
pub fn read_csr(material: &SigningMaterial) -> Result<String> {
    let csr = fs::read_to_string(&material.csr).map_err(|err| {
        Error::Local(format!("cannot read CSR {}: {err}", material.csr.display()))
    })?;

    let csr: String = csr.lines().collect();
    if csr.is_empty() {
        return Err(Error::Local(format!(
            "CSR {} is empty",
            material.csr.display()
        )));
    }

    Ok(csr)
}
