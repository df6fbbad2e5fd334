//! Self-signed certificate for `localhost` and the host's public addresses.
//!
//! A fallback for hosts that cannot pass domain validation, e.g. while DNS is being moved.

use std::{fmt::Write as _, fs};

use reqwest::blocking::Client;

use crate::{
    api::PublicAddress,
    config::SelfSignedSettings,
    csr::{path_arg, push_subject, DistinguishedName},
    error::{Error, Result, Service},
    process::ProcessRunner,
    req::{http_client, req_send},
    util::read_json,
};

const IPIFY_V4: &str = "https://api.ipify.org?format=json";
const IPIFY_V6: &str = "https://api64.ipify.org?format=json";

pub struct SelfSigned<'a> {
    settings: &'a SelfSignedSettings,
    subject: &'a DistinguishedName,
    lookup_urls: [String; 2],
}

impl<'a> SelfSigned<'a> {
    pub fn new(settings: &'a SelfSignedSettings, subject: &'a DistinguishedName) -> Self {
        Self {
            settings,
            subject,
            lookup_urls: [IPIFY_V4.to_owned(), IPIFY_V6.to_owned()],
        }
    }

    /// Replaces the IPv4 and IPv6 lookup endpoints.
    pub fn with_lookup_urls(mut self, v4: &str, v6: &str) -> Self {
        self.lookup_urls = [v4.to_owned(), v6.to_owned()];
        self
    }

    /// Public addresses of this host. Lookup failures only drop the address.
    pub fn public_addresses(&self) -> Vec<String> {
        if !self.settings.lookup_addresses {
            return Vec::new();
        }

        let client = match http_client(Service::IpLookup) {
            Ok(client) => client,
            Err(err) => {
                log::error!("Cannot look up public addresses: {err}");
                return Vec::new();
            }
        };

        let mut addrs = Vec::new();
        for url in &self.lookup_urls {
            match lookup_address(&client, url) {
                // the v6 endpoint answers with the v4 address on v4-only hosts
                Ok(ip) if addrs.contains(&ip) => {}
                Ok(ip) => addrs.push(ip),
                Err(err) => log::error!("Unable to get public address from {url}: {err}"),
            }
        }

        addrs
    }

    /// Renders the openssl config with `addrs` as IP alternative names.
    pub fn openssl_config(&self, addrs: &[String]) -> String {
        let mut config = String::from(
            "[req]\n\
             default_bits = 2048\n\
             default_md = sha256\n\
             utf8 = yes\n\
             string_mask = utf8only\n\
             prompt = no\n\
             req_extensions = x509_v3_req\n\
             distinguished_name = req_distinguished_name\n\
             [x509_v3_req]\n\
             basicConstraints = CA:FALSE\n\
             keyUsage = digitalSignature, keyEncipherment\n\
             extendedKeyUsage = serverAuth\n\
             subjectAltName = @alt_names\n\
             [alt_names]\n\
             DNS.1 = localhost\n",
        );

        for (idx, addr) in addrs.iter().enumerate() {
            let _ = writeln!(config, "IP.{} = {addr}", idx + 1);
        }

        push_subject(&mut config, self.subject, "localhost");
        config
    }

    /// Looks up the public addresses, then has openssl create the key and certificate.
    pub fn generate(&self, runner: &dyn ProcessRunner) -> Result<()> {
        let settings = self.settings;
        let addrs = self.public_addresses();

        fs::write(&settings.config, self.openssl_config(&addrs)).map_err(|err| {
            Error::Local(format!(
                "cannot write certificate config {}: {err}",
                settings.config.display()
            ))
        })?;

        for path in [&settings.key, &settings.certificate] {
            if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
        }

        let args = [
            "openssl",
            "req",
            "-x509",
            "-new",
            "-nodes",
            "-sha256",
            "-utf8",
            "-days",
        ]
        .into_iter()
        .map(str::to_owned)
        .chain([
            settings.days.to_string(),
            "-newkey".to_owned(),
            "rsa:2048".to_owned(),
            "-keyout".to_owned(),
            path_arg(&settings.key),
            "-out".to_owned(),
            path_arg(&settings.certificate),
            "-config".to_owned(),
            path_arg(&settings.config),
            "-extensions".to_owned(),
            "x509_v3_req".to_owned(),
        ])
        .collect::<Vec<_>>();

        let output = runner.run(&args)?;
        if !output.success() {
            return Err(Error::Local(format!(
                "openssl could not create the self-signed certificate (exit code {:?}): {}",
                output.code,
                output.stderr.trim()
            )));
        }

        log::info!(
            "Created self-signed certificate {} valid for {} days",
            settings.certificate.display(),
            settings.days
        );
        Ok(())
    }
}

fn lookup_address(client: &Client, url: &str) -> Result<String> {
    let res = req_send(Service::IpLookup, client.get(url))?;
    let addr: PublicAddress = read_json(Service::IpLookup, res)?;

    let ip = addr.ip.trim();
    if ip.is_empty() {
        return Err(Error::UnexpectedResponse("empty address".to_owned()));
    }

    Ok(ip.to_owned())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::{process::tests::FakeRunner, test::with_api_server};

    fn settings(dir: &Path, lookup_addresses: bool) -> SelfSignedSettings {
        SelfSignedSettings {
            days: 47,
            config: dir.join("selfsigned.conf"),
            key: dir.join("certs/selfsigned.key"),
            certificate: dir.join("certs/selfsigned.crt"),
            lookup_addresses,
        }
    }

    fn subject() -> DistinguishedName {
        DistinguishedName {
            country: "JP".to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_config_with_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), false);
        let subject = subject();

        let config = SelfSigned::new(&settings, &subject)
            .openssl_config(&["203.0.113.7".to_owned(), "2001:db8::7".to_owned()]);

        assert!(config.contains("DNS.1 = localhost\nIP.1 = 203.0.113.7\nIP.2 = 2001:db8::7\n"));
        assert!(config.contains("commonName = localhost\n"));
        assert!(config.contains("basicConstraints = CA:FALSE\n"));
    }

    #[test]
    fn test_lookup_is_optional_and_non_fatal() {
        let server = with_api_server();
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), true);
        let subject = subject();

        let addrs = SelfSigned::new(&settings, &subject)
            .with_lookup_urls(
                &format!("{}/ip/v4", server.url),
                &format!("{}/ip/missing", server.url),
            )
            .public_addresses();
        assert_eq!(addrs, ["203.0.113.7"]);

        let settings = SelfSignedSettings {
            lookup_addresses: false,
            ..settings
        };
        assert!(SelfSigned::new(&settings, &subject)
            .public_addresses()
            .is_empty());
    }

    #[test]
    fn test_generate_runs_openssl() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), false);
        let subject = subject();
        let runner = FakeRunner::succeeding();

        SelfSigned::new(&settings, &subject).generate(&runner).unwrap();

        let calls = runner.calls.borrow();
        assert_eq!(&calls[0][..3], ["openssl", "req", "-x509"]);
        assert!(calls[0].contains(&"47".to_owned()));
        assert!(dir.path().join("certs").is_dir());
        assert!(fs::read_to_string(&settings.config)
            .unwrap()
            .contains("DNS.1 = localhost"));

        let err = SelfSigned::new(&settings, &subject)
            .generate(&FakeRunner::failing(1, "bad"))
            .unwrap_err();
        assert!(matches!(err, Error::Local(_)));
    }
}
