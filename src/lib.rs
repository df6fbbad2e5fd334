//! Renewing certificates from the [ZeroSSL](https://zerossl.com/) REST API.
//!
//! A renewal run goes through these steps, stopping at the first failure:
//!
//! 1. check the cached certificate's expiry date against a threshold;
//! 2. have `openssl` create a new private key and CSR;
//! 3. create the certificate at ZeroSSL;
//! 4. publish the validation records, either CNAME records at Cloudflare or files below the
//!    web root;
//! 5. wait for them to propagate, then ask ZeroSSL to verify them and poll until the
//!    certificate is issued;
//! 6. download it, install key, certificate and CA bundle, and reload the web server;
//! 7. tell the operator through a Telegram bot.
//!
//! See [`Renewal`].
//!
//! # Domain Ownership
//!
//! ZeroSSL needs proof of control over every domain on the certificate. With `CNAME_CSR_HASH`
//! the records are pre-created in Cloudflare and their IDs configured; each run points them at
//! the new values. With `HTTPS_CSR_HASH` or `HTTP_CSR_HASH` the web server must serve
//! `/.well-known/pki-validation/` from the configured web root.
//!
//! At most two domains are supported: the common name and one alternate name.
//!
//! # Scheduling
//!
//! A run is a blocking batch job meant to be started by a timer. Concurrent runs against the
//! same configuration are not safe and must be serialized by the scheduler.

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod ca;
mod cache;
mod config;
mod csr;
mod dns;
mod error;
mod fetch;
mod install;
mod notify;
mod orchestrator;
mod poll;
mod process;
mod publish;
mod req;
mod retry;
mod selfsigned;
mod translate;
mod util;

pub mod api;


pub use crate::{
    ca::{CaClient, RevocationReason, ZeroSsl},
    cache::{check_expiry, Expiry, ValidationCache},
    config::{
        CertificateSettings, CloudflareRecords, CloudflareSettings, RenewalSettings,
        RetrySettings, SelfSignedSettings, Settings, TelegramSettings, ZeroSslSettings,
    },
    csr::{generate_csr, read_csr, CertificateRequest, DistinguishedName},
    dns::{Cloudflare, DnsRecordUpdater},
    error::{Error, Result, Service},
    fetch::{fetch, valid_days_left, IssuedCertificate},
    install::{InstallOutcome, Installer, SigningMaterial},
    notify::{LogNotifier, Notifier, Telegram},
    orchestrator::{Renewal, RenewalOutcome, Services, VerifyOutcome},
    poll::verify,
    process::{ProcessOutput, ProcessRunner, SystemRunner},
    publish::Publisher,
    retry::{RetryPolicy, Sleeper, ThreadSleeper},
    selfsigned::SelfSigned,
    translate::{translate, ChallengeData, ChallengeRecord, ValidationKind, ValidationMethod},
};
