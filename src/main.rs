use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use eyre::WrapErr as _;
use zerossl::{
    Cloudflare, DnsRecordUpdater, Error, LogNotifier, Notifier, ProcessRunner, Renewal,
    RenewalOutcome, RevocationReason, SelfSigned, Services, Settings, SystemRunner, Telegram,
    ThreadSleeper, ValidationMethod, VerifyOutcome, ZeroSsl,
};

/// Renew certificates from ZeroSSL.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, env = "ACME_ZEROSSL_CONFIG")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, env = "ACME_ZEROSSL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Renew the certificate if it is due
    Renew {
        /// Validation method, defaults to the configured one
        #[arg(long = "vm")]
        method: Option<ValidationMethod>,
    },

    /// Ask ZeroSSL to verify the published records once
    Verify {
        /// Certificate ID, defaults to the cached one
        #[arg(long = "ca")]
        id: Option<String>,

        #[arg(long = "vm")]
        method: Option<ValidationMethod>,
    },

    /// Download and install an issued certificate
    Download {
        #[arg(long = "ca")]
        id: Option<String>,
    },

    /// Cancel a certificate that is not issued yet
    Cancel {
        #[arg(long = "ca")]
        id: Option<String>,
    },

    /// Revoke an issued certificate
    Revoke {
        #[arg(long = "ca")]
        id: Option<String>,

        /// unspecified, keyCompromise, affiliationChanged, superseded or cessationOfOperation
        #[arg(long = "vr", default_value = "unspecified")]
        reason: RevocationReason,
    },

    /// Create a self-signed certificate for localhost and the public addresses
    SelfSigned,

    /// Check the Cloudflare API token
    CheckToken,

    /// List the Cloudflare zone's DNS records
    Records {
        /// Only records of this type, e.g. CNAME
        #[arg(long = "type")]
        record_type: Option<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    if let Err(err) = color_eyre::install() {
        log::warn!("Cannot install error report handler: {err}");
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", error_reporter::Report::new(&*err));
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> eyre::Result<()> {
    let settings = Settings::load(&args.config)
        .wrap_err_with(|| format!("loading {}", args.config.display()))?;

    let method = |method: Option<ValidationMethod>| {
        method.unwrap_or(settings.renewal.validation_method)
    };

    match &args.command {
        Command::SelfSigned => return self_signed(&settings),
        Command::CheckToken => {
            let status = cloudflare(&settings)?.verify_token()?;
            println!("Cloudflare token {} is {}", status.id, status.status);
            return Ok(());
        }
        Command::Records { record_type } => {
            for record in cloudflare(&settings)?.list_records(record_type.as_deref())? {
                println!(
                    "{}\t{}\t{}\t{}",
                    record.id, record._type, record.name, record.content
                );
            }
            return Ok(());
        }
        _ => {}
    }

    let ca = ZeroSsl::new(&settings.zerossl.url, &settings.zerossl.access_key)?;
    let dns = match (&settings.cloudflare, &settings.records) {
        (Some(_), Some(_)) => Some(cloudflare(&settings)?),
        _ => None,
    };
    let notifier: Box<dyn Notifier> = match &settings.telegram {
        Some(telegram) => Box::new(Telegram::new(telegram)?),
        None => Box::new(LogNotifier),
    };

    let services = Services {
        ca: &ca,
        dns: dns.as_ref().map(|dns| dns as &dyn DnsRecordUpdater),
        notifier: notifier.as_ref(),
        runner: &SystemRunner,
        sleeper: &ThreadSleeper,
    };
    let renewal = Renewal::new(&settings, services);

    match args.command {
        Command::Renew { method: vm } => match renewal.run(method(vm))? {
            RenewalOutcome::Skipped { days_left } => {
                println!("Certificate valid for {days_left} more days, not renewed");
            }
            RenewalOutcome::Renewed { id, days_left, .. } => {
                let days = days_left.map_or_else(|| "unknown".to_owned(), |days| days.to_string());
                println!("Certificate {id} renewed, {days} days left");
            }
        },

        Command::Verify { id, method: vm } => {
            let text = match renewal.verify(id.as_deref(), method(vm))? {
                VerifyOutcome::NotVerified => "Not verified yet",
                VerifyOutcome::Pending => "Verified, waiting for the certificate to be issued",
                VerifyOutcome::Issued => "Verified, certificate issued",
            };
            println!("{text}");
        }

        Command::Download { id } => {
            renewal.download(id.as_deref())?;
            println!("Certificate installed, restart the web server to load it");
        }

        Command::Cancel { id } => renewal.cancel(id.as_deref())?,

        Command::Revoke { id, reason } => renewal.revoke(id.as_deref(), reason)?,

        Command::SelfSigned | Command::CheckToken | Command::Records { .. } => {}
    }

    Ok(())
}

fn cloudflare(settings: &Settings) -> eyre::Result<Cloudflare> {
    let cf = settings
        .cloudflare
        .as_ref()
        .ok_or_else(|| Error::Config("CloudflareAPI section is missing".to_owned()))?;
    let records = settings
        .records
        .as_ref()
        .ok_or_else(|| Error::Config("CloudflareRecords section is missing".to_owned()))?;

    Ok(Cloudflare::new(cf, &records.zone_id)?)
}

fn self_signed(settings: &Settings) -> eyre::Result<()> {
    let self_signed = settings
        .self_signed
        .as_ref()
        .ok_or_else(|| Error::Config("SelfSigned section is missing".to_owned()))?;

    let request = settings.certificate_request()?;
    SelfSigned::new(self_signed, &request.subject).generate(&SystemRunner)?;

    if let Some(cmd) = settings
        .renewal
        .reload_command
        .as_deref()
        .filter(|cmd| !cmd.is_empty())
    {
        let output = SystemRunner.run(cmd)?;
        if !output.success() {
            return Err(Error::ReloadFailed {
                code: output.code,
                stderr: output.stderr.trim().to_owned(),
            }
            .into());
        }
    }

    println!("Created {}", self_signed.certificate.display());
    Ok(())
}
