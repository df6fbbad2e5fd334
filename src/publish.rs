//! Publishing validation records where the CA will look for them.

use std::{fs, io, path::Path};

use crate::{
    dns::DnsRecordUpdater,
    error::{Error, Result},
    translate::{ChallengeData, ChallengeRecord, ValidationKind},
};

/// Publishes the records of a [`ChallengeData`], failing fast on the first domain that
/// cannot be published.
pub enum Publisher<'a> {
    /// Updates pre-created CNAME records; IDs pair with the domains by position.
    Cname {
        dns: &'a dyn DnsRecordUpdater,
        record_ids: &'a [String],
    },

    /// Writes validation files below the web root.
    File { webroot: &'a Path },
}

impl Publisher<'_> {
    pub fn publish(&self, data: &ChallengeData) -> Result<()> {
        for (idx, record) in data.records().enumerate() {
            match (self, &record.kind) {
                (Publisher::Cname { dns, record_ids }, ValidationKind::Cname { name, value }) => {
                    let record_id = record_ids.get(idx).ok_or_else(|| {
                        Error::Config(format!("no CNAME record ID for {}", record.domain))
                    })?;

                    dns.update_cname(record_id, name, value)?;
                }

                (Publisher::File { webroot }, ValidationKind::HttpFile { path, content }) => {
                    write_validation_file(&webroot.join(path), content)?;
                    log::info!("Published validation file for {}", record.domain);
                }

                _ => return Err(mismatch(record)),
            }
        }

        Ok(())
    }

    /// Removes published validation files. CNAME records are left in place for the next run.
    ///
    /// Tries every file before reporting the first failure.
    pub fn cleanup(&self, data: &ChallengeData) -> Result<()> {
        let Publisher::File { webroot } = self else {
            return Ok(());
        };

        let mut first_err = None;

        for record in data.records() {
            let ValidationKind::HttpFile { path, .. } = &record.kind else {
                continue;
            };

            let path = webroot.join(path);
            match fs::remove_file(&path) {
                Ok(()) => log::debug!("Removed {}", path.display()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    log::warn!("Cannot remove validation file {}: {err}", path.display());
                    first_err.get_or_insert_with(|| file_error("remove", &path, err));
                }
            }
        }

        first_err.map_or(Ok(()), Err)
    }
}

fn write_validation_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| file_error("create", parent, err))?;
    }

    fs::write(path, content).map_err(|err| file_error("write", path, err))
}

fn file_error(action: &str, path: &Path, err: io::Error) -> Error {
    Error::Local(format!("cannot {action} {}: {err}", path.display()))
}

fn mismatch(record: &ChallengeRecord) -> Error {
    Error::UnexpectedResponse(format!(
        "validation record for {} does not match the validation method",
        record.domain
    ))
}
