use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};

use crate::error::{Error, Result, Service};

/// Every external call gives up after this long.
pub(crate) const TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn http_client(service: Service) -> Result<Client> {
    Client::builder()
        .timeout(TIMEOUT)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| transport_error(service, err))
}

/// Sends the request and turns non-2xx statuses into transport errors.
pub(crate) fn req_send(service: Service, req: RequestBuilder) -> Result<Response> {
    let res = req.send().map_err(|err| transport_error(service, err))?;
    log::trace!("{service} responded {}", res.status());
    req_handle_error(service, res)
}

pub(crate) fn req_handle_error(service: Service, res: Response) -> Result<Response> {
    // ok responses pass through
    if res.status().is_success() {
        return Ok(res);
    }

    let status = res.status();
    let body = req_safe_read_body(res);
    log::warn!("{service} returned HTTP {status}");

    Err(Error::Transport {
        service,
        status: Some(status.as_u16()),
        message: format!("HTTP {status} body: {body}"),
    })
}

pub(crate) fn req_safe_read_body(res: Response) -> String {
    // a connection closed mid-body still leaves us whatever was read
    res.text().unwrap_or_default()
}

fn transport_error(service: Service, err: reqwest::Error) -> Error {
    let status = err.status().map(|status| status.as_u16());
    let message = if err.is_timeout() {
        format!("timed out after {}s", TIMEOUT.as_secs())
    } else {
        // the url may carry an access key
        err.without_url().to_string()
    };

    Error::Transport {
        service,
        status,
        message,
    }
}

/// Redacts credentials carried in query strings or path segments before logging.
pub(crate) fn redact(url: &str, secret: &str) -> String {
    if secret.is_empty() {
        url.to_owned()
    } else {
        url.replace(secret, "***")
    }
}
