use reqwest::blocking::Response;
use serde::de;

use crate::{
    error::{Error, Result, Service},
    req::req_safe_read_body,
};

pub(crate) fn read_json<T: de::DeserializeOwned>(service: Service, res: Response) -> Result<T> {
    let res_body = req_safe_read_body(res);
    log::debug!("{service}: {res_body}");
    serde_json::from_str(&res_body).map_err(|err| {
        Error::UnexpectedResponse(format!("{service} sent undecodable body ({err}): {res_body}"))
    })
}
