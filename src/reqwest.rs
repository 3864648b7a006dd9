//! Transport for use with blocking `reqwest`.
//! Use the `reqwest_blocking` feature to enable this.

use crate::{AuthenticError, Request, Response, Transport};

/// Sends commands with a `reqwest::blocking::Client`.
///
/// Timeouts configured on the client surface as [`AuthenticError::Transport`] errors.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    client: ::reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(client: ::reqwest::blocking::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &::reqwest::blocking::Client {
        &self.client
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: Request) -> Result<Response, AuthenticError> {
        let mut builder = self
            .client
            .request(request.method().clone(), request.uri().to_string())
            .headers(request.headers().clone());
        if let Some(body) = request.body() {
            builder = builder.body(body.to_vec());
        }

        let response = builder.send().map_err(AuthenticError::transport)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().map_err(AuthenticError::transport)?;

        Ok(Response::new(status)
            .with_headers(headers)
            .with_body(body.to_vec()))
    }
}
