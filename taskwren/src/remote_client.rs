// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use log::debug;
use thiserror::Error;

/// Status code a compute service answers with once it has queued an event invocation.
pub const STATUS_ACCEPTED: u16 = 202;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("compute service unavailable: {0}")]
    Unavailable(String),
}

/// What the compute service answered to an invocation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAcknowledgment {
    pub status_code: u16,
    pub request_id: Option<String>,
    /// Set when the service reports a failure of the function itself.
    pub function_error: Option<String>,
}

impl RemoteAcknowledgment {
    pub fn accepted() -> Self {
        Self {
            status_code: STATUS_ACCEPTED,
            request_id: None,
            function_error: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status_code == STATUS_ACCEPTED && self.function_error.is_none()
    }
}

/// Client of the compute service. Implementations issue exactly one request per call.
pub trait RemoteFunctionClient: Send + Sync {
    fn invoke_async(
        &self,
        function: &str,
        region: &str,
        payload: &[u8],
    ) -> Result<RemoteAcknowledgment, TransportError>;
}

/// Invokes functions through the HTTP invocation API of a compute service.
/// Requests are not signed, so this works against endpoints that accept
/// anonymous requests (local emulators, signing proxies).
pub struct HttpFunctionClient {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl HttpFunctionClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn invocation_url(&self, function: &str) -> String {
        format!("{}/2015-03-31/functions/{}/invocations", self.endpoint, function)
    }
}

impl RemoteFunctionClient for HttpFunctionClient {
    fn invoke_async(
        &self,
        function: &str,
        region: &str,
        payload: &[u8],
    ) -> Result<RemoteAcknowledgment, TransportError> {
        let url = self.invocation_url(function);
        debug!("posting {} bytes to {url} ({region})", payload.len());
        let response = self
            .client
            .post(&url)
            .header("X-Amz-Invocation-Type", "Event")
            .header("Content-Type", "application/json")
            .body(payload.to_vec())
            .send()?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Ok(RemoteAcknowledgment {
            status_code: response.status().as_u16(),
            request_id: header("x-amzn-requestid"),
            function_error: header("x-amz-function-error"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_url() {
        let client = HttpFunctionClient::new("http://localhost:9001/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.invocation_url("worker"),
            "http://localhost:9001/2015-03-31/functions/worker/invocations"
        );
    }

    #[test]
    fn test_acceptance() {
        assert!(RemoteAcknowledgment::accepted().is_accepted());
        let ok_but_synchronous = RemoteAcknowledgment {
            status_code: 200,
            ..RemoteAcknowledgment::accepted()
        };
        assert!(!ok_but_synchronous.is_accepted());
    }

    #[test]
    fn test_unreachable_endpoint_is_a_transport_error() {
        // port 9 (discard) is closed on test hosts
        let client = HttpFunctionClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let result = client.invoke_async("worker", "local", b"{}");
        assert!(matches!(result, Err(TransportError::Http(_))));
    }
}
