//! Send captured requests to the live target
//!
//! A [`Transport`] performs one blocking round trip per call and reports the live status code. [`HttpTransport`] is
//! the real implementation; anything else implementing the trait can stand in for it, e.g. to record requests.

use std::time::Duration;

use http::{StatusCode, Uri};
use thiserror::Error;

use crate::http::HttpRequest;

/// Errors that can occur during a live round trip
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection, TLS or timeout failure
    #[error("Request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: Box<ureq::Transport>,
    },
    /// Target answered with a status code outside of 100..=999
    #[error("Target answered {url} with invalid status {code}")]
    Status { url: String, code: u16 },
}

/// Performs live round trips
pub trait Transport {
    /// Send a request to `url` and return the status the target answered with
    ///
    /// Any answer, including 4xx and 5xx, is a successful round trip.
    ///
    /// # Errors
    /// Returns an error if no answer was received.
    fn send(&mut self, request: &HttpRequest, url: &Uri) -> Result<StatusCode, TransportError>;
}

/// Blocking HTTP and HTTPS client
///
/// Redirects are not followed, so the status can be compared with the captured one. TLS certificates are checked
/// against the platform trust store.
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    /// Create a client that gives up on a round trip after `timeout`
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .redirects(0)
            .build();
        Self { agent }
    }
}

impl Transport for HttpTransport {
    fn send(&mut self, request: &HttpRequest, url: &Uri) -> Result<StatusCode, TransportError> {
        let url = url.to_string();
        let mut live = self.agent.request(request.method.as_str(), &url);
        for header in request.forwarded_headers() {
            match std::str::from_utf8(&header.value) {
                Ok(value) => live = live.set(&header.name, value),
                Err(_) => log::debug!("dropping non UTF-8 header {}", header.name),
            }
        }
        let result = if request.body.is_empty() {
            live.call()
        } else {
            live.send_bytes(&request.body)
        };
        let code = match result {
            Ok(resp) => resp.status(),
            Err(ureq::Error::Status(code, _)) => code,
            Err(ureq::Error::Transport(source)) => {
                return Err(TransportError::Request {
                    url,
                    source: Box::new(source),
                })
            }
        };
        StatusCode::from_u16(code).map_err(|_| TransportError::Status { url, code })
    }
}
