//! Admin interface client.

use std::fmt::{self, Display};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_types::Endpoint;
use tracing::debug;

use crate::AdminError;

/// HTTP method of an admin request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

/// JSON requests against a node's admin interface.
pub trait AdminClient: Send + Sync {
    /// Sends one request; an empty response body decodes as `null`.
    fn request(
        &self,
        endpoint: &Endpoint,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, AdminError>;

    fn get(&self, endpoint: &Endpoint, path: &str) -> Result<Value, AdminError> {
        self.request(endpoint, Method::Get, path, None)
    }

    fn post(&self, endpoint: &Endpoint, path: &str, body: &Value) -> Result<Value, AdminError> {
        self.request(endpoint, Method::Post, path, Some(body))
    }
}

/// Connect and read timeouts of admin requests, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminTimeouts {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for AdminTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2_000,
            read_timeout_ms: 10_000,
        }
    }
}

/// [`AdminClient`] over blocking HTTP.
#[derive(Debug, Clone)]
pub struct HttpAdminClient {
    agent: ureq::Agent,
}

impl HttpAdminClient {
    pub fn new(timeouts: &AdminTimeouts) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(timeouts.connect_timeout_ms))
            .timeout_read(Duration::from_millis(timeouts.read_timeout_ms))
            .build();
        Self { agent }
    }
}

impl Default for HttpAdminClient {
    fn default() -> Self {
        Self::new(&AdminTimeouts::default())
    }
}

impl AdminClient for HttpAdminClient {
    fn request(
        &self,
        endpoint: &Endpoint,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, AdminError> {
        let url = format!("http://{}:{}{}", endpoint.host, endpoint.admin_port, path);
        debug!(%method, %url, "admin request");

        let request = match method {
            Method::Get => self.agent.get(&url),
            Method::Post => self.agent.post(&url),
        };
        let result = match body {
            Some(body) => request
                .set("Content-Type", "application/json")
                .send_string(&body.to_string()),
            None => request.call(),
        };

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                return Err(AdminError::RequestFailed {
                    status,
                    reason: response.status_text().to_string(),
                });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(AdminError::Unreachable {
                    endpoint: endpoint.to_string(),
                    reason: transport.to_string(),
                });
            }
        };

        let text = response.into_string().map_err(|err| AdminError::Unreachable {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        })?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| AdminError::InvalidResponse(format!("{err}: {text}")))
    }
}
