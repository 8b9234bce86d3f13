//! Shared HTTP client configuration.
//!
//! One `HttpConfig` builds one `reqwest::Client`; every HTTP gateway clones
//! that client (cheap, connection pool is shared) and adds its own base URL
//! and credentials.

use std::time::Duration;

use tracing::{debug, error};

use crate::error::{GatewayError, GatewayResult};

/// Connection settings shared by every HTTP gateway.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Per-request timeout.
    pub timeout: Duration,

    /// Accept self-signed or otherwise untrusted server certificates.
    pub trust_cert: bool,

    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            trust_cert: false,
            user_agent: concat!("pvt/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpConfig {
    /// Build the shared client.
    pub fn build_client(&self) -> GatewayResult<reqwest::Client> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .danger_accept_invalid_certs(self.trust_cert)
            .build()?;

        Ok(client)
    }
}

/// Join a base URL and a path with exactly one separator.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Turn a non-success response into a `GatewayError`.
pub(crate) async fn check_response(
    response: reqwest::Response,
    operation: &str,
) -> GatewayResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        debug!(operation, status = %status, "Request succeeded");
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::NOT_FOUND {
        debug!(operation, body = %body, "Resource not found");
        return Err(GatewayError::NotFound(format!("{operation}: {body}")));
    }

    error!(operation, status = %status, body = %body, "Request failed");
    Err(GatewayError::Http {
        status: status.as_u16(),
        body,
    })
}
