//! Common utilities for the hardware plugin client
//!
//! Request execution with authentication, transient-failure retry and
//! problem-details error mapping.

pub mod retry;

use crate::error::HwPluginError;
use crate::models::ProblemDetails;
pub use retry::RetryPolicy;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

/// Credentials attached to every request
#[derive(Clone, Default)]
pub enum ClientAuth {
    /// No Authorization header (mutual TLS or an open endpoint)
    #[default]
    None,
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// HTTP basic authentication
    Basic { username: String, password: String },
}

impl std::fmt::Debug for ClientAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientAuth::None => f.write_str("None"),
            ClientAuth::Bearer(_) => f.write_str("Bearer(***)"),
            ClientAuth::Basic { username, .. } => write!(f, "Basic({}:***)", username),
        }
    }
}

/// HTTP client wrapper with authentication and retry
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    auth: ClientAuth,
    retry: RetryPolicy,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, auth: ClientAuth, retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            retry,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            ClientAuth::None => builder,
            ClientAuth::Bearer(token) => builder.bearer_auth(token),
            ClientAuth::Basic { username, password } => builder.basic_auth(username, Some(password)),
        }
    }

    /// Send a request, retrying conflicts, server errors and connection failures
    ///
    /// The final response is returned whatever its status; callers map it.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, HwPluginError> {
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            debug!("{} {} (attempt {}/{})", method, url, attempt, max_attempts);

            let mut builder = self
                .authorize(self.client.request(method.clone(), url))
                .header("Accept", "application/json");
            if let Some(body) = body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if is_retryable_status(status) && attempt < max_attempts {
                        warn!(
                            "{} {} returned {}, retrying in {:?} (attempt {}/{})",
                            method, url, status, self.retry.delay, attempt, max_attempts
                        );
                        tokio::time::sleep(self.retry.delay).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < max_attempts => {
                    warn!(
                        "{} {} failed: {}, retrying in {:?} (attempt {}/{})",
                        method, url, e, self.retry.delay, attempt, max_attempts
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(e) => return Err(HwPluginError::Http(e)),
            }
        }

        Err(HwPluginError::Api(format!(
            "{} {} failed after {} attempts",
            method, url, max_attempts
        )))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::CONFLICT || status.is_server_error()
}

/// Human-readable status text ("Bad Request", "Internal Server Error")
pub fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map_or_else(|| status.as_str().to_string(), str::to_string)
}

/// Convert a non-success response into an error
///
/// Problem details are used when the body carries a non-empty `detail`.
pub async fn error_from_response(
    response: Response,
    resource_type: &str,
    resource_id: &str,
    action: &Method,
) -> HwPluginError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let problem = serde_json::from_str::<ProblemDetails>(&body)
        .ok()
        .filter(|p| !p.detail.is_empty());

    let error = match problem {
        Some(problem) => HwPluginError::Problem {
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            id: resource_id.to_string(),
            status: status_text(status),
            code: status.as_u16(),
            detail: problem.detail,
        },
        None => HwPluginError::UnexpectedResponse {
            resource_type: resource_type.to_string(),
            id: resource_id.to_string(),
            status: status_text(status),
            code: status.as_u16(),
        },
    };
    warn!("{}", error);

    match status {
        StatusCode::CONFLICT => HwPluginError::Conflict(error.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => HwPluginError::Authentication(error.to_string()),
        _ => error,
    }
}
