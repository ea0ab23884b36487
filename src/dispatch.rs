use std::fmt;

use hyper::ext::ReasonPhrase;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::auth::{AuthError, TokenAcquirer};
use crate::session::SessionContext;
use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    EmptyQuery,
    NoPrincipal,
    NoEndpoint,
}

impl ValidationError {
    pub fn code(self) -> &'static str {
        match self {
            Self::EmptyQuery => "empty_query",
            Self::NoPrincipal => "no_principal",
            Self::NoEndpoint => "no_endpoint",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::EmptyQuery => "please enter a question",
            Self::NoPrincipal => "please select a principal first",
            Self::NoEndpoint => "no inference endpoint is configured",
        };
        write!(f, "{message} ({})", self.code())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug)]
pub enum DispatchError {
    Validation(ValidationError),
    Auth(AuthError),
    Server { status: u16, status_text: String },
    Protocol { reason: String },
    Network { reason: String },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Auth(err) => write!(f, "authentication failed: {err}"),
            Self::Server {
                status,
                status_text,
            } => write!(f, "API error: {status} {status_text}"),
            Self::Protocol { reason } => write!(f, "unexpected response from API: {reason}"),
            Self::Network { reason } => write!(f, "could not reach API: {reason}"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Auth(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for DispatchError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl From<AuthError> for DispatchError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

/// Describes how the backend tailored its answer. Passed through untouched,
/// including fields this client does not know about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardrail_applied: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub response: String,
    pub metadata: Metadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub envelope: ResponseEnvelope,
    pub token: Token,
    /// Set when the request went out with a fallback token.
    pub warning: Option<AuthError>,
}

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    query: &'a str,
}

#[derive(Clone)]
pub struct Dispatcher {
    http: Client,
    acquirer: TokenAcquirer,
}

impl Dispatcher {
    pub fn new(http: Client, acquirer: TokenAcquirer) -> Self {
        Self { http, acquirer }
    }

    pub fn acquirer(&self) -> &TokenAcquirer {
        &self.acquirer
    }

    /// Single attempt; failures are reported, never retried.
    pub async fn send(
        &self,
        session: &SessionContext,
        query: &str,
    ) -> Result<Outcome, DispatchError> {
        if query.trim().is_empty() {
            return Err(ValidationError::EmptyQuery.into());
        }
        let Some(principal) = session.principal() else {
            return Err(ValidationError::NoPrincipal.into());
        };
        let Some(endpoint) = session.endpoint() else {
            return Err(ValidationError::NoEndpoint.into());
        };

        let acquired = self.acquirer.acquire(principal).await?;
        debug!(
            principal = %principal.id,
            origin = %acquired.token.origin,
            fingerprint = %acquired.token.fingerprint(),
            "dispatching query"
        );

        let response = self
            .http
            .post(endpoint.clone())
            .bearer_auth(&acquired.token.bearer)
            .json(&InferenceRequest { query })
            .send()
            .await
            .map_err(|err| DispatchError::Network {
                reason: format!("inference request failed: {err}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_text = status_text(&response);
            warn!(
                principal = %principal.id,
                status = status.as_u16(),
                origin = %acquired.token.origin,
                "inference endpoint rejected request"
            );
            return Err(DispatchError::Server {
                status: status.as_u16(),
                status_text,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| DispatchError::Network {
                reason: format!("failed to read inference response: {err}"),
            })?;
        let envelope =
            serde_json::from_slice::<ResponseEnvelope>(&body).map_err(|err| {
                DispatchError::Protocol {
                    reason: format!("response body is not a valid envelope: {err}"),
                }
            })?;

        info!(
            principal = %principal.id,
            origin = %acquired.token.origin,
            guardrail_applied = ?envelope.metadata.guardrail_applied,
            "inference response received"
        );
        Ok(Outcome {
            envelope,
            token: acquired.token,
            warning: acquired.warning,
        })
    }
}

/// Reason phrase as the server sent it. hyper only records the phrase when it
/// differs from the canonical one.
fn status_text(response: &reqwest::Response) -> String {
    match response.extensions().get::<ReasonPhrase>() {
        Some(reason) => String::from_utf8_lossy(reason.as_bytes()).into_owned(),
        None => response
            .status()
            .canonical_reason()
            .unwrap_or_default()
            .to_string(),
    }
}
