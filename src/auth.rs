use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::CredentialCache;
use crate::credentials::CredentialProvider;
use crate::principal::Principal;
use crate::token::{Clock, SystemClock, Token, synthesize_fallback, validate_principal_id};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Non-fatal: the caller still receives a fallback token.
    ExchangeUnavailable { reason: String },
    MalformedPrincipal { id: String, reason: String },
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExchangeUnavailable { reason } => {
                write!(f, "credential exchange unavailable: {reason}")
            }
            Self::MalformedPrincipal { id, reason } => {
                write!(f, "cannot authenticate principal '{id}': {reason}")
            }
        }
    }
}

impl std::error::Error for AuthError {}

#[derive(Debug, Clone)]
pub struct AcquiredToken {
    pub token: Token,
    pub warning: Option<AuthError>,
}

#[derive(Debug, Serialize)]
struct ExchangeRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    #[serde(rename = "idToken")]
    id_token: String,
}

type InflightGates = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

#[derive(Clone)]
pub struct TokenAcquirer {
    http: Client,
    auth_endpoint: Option<String>,
    audience: Option<String>,
    provider: Arc<dyn CredentialProvider>,
    cache: CredentialCache,
    clock: Arc<dyn Clock>,
    inflight: Arc<Mutex<InflightGates>>,
}

impl TokenAcquirer {
    pub fn new(
        http: Client,
        auth_endpoint: Option<String>,
        provider: Arc<dyn CredentialProvider>,
        cache: CredentialCache,
    ) -> Self {
        Self {
            http,
            auth_endpoint,
            audience: None,
            provider,
            cache,
            clock: Arc::new(SystemClock),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// `aud` claim written into fallback tokens.
    pub fn with_audience(mut self, audience: Option<String>) -> Self {
        self.audience = audience;
        self
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    pub fn cached_token(&self, principal: &Principal) -> Option<Token> {
        let now = self.clock.now_epoch_seconds();
        self.cache
            .get(&principal.id)
            .filter(|token| token.is_valid_at(now))
    }

    /// True when `acquire` would hand back a token right now, either from the
    /// cache or by synthesizing a fallback.
    pub fn can_acquire(&self, principal: &Principal) -> bool {
        self.cached_token(principal).is_some() || validate_principal_id(&principal.id).is_ok()
    }

    pub async fn acquire(&self, principal: &Principal) -> Result<AcquiredToken, AuthError> {
        if let Some(token) = self.cached_token(principal) {
            debug!(principal = %principal.id, origin = %token.origin, "using cached token");
            return Ok(AcquiredToken {
                token,
                warning: None,
            });
        }

        // One exchange per principal at a time; late arrivals re-check the cache.
        let gate = self.inflight_gate(&principal.id);
        let result = {
            let _permit = gate.lock().await;
            self.acquire_exclusive(principal).await
        };
        self.release_gate(&principal.id, gate);
        result
    }

    async fn acquire_exclusive(&self, principal: &Principal) -> Result<AcquiredToken, AuthError> {
        if let Some(token) = self.cached_token(principal) {
            debug!(principal = %principal.id, "token cached by concurrent acquisition");
            return Ok(AcquiredToken {
                token,
                warning: None,
            });
        }

        let now = self.clock.now_epoch_seconds();
        match self.exchange(principal).await {
            Ok(bearer) => {
                let token = Token::issued(bearer, now);
                self.cache.put(&principal.id, token.clone());
                info!(
                    principal = %principal.id,
                    fingerprint = %token.fingerprint(),
                    expires_at_epoch_seconds = token.expires_at_epoch_seconds,
                    "credential exchange succeeded"
                );
                Ok(AcquiredToken {
                    token,
                    warning: None,
                })
            }
            Err(err) => {
                let reason = format!("{err:#}");
                let token = synthesize_fallback(&principal.id, self.audience.as_deref(), now)
                    .map_err(|err| AuthError::MalformedPrincipal {
                        id: principal.id.clone(),
                        reason: format!("{err:#}"),
                    })?;
                self.cache.put(&principal.id, token.clone());
                warn!(
                    principal = %principal.id,
                    fingerprint = %token.fingerprint(),
                    error = %reason,
                    "credential exchange unavailable; using unsigned fallback token"
                );
                Ok(AcquiredToken {
                    token,
                    warning: Some(AuthError::ExchangeUnavailable { reason }),
                })
            }
        }
    }

    async fn exchange(&self, principal: &Principal) -> Result<String> {
        let Some(endpoint) = self.auth_endpoint.as_deref() else {
            bail!("no credential exchange endpoint configured");
        };
        let Some(secret) = self.provider.resolve_secret(principal) else {
            bail!("no exchange secret for principal '{}'", principal.id);
        };

        let response = self
            .http
            .post(endpoint)
            .json(&ExchangeRequest {
                username: &principal.id,
                password: &secret,
            })
            .send()
            .await
            .context("credential exchange request failed")?
            .error_for_status()
            .context("credential exchange returned error response")?
            .json::<ExchangeResponse>()
            .await
            .context("credential exchange response JSON is invalid")?;

        if response.id_token.trim().is_empty() {
            bail!("credential exchange returned an empty idToken");
        }
        Ok(response.id_token)
    }

    fn inflight_gate(&self, principal_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.lock_inflight()
            .entry(principal_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drops the table entry once no other caller holds or waits on the gate.
    fn release_gate(&self, principal_id: &str, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut gates = self.lock_inflight();
        let idle = gates
            .get(principal_id)
            .is_some_and(|current| Arc::ptr_eq(current, &gate) && Arc::strong_count(&gate) == 2);
        if idle {
            gates.remove(principal_id);
        }
    }

    fn lock_inflight(&self) -> MutexGuard<'_, InflightGates> {
        match self.inflight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("in-flight acquisition table was poisoned; continuing with recovered state");
                poisoned.into_inner()
            }
        }
    }

    #[cfg(test)]
    fn inflight_len(&self) -> usize {
        self.lock_inflight().len()
    }
}
