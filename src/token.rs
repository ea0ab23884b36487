use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow, bail};
use base64::{
    Engine,
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

pub const TOKEN_LIFETIME_SECONDS: u64 = 3600;
const FALLBACK_SIGNATURE: &str = "demo-signature";
const FALLBACK_SUBJECT_PREFIX: &str = "demo-";
const DEFAULT_AUDIENCE: &str = "demo-client";
const FINGERPRINT_BYTES: usize = 6;

/// Where a bearer value came from. The wire format is the same for both, so
/// this is the only way downstream code can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenOrigin {
    Issued,
    Fallback,
}

impl TokenOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for TokenOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub bearer: String,
    pub expires_at_epoch_seconds: u64,
    pub origin: TokenOrigin,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("fingerprint", &self.fingerprint())
            .field("expires_at_epoch_seconds", &self.expires_at_epoch_seconds)
            .field("origin", &self.origin)
            .finish()
    }
}

impl Token {
    pub fn issued(bearer: String, now_epoch_seconds: u64) -> Self {
        Self {
            bearer,
            expires_at_epoch_seconds: now_epoch_seconds.saturating_add(TOKEN_LIFETIME_SECONDS),
            origin: TokenOrigin::Issued,
        }
    }

    pub fn is_valid_at(&self, now_epoch_seconds: u64) -> bool {
        now_epoch_seconds < self.expires_at_epoch_seconds
    }

    /// Short digest for logs; the bearer value itself is never logged.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.bearer.as_bytes());
        digest
            .iter()
            .take(FINGERPRINT_BYTES)
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

pub trait Clock: Send + Sync {
    fn now_epoch_seconds(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(
        rename = "cognito:username",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

pub fn fallback_subject(principal_id: &str) -> String {
    format!("{FALLBACK_SUBJECT_PREFIX}{principal_id}")
}

pub fn validate_principal_id(raw_id: &str) -> Result<()> {
    if raw_id.trim().is_empty() {
        bail!("principal id cannot be empty");
    }
    if raw_id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        bail!("principal id cannot contain whitespace or control characters");
    }
    Ok(())
}

/// Builds an unsigned, JWT-shaped credential for demo use when the identity
/// service cannot be reached. The signature segment carries no meaning.
pub fn synthesize_fallback(
    principal_id: &str,
    audience: Option<&str>,
    now_epoch_seconds: u64,
) -> Result<Token> {
    validate_principal_id(principal_id)
        .with_context(|| format!("cannot synthesize fallback token for '{principal_id}'"))?;

    let expires_at = now_epoch_seconds.saturating_add(TOKEN_LIFETIME_SECONDS);
    let header = json!({ "alg": "HS256", "typ": "JWT" });
    let claims = TokenClaims {
        sub: Some(fallback_subject(principal_id)),
        username: Some(principal_id.to_string()),
        aud: Some(audience.unwrap_or(DEFAULT_AUDIENCE).to_string()),
        token_use: Some("id".to_string()),
        auth_time: Some(now_epoch_seconds),
        iat: Some(now_epoch_seconds),
        exp: Some(expires_at),
    };

    let header = serde_json::to_vec(&header).context("failed to encode fallback header")?;
    let payload = serde_json::to_vec(&claims).context("failed to encode fallback claims")?;
    let bearer = format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload),
        URL_SAFE_NO_PAD.encode(FALLBACK_SIGNATURE)
    );

    Ok(Token {
        bearer,
        expires_at_epoch_seconds: expires_at,
        origin: TokenOrigin::Fallback,
    })
}

/// Reads the payload claims of any three-segment bearer token without
/// verifying its signature.
pub fn decode_claims(bearer: &str) -> Result<TokenClaims> {
    let segments = bearer.split('.').collect::<Vec<_>>();
    if segments.len() != 3 {
        bail!(
            "token must have exactly three dot-separated segments, found {}",
            segments.len()
        );
    }

    let payload = decode_segment(segments[1]).context("token payload is not valid base64")?;
    serde_json::from_slice(&payload).context("token payload is not a JSON claims object")
}

fn decode_segment(segment: &str) -> Result<Vec<u8>> {
    let trimmed = segment.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .map_err(|err| anyhow!("{err}"))
}
