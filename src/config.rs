use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::principal::{DEFAULT_DEVICE, Role};
use crate::token::validate_principal_id;

const CONFIG_PATH_ENV: &str = "ASKGATE_CONFIG";
const API_ENDPOINT_ENV: &str = "ASKGATE_API_ENDPOINT";
const AUTH_ENDPOINT_ENV: &str = "ASKGATE_AUTH_ENDPOINT";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarnessConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_endpoint: Option<String>,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_users")]
    pub users: Vec<RegisteredUser>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_pool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredUser {
    pub id: String,
    pub password: String,
    pub name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
    #[serde(default = "default_industry")]
    pub industry: String,
    #[serde(default = "default_device")]
    pub device: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            api_endpoint: None,
            auth_endpoint: None,
            identity: IdentityConfig::default(),
            request_timeout_secs: None,
            users: default_users(),
        }
    }
}

impl HarnessConfig {
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let lookup = |key: &str| std::env::var(key).ok();
        let mut cfg = match resolve_config_path(explicit_path, lookup) {
            Some((path, required)) => Self::from_file(&path, required)?,
            None => Self::default(),
        };
        cfg.apply_env_overrides(lookup);
        cfg.validate().context("invalid askgate configuration")?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path, required: bool) -> Result<Self> {
        if !path.exists() {
            if required {
                bail!("config file {} does not exist", path.display());
            }
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
    }

    /// Endpoint variables win over the file; an empty value unsets the endpoint.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(API_ENDPOINT_ENV) {
            self.api_endpoint = non_empty(value);
        }
        if let Some(value) = lookup(AUTH_ENDPOINT_ENV) {
            self.auth_endpoint = non_empty(value);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = self.api_endpoint.as_deref() {
            validate_endpoint_url(url, "api_endpoint")?;
        }
        if let Some(url) = self.auth_endpoint.as_deref() {
            validate_endpoint_url(url, "auth_endpoint")?;
        }
        if self.request_timeout_secs == Some(0) {
            bail!("request_timeout_secs must be greater than zero");
        }

        let mut seen = HashSet::new();
        for user in &self.users {
            validate_principal_id(&user.id)
                .with_context(|| format!("invalid user id '{}'", user.id))?;
            if !seen.insert(user.id.as_str()) {
                bail!("user '{}' is defined more than once", user.id);
            }
            if user.password.is_empty() {
                bail!("user '{}' must have a password", user.id);
            }
            if user.name.trim().is_empty() {
                bail!("user '{}' must have a display name", user.id);
            }
        }

        Ok(())
    }

    pub fn api_endpoint_url(&self) -> Result<Option<Url>> {
        self.api_endpoint
            .as_deref()
            .map(|url| validate_endpoint_url(url, "api_endpoint"))
            .transpose()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }
}

fn resolve_config_path<F>(explicit_path: Option<&Path>, lookup: F) -> Option<(PathBuf, bool)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = explicit_path {
        return Some((path.to_path_buf(), true));
    }
    if let Some(path) = lookup(CONFIG_PATH_ENV).and_then(non_empty) {
        return Some((PathBuf::from(path), true));
    }
    dirs::config_dir().map(|dir| (dir.join("askgate").join("config.json"), false))
}

fn validate_endpoint_url(raw_url: &str, field_name: &str) -> Result<Url> {
    let url = raw_url.trim();
    if url.is_empty() {
        bail!("{field_name} cannot be empty");
    }

    let parsed = Url::parse(url).with_context(|| format!("invalid {field_name} '{url}'"))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => bail!("unsupported {field_name} scheme '{other}', expected http/https"),
    }
    if parsed.host_str().is_none() {
        bail!("{field_name} must include a host");
    }

    Ok(parsed)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn default_industry() -> String {
    "unknown".to_string()
}

fn default_device() -> String {
    DEFAULT_DEVICE.to_string()
}

fn default_users() -> Vec<RegisteredUser> {
    let demo = |id: &str, password: &str, name: &str, role: Role, age: u8, industry: &str| {
        RegisteredUser {
            id: id.to_string(),
            password: password.to_string(),
            name: name.to_string(),
            role,
            age: Some(age),
            industry: industry.to_string(),
            device: default_device(),
        }
    };

    vec![
        demo(
            "student-123",
            "Student123!",
            "Alex (Student)",
            Role::Student,
            13,
            "education",
        ),
        demo(
            "teacher-456",
            "Teacher123!",
            "Sarah (Teacher)",
            Role::Teacher,
            39,
            "education",
        ),
        demo(
            "patient-789",
            "Patient123!",
            "John (Patient)",
            Role::Patient,
            49,
            "healthcare",
        ),
        demo(
            "provider-101",
            "Provider123!",
            "Dr. Smith (Doctor)",
            Role::Provider,
            44,
            "healthcare",
        ),
    ]
}
