use std::collections::HashMap;

use tracing::debug;

use crate::config::RegisteredUser;
use crate::principal::Principal;

const PLACEHOLDER_SECRET_SUFFIX: &str = "123!";

/// Resolves the secret a principal presents to the credential exchange.
pub trait CredentialProvider: Send + Sync {
    fn resolve_secret(&self, principal: &Principal) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct RegisteredSecrets {
    secrets: HashMap<String, String>,
}

impl RegisteredSecrets {
    pub fn from_users(users: &[RegisteredUser]) -> Self {
        Self {
            secrets: users
                .iter()
                .map(|user| (user.id.clone(), user.password.clone()))
                .collect(),
        }
    }
}

impl CredentialProvider for RegisteredSecrets {
    fn resolve_secret(&self, principal: &Principal) -> Option<String> {
        self.secrets.get(&principal.id).cloned()
    }
}

/// NOT FOR PRODUCTION. Lets ad-hoc demo principals self-register with a
/// predictable secret; it provides no security at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivedPlaceholderSecrets;

impl CredentialProvider for DerivedPlaceholderSecrets {
    fn resolve_secret(&self, principal: &Principal) -> Option<String> {
        Some(derive_placeholder_secret(&principal.id))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistryWithPlaceholder {
    registered: RegisteredSecrets,
    derived: DerivedPlaceholderSecrets,
}

impl RegistryWithPlaceholder {
    pub fn new(registered: RegisteredSecrets) -> Self {
        Self {
            registered,
            derived: DerivedPlaceholderSecrets,
        }
    }
}

impl CredentialProvider for RegistryWithPlaceholder {
    fn resolve_secret(&self, principal: &Principal) -> Option<String> {
        if let Some(secret) = self.registered.resolve_secret(principal) {
            return Some(secret);
        }
        debug!(principal = %principal.id, "using derived placeholder secret for unregistered principal");
        self.derived.resolve_secret(principal)
    }
}

pub fn derive_placeholder_secret(principal_id: &str) -> String {
    let mut chars = principal_id.chars();
    let mut secret = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>(),
        None => String::new(),
    };
    secret.push_str(chars.as_str());
    secret.push_str(PLACEHOLDER_SECRET_SUFFIX);
    secret
}
