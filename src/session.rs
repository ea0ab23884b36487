use std::fmt;

use tracing::info;
use url::Url;

use crate::auth::{AcquiredToken, AuthError, TokenAcquirer};
use crate::dispatch::{DispatchError, Outcome};
use crate::principal::Principal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    Disconnected,
    ReadyForAuth,
    Connected,
}

impl ConnectivityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::ReadyForAuth => "ready_for_auth",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn derive_status(
    endpoint_configured: bool,
    principal_selected: bool,
    token_available: bool,
) -> ConnectivityStatus {
    match (endpoint_configured, principal_selected, token_available) {
        (false, _, _) => ConnectivityStatus::Disconnected,
        (true, true, true) => ConnectivityStatus::Connected,
        (true, _, _) => ConnectivityStatus::ReadyForAuth,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No principal selected.
    Idle,
    /// Principal chosen; no token obtained yet (or tokens were invalidated).
    Selected,
    Authenticating,
    Ready,
    AuthFailed,
}

/// Everything a dispatch needs to know about the current user session. The
/// endpoint is fixed at construction.
#[derive(Debug, Clone)]
pub struct SessionContext {
    endpoint: Option<Url>,
    principal: Option<Principal>,
    phase: SessionPhase,
}

impl SessionContext {
    pub fn new(endpoint: Option<Url>) -> Self {
        Self {
            endpoint,
            principal: None,
            phase: SessionPhase::Idle,
        }
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Records the selection without contacting the identity service.
    pub fn choose(&mut self, principal: Principal) {
        info!(principal = %principal.id, role = %principal.role, "principal selected");
        self.principal = Some(principal);
        self.phase = SessionPhase::Selected;
    }

    pub async fn select(
        &mut self,
        principal: Principal,
        acquirer: &TokenAcquirer,
    ) -> Result<AcquiredToken, AuthError> {
        info!(principal = %principal.id, role = %principal.role, "authenticating principal");
        self.phase = SessionPhase::Authenticating;
        let result = acquirer.acquire(&principal).await;
        self.principal = Some(principal);
        self.phase = match &result {
            Ok(_) => SessionPhase::Ready,
            Err(_) => SessionPhase::AuthFailed,
        };
        result
    }

    pub fn deselect(&mut self) -> Option<Principal> {
        self.phase = SessionPhase::Idle;
        let previous = self.principal.take();
        if let Some(principal) = &previous {
            info!(principal = %principal.id, "principal deselected");
        }
        previous
    }

    /// Drops every cached credential. A selected principal stays selected and
    /// re-authenticates on its next dispatch.
    pub fn invalidate_tokens(&mut self, acquirer: &TokenAcquirer) {
        acquirer.cache().clear();
        if self.principal.is_some() {
            self.phase = SessionPhase::Selected;
        }
        info!("credential cache cleared");
    }

    pub fn record_outcome(&mut self, result: &Result<Outcome, DispatchError>) {
        match result {
            Ok(_) => self.phase = SessionPhase::Ready,
            Err(DispatchError::Auth(_)) => self.phase = SessionPhase::AuthFailed,
            Err(_) => {}
        }
    }

    pub fn status(&self, acquirer: &TokenAcquirer) -> ConnectivityStatus {
        let token_available = self
            .principal
            .as_ref()
            .is_some_and(|principal| acquirer.can_acquire(principal));
        derive_status(
            self.endpoint.is_some(),
            self.principal.is_some(),
            token_available,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use url::Url;

    use super::{ConnectivityStatus, SessionContext, SessionPhase, derive_status};
    use crate::auth::{AuthError, TokenAcquirer};
    use crate::cache::CredentialCache;
    use crate::credentials::DerivedPlaceholderSecrets;
    use crate::dispatch::{DispatchError, ValidationError};
    use crate::principal::Principal;
    use crate::stub::{ExchangeBehavior, InferenceBehavior, ManualClock, StubServer};

    fn acquirer(auth_endpoint: Option<String>) -> TokenAcquirer {
        TokenAcquirer::new(
            reqwest::Client::new(),
            auth_endpoint,
            Arc::new(DerivedPlaceholderSecrets),
            CredentialCache::new(),
        )
        .with_clock(Arc::new(ManualClock::new(0)))
    }

    fn endpoint() -> Option<Url> {
        Some(Url::parse("https://api.example.com/ask").expect("url"))
    }

    #[test]
    fn status_table() {
        use ConnectivityStatus::{Connected, Disconnected, ReadyForAuth};

        assert_eq!(derive_status(false, false, false), Disconnected);
        assert_eq!(derive_status(false, true, true), Disconnected);
        assert_eq!(derive_status(true, false, false), ReadyForAuth);
        assert_eq!(derive_status(true, false, true), ReadyForAuth);
        assert_eq!(derive_status(true, true, false), ReadyForAuth);
        assert_eq!(derive_status(true, true, true), Connected);
        assert_eq!(Connected.as_str(), "connected");
        assert_eq!(ReadyForAuth.to_string(), "ready_for_auth");
    }

    #[tokio::test]
    async fn selection_moves_through_authentication_to_ready() {
        let stub = StubServer::spawn(
            ExchangeBehavior::Token("T1"),
            InferenceBehavior::Status(StatusCode::NOT_FOUND),
        )
        .await;
        let acquirer = acquirer(Some(stub.auth_url()));
        let mut session = SessionContext::new(endpoint());

        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(session.status(&acquirer), ConnectivityStatus::ReadyForAuth);

        let acquired = session
            .select(Principal::ad_hoc("maya"), &acquirer)
            .await
            .expect("select");
        assert_eq!(acquired.token.bearer, "T1");
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(session.status(&acquirer), ConnectivityStatus::Connected);

        let previous = session.deselect().expect("principal was selected");
        assert_eq!(previous.id, "maya");
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(session.status(&acquirer), ConnectivityStatus::ReadyForAuth);
    }

    #[tokio::test]
    async fn missing_endpoint_is_always_disconnected() {
        let acquirer = acquirer(None);
        let mut session = SessionContext::new(None);
        session
            .select(Principal::ad_hoc("maya"), &acquirer)
            .await
            .expect("fallback select");
        assert_eq!(session.status(&acquirer), ConnectivityStatus::Disconnected);
    }

    #[tokio::test]
    async fn cache_invalidation_returns_to_selected() {
        let acquirer = acquirer(None);
        let mut session = SessionContext::new(endpoint());
        session
            .select(Principal::ad_hoc("maya"), &acquirer)
            .await
            .expect("select");
        assert_eq!(acquirer.cache().len(), 1);

        session.invalidate_tokens(&acquirer);

        assert!(acquirer.cache().is_empty());
        assert_eq!(session.phase(), SessionPhase::Selected);
        assert_eq!(session.status(&acquirer), ConnectivityStatus::Connected);
    }

    #[tokio::test]
    async fn malformed_principal_fails_authentication() {
        let acquirer = acquirer(None);
        let mut session = SessionContext::new(endpoint());

        let err = session
            .select(Principal::ad_hoc("two words"), &acquirer)
            .await
            .expect_err("malformed id");
        assert!(matches!(err, AuthError::MalformedPrincipal { .. }));
        assert_eq!(session.phase(), SessionPhase::AuthFailed);
        assert_eq!(session.status(&acquirer), ConnectivityStatus::ReadyForAuth);
    }

    #[test]
    fn validation_failures_leave_phase_untouched() {
        let mut session = SessionContext::new(endpoint());
        session.choose(Principal::ad_hoc("maya"));

        session.record_outcome(&Err(DispatchError::Validation(ValidationError::EmptyQuery)));
        assert_eq!(session.phase(), SessionPhase::Selected);

        session.record_outcome(&Err(DispatchError::Auth(AuthError::MalformedPrincipal {
            id: "maya".to_string(),
            reason: "test".to_string(),
        })));
        assert_eq!(session.phase(), SessionPhase::AuthFailed);
    }
}
