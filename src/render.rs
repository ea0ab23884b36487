use crate::config::RegisteredUser;
use crate::dispatch::{DispatchError, Outcome};
use crate::principal::{AgeCategory, Principal};
use crate::session::{ConnectivityStatus, SessionPhase};
use crate::token::TokenOrigin;

const UNKNOWN: &str = "unknown";

pub fn status_label(status: ConnectivityStatus) -> &'static str {
    match status {
        ConnectivityStatus::Disconnected => "Not Connected",
        ConnectivityStatus::ReadyForAuth => "Ready for Auth",
        ConnectivityStatus::Connected => "Connected",
    }
}

pub fn phase_label(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::Idle => "Idle",
        SessionPhase::Selected => "Selected",
        SessionPhase::Authenticating => "Authenticating",
        SessionPhase::Ready => "Ready",
        SessionPhase::AuthFailed => "Auth failed",
    }
}

pub fn principal_line(principal: &Principal) -> String {
    let age = match principal.age {
        Some(age) => format!("{} ({age})", capitalize(principal.age_category().as_str())),
        None => "Unknown".to_string(),
    };
    format!(
        "{} | {} | {} | {}",
        principal.display_name,
        age,
        capitalize(principal.role.as_str()),
        capitalize(&principal.industry)
    )
}

pub fn registry_row(user: &RegisteredUser) -> String {
    let category = AgeCategory::from_age(user.age);
    let age = user
        .age
        .map(|age| age.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}\t{}\t{}\t{} ({})\t{}",
        user.id,
        user.name,
        user.role,
        age,
        category.as_str(),
        user.industry
    )
}

pub fn token_origin_line(origin: TokenOrigin, user_pool_id: Option<&str>) -> String {
    match (origin, user_pool_id) {
        (TokenOrigin::Issued, Some(pool)) => {
            format!("Authentication: issued by identity service | User Pool: {pool}")
        }
        (TokenOrigin::Issued, None) => "Authentication: issued by identity service".to_string(),
        (TokenOrigin::Fallback, _) => {
            "Authentication: fallback token (unsigned, demo only)".to_string()
        }
    }
}

pub fn outcome(outcome: &Outcome, user_pool_id: Option<&str>) -> String {
    let metadata = &outcome.envelope.metadata;
    let guardrails = match metadata.guardrail_applied {
        Some(true) => "Active",
        Some(false) => "Inactive",
        None => "Not reported",
    };

    let mut lines = vec![outcome.envelope.response.clone(), String::new()];
    lines.push(token_origin_line(outcome.token.origin, user_pool_id));
    lines.push(format!(
        "Context: {} • {} • {} • {}",
        metadata.role.as_deref().unwrap_or(UNKNOWN),
        metadata.age.as_deref().unwrap_or(UNKNOWN),
        metadata.industry.as_deref().unwrap_or(UNKNOWN),
        metadata.device.as_deref().unwrap_or(UNKNOWN),
    ));
    lines.push(format!("Guardrails: {guardrails}"));
    lines.join("\n")
}

pub fn error(err: &DispatchError) -> String {
    format!("Error: {err}")
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
