use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use reqwest::Client;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};
use url::Url;

use crate::auth::TokenAcquirer;
use crate::cache::CredentialCache;
use crate::config::HarnessConfig;
use crate::credentials::{RegisteredSecrets, RegistryWithPlaceholder};
use crate::dispatch::{DispatchError, Dispatcher, Outcome};
use crate::principal::PrincipalRegistry;
use crate::render;
use crate::session::SessionContext;
use crate::token::decode_claims;

const CHAT_HELP: &str = "\
Commands:
  /user <id>     select a principal (unknown ids become dynamic principals)
  /logout        deselect the current principal
  /clear-cache   drop every cached credential
  /status        show connectivity status
  /help          show this help
  /quit          leave
Anything else is sent as a question.";

#[derive(Debug, Parser)]
#[command(
    name = "askgate",
    version,
    about = "Ask an age-responsive endpoint on behalf of demo principals"
)]
pub struct Cli {
    /// JSON config file. Defaults to $ASKGATE_CONFIG, then the user config dir.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug logging for askgate itself (ignored when RUST_LOG is set).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List registered principals.
    Users,
    /// Show connectivity status.
    Status(SelectArgs),
    /// Acquire a bearer token and print it.
    Token(UserArgs),
    /// Send one question.
    Ask(AskArgs),
    /// Interactive session.
    Chat(SelectArgs),
}

#[derive(Debug, Args)]
struct SelectArgs {
    /// Principal to select first.
    #[arg(long)]
    user: Option<String>,
}

#[derive(Debug, Args)]
struct UserArgs {
    #[arg(long)]
    user: String,
}

#[derive(Debug, Args)]
struct AskArgs {
    #[arg(long)]
    user: String,
    /// Question text; multiple words are joined with spaces.
    #[arg(required = true)]
    query: Vec<String>,
}

pub struct Harness {
    config: HarnessConfig,
    registry: PrincipalRegistry,
    dispatcher: Dispatcher,
    endpoint: Option<Url>,
}

impl Harness {
    pub fn from_config(config: HarnessConfig) -> Result<Self> {
        let endpoint = config.api_endpoint_url()?;
        let http = build_http_client(config.request_timeout());
        let provider = RegistryWithPlaceholder::new(RegisteredSecrets::from_users(&config.users));
        let acquirer = TokenAcquirer::new(
            http.clone(),
            config.auth_endpoint.clone(),
            Arc::new(provider),
            CredentialCache::new(),
        )
        .with_audience(config.identity.client_id.clone());

        Ok(Self {
            registry: PrincipalRegistry::from_config(&config),
            dispatcher: Dispatcher::new(http, acquirer),
            endpoint,
            config,
        })
    }

    fn new_session(&self) -> SessionContext {
        SessionContext::new(self.endpoint.clone())
    }

    fn acquirer(&self) -> &TokenAcquirer {
        self.dispatcher.acquirer()
    }

    fn user_pool(&self) -> Option<&str> {
        self.config.identity.user_pool_id.as_deref()
    }
}

pub async fn run(cli: Cli, config: HarnessConfig) -> Result<()> {
    let harness = Harness::from_config(config)?;
    let mut stdout = std::io::stdout();

    match cli.command {
        Commands::Users => {
            for user in harness.registry.users() {
                writeln!(stdout, "{}", render::registry_row(user))?;
            }
            Ok(())
        }
        Commands::Status(args) => {
            let mut session = harness.new_session();
            if let Some(user) = args.user {
                session.choose(harness.registry.resolve(&user));
            }
            write_status(&harness, &session, &mut stdout)
        }
        Commands::Token(args) => print_token(&harness, &args.user, &mut stdout).await,
        Commands::Ask(args) => ask(&harness, &args.user, &args.query.join(" "), &mut stdout).await,
        Commands::Chat(args) => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            run_chat(&harness, args.user, stdin, &mut stdout).await
        }
    }
}

async fn print_token<W: Write>(harness: &Harness, user: &str, out: &mut W) -> Result<()> {
    let mut session = harness.new_session();
    let acquired = session
        .select(harness.registry.resolve(user), harness.acquirer())
        .await
        .context("authentication failed")?;

    if let Some(principal) = session.principal() {
        writeln!(out, "Principal: {}", render::principal_line(principal))?;
    }
    if let Some(warning) = &acquired.warning {
        writeln!(out, "Warning: {warning}")?;
    }
    writeln!(
        out,
        "{}",
        render::token_origin_line(acquired.token.origin, harness.user_pool())
    )?;
    writeln!(
        out,
        "Expires at: {} (epoch seconds)",
        acquired.token.expires_at_epoch_seconds
    )?;
    match decode_claims(&acquired.token.bearer) {
        Ok(claims) => writeln!(out, "Claims: {}", serde_json::to_string(&claims)?)?,
        Err(err) => debug!(error = %err, "token payload is opaque"),
    }
    writeln!(out, "Authorization: Bearer {}", acquired.token.bearer)?;
    Ok(())
}

async fn ask<W: Write>(harness: &Harness, user: &str, query: &str, out: &mut W) -> Result<()> {
    let mut session = harness.new_session();
    session.choose(harness.registry.resolve(user));

    let result = harness.dispatcher.send(&session, query).await;
    session.record_outcome(&result);
    let outcome = result.context("request failed")?;
    write_outcome(harness, &outcome, out)
}

async fn run_chat<R, W>(
    harness: &Harness,
    initial_user: Option<String>,
    input: R,
    out: &mut W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut session = harness.new_session();
    writeln!(
        out,
        "Status: {}",
        render::status_label(session.status(harness.acquirer()))
    )?;
    if let Some(user) = initial_user {
        select_principal(harness, &mut session, &user, out).await?;
    }

    let mut lines = input.lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let Some(line) = lines.next_line().await.context("failed to read input")? else {
            break;
        };

        match ChatCommand::parse(line.trim()) {
            ChatCommand::Quit => break,
            ChatCommand::Help => writeln!(out, "{CHAT_HELP}")?,
            ChatCommand::Status => write_status(harness, &session, out)?,
            ChatCommand::Select(user) => select_principal(harness, &mut session, user, out).await?,
            ChatCommand::Logout => match session.deselect() {
                Some(principal) => writeln!(out, "Signed out {}", principal.display_name)?,
                None => writeln!(out, "No principal selected")?,
            },
            ChatCommand::ClearCache => {
                session.invalidate_tokens(harness.acquirer());
                writeln!(out, "Credential cache cleared")?;
            }
            ChatCommand::Unknown(command) => {
                writeln!(out, "Unknown command '{command}'. Type /help for commands.")?
            }
            ChatCommand::Query(query) => {
                let result = harness.dispatcher.send(&session, query).await;
                session.record_outcome(&result);
                match result {
                    Ok(outcome) => write_outcome(harness, &outcome, out)?,
                    Err(err) => write_dispatch_error(&err, out)?,
                }
            }
        }
    }

    Ok(())
}

async fn select_principal<W: Write>(
    harness: &Harness,
    session: &mut SessionContext,
    user: &str,
    out: &mut W,
) -> Result<()> {
    let principal = harness.registry.resolve(user);
    writeln!(out, "Authenticating {}...", principal.display_name)?;

    match session.select(principal, harness.acquirer()).await {
        Ok(acquired) => {
            if let Some(warning) = &acquired.warning {
                writeln!(out, "Warning: {warning}")?;
            }
            if let Some(principal) = session.principal() {
                writeln!(out, "Selected {}", render::principal_line(principal))?;
            }
            writeln!(
                out,
                "{}",
                render::token_origin_line(acquired.token.origin, harness.user_pool())
            )?;
        }
        Err(err) => writeln!(out, "Error: {err}")?,
    }
    writeln!(out, "Phase: {}", render::phase_label(session.phase()))?;
    Ok(())
}

fn write_status<W: Write>(harness: &Harness, session: &SessionContext, out: &mut W) -> Result<()> {
    let acquirer = harness.acquirer();
    writeln!(
        out,
        "Status: {}",
        render::status_label(session.status(acquirer))
    )?;
    writeln!(out, "Phase: {}", render::phase_label(session.phase()))?;
    match session.principal() {
        Some(principal) => {
            writeln!(out, "Principal: {}", render::principal_line(principal))?;
            if let Some(token) = acquirer.cached_token(principal) {
                writeln!(
                    out,
                    "Token: {} (expires at {})",
                    token.origin, token.expires_at_epoch_seconds
                )?;
            }
        }
        None => writeln!(out, "Principal: none selected")?,
    }
    writeln!(out, "Cached tokens: {}", acquirer.cache().len())?;
    Ok(())
}

fn write_outcome<W: Write>(harness: &Harness, outcome: &Outcome, out: &mut W) -> Result<()> {
    if let Some(warning) = &outcome.warning {
        writeln!(out, "Warning: {warning}")?;
    }
    writeln!(out, "{}", render::outcome(outcome, harness.user_pool()))?;
    Ok(())
}

fn write_dispatch_error<W: Write>(err: &DispatchError, out: &mut W) -> Result<()> {
    writeln!(out, "{}", render::error(err))?;
    Ok(())
}

fn build_http_client(timeout: Duration) -> Client {
    match Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(err) => {
            warn!(error = %err, "failed to build configured HTTP client; falling back to default reqwest client");
            Client::new()
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ChatCommand<'a> {
    Query(&'a str),
    Select(&'a str),
    Logout,
    ClearCache,
    Status,
    Help,
    Quit,
    Unknown(&'a str),
}

impl<'a> ChatCommand<'a> {
    fn parse(line: &'a str) -> Self {
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Query(line);
        };

        let mut parts = rest.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).unwrap_or_default();
        match name {
            "user" | "select" if !arg.is_empty() => Self::Select(arg),
            "logout" | "deselect" => Self::Logout,
            "clear-cache" => Self::ClearCache,
            "status" => Self::Status,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            _ => Self::Unknown(line),
        }
    }
}
