//! sessionward - sign in to an identity service and make authenticated
//! requests from the command line.
//!
//! The session survives between invocations through the configured
//! persistence sink; an expired access credential is refreshed on the next
//! request.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionward_core::{
    Collaborators, Config, FileSessionSink, HttpIdentityEndpoint, HttpTransport,
    KeyringSessionSink, LoginCredentials, PersistenceMode, PersistenceSink, RegistrationDetails,
    RequestDescriptor, SessionCipher, SessionError, SessionService, TracingMetricsSink,
};

// ============================================================================
// Constants
// ============================================================================

const BASE_URL_ENV: &str = "SESSIONWARD_BASE_URL";
const USERNAME_ENV: &str = "SESSIONWARD_USERNAME";
const PASSWORD_ENV: &str = "SESSIONWARD_PASSWORD";
/// Passphrase for the encrypted session file
const PASSPHRASE_ENV: &str = "SESSIONWARD_PASSPHRASE";

const USAGE: &str = "\
Usage: sessionward [--log-file <path>] <command>

Commands:
  login [username]            Sign in and store the session
  register <username> <email> Create an account
  activate <token>            Activate a registered account
  status                      Show the current session
  validate [--remote]         Check the session locally or with the server
  fetch <url> [--metrics]     GET a URL with the session credential
  signout                     Sign out and revoke the refresh token
";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Login { username: Option<String> },
    Register { username: String, email: String },
    Activate { token: String },
    Status,
    Validate { remote: bool },
    Fetch { url: String, show_metrics: bool },
    Signout,
    Help,
}

#[derive(Debug, PartialEq, Eq)]
struct Args {
    command: Command,
    log_file: Option<PathBuf>,
}

fn parse_args(raw: &[String]) -> Result<Args> {
    let mut log_file = None;
    let mut positional = Vec::new();
    let mut flags = Vec::new();

    let mut iter = raw.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--log-file" => {
                let path = iter.next().context("--log-file requires a path")?;
                log_file = Some(PathBuf::from(path));
            }
            "-h" | "--help" => flags.push("--help"),
            "--remote" => flags.push("--remote"),
            "--metrics" => flags.push("--metrics"),
            other if other.starts_with("--") => bail!("Unknown option: {}", other),
            other => positional.push(other.to_string()),
        }
    }

    if flags.contains(&"--help") {
        return Ok(Args {
            command: Command::Help,
            log_file,
        });
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        None | Some("help") => Command::Help,
        Some("login") => Command::Login {
            username: positional.next(),
        },
        Some("register") => Command::Register {
            username: positional.next().context("register requires a username")?,
            email: positional.next().context("register requires an email")?,
        },
        Some("activate") => Command::Activate {
            token: positional.next().context("activate requires a token")?,
        },
        Some("status") => Command::Status,
        Some("validate") => Command::Validate {
            remote: flags.contains(&"--remote"),
        },
        Some("fetch") => Command::Fetch {
            url: positional.next().context("fetch requires a URL")?,
            show_metrics: flags.contains(&"--metrics"),
        },
        Some("signout") | Some("logout") => Command::Signout,
        Some(other) => bail!("Unknown command: {}", other),
    };

    if let Some(extra) = positional.next() {
        bail!("Unexpected argument: {}", extra);
    }
    Ok(Args { command, log_file })
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow!("Invalid log file path: {}", path.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    Ok(guard)
}

fn persistence_sink(config: &Config) -> Result<Option<Arc<dyn PersistenceSink>>> {
    let sink: Arc<dyn PersistenceSink> = match config.persistence {
        PersistenceMode::None => return Ok(None),
        PersistenceMode::Keyring => Arc::new(KeyringSessionSink::default()),
        PersistenceMode::File => {
            let mut sink = FileSessionSink::new(config.cache_dir()?);
            if config.encrypt_session_file {
                let passphrase = std::env::var(PASSPHRASE_ENV).with_context(|| {
                    format!("{} must be set when encrypt_session_file is enabled", PASSPHRASE_ENV)
                })?;
                sink = sink.with_cipher(SessionCipher::new(passphrase)?);
            }
            Arc::new(sink)
        }
    };
    Ok(Some(sink))
}

fn build_service(config: &Config) -> Result<SessionService> {
    let base_url = std::env::var(BASE_URL_ENV)
        .ok()
        .or_else(|| config.identity_base_url.clone())
        .ok_or_else(|| {
            anyhow!(
                "No identity service configured. Set {} or identity_base_url in the config file.",
                BASE_URL_ENV
            )
        })?;

    let identity = HttpIdentityEndpoint::new(&base_url, config.request_timeout())?;
    let transport = HttpTransport::new(config.request_timeout())?;

    let mut collaborators = Collaborators::new(Arc::new(transport), Arc::new(identity))
        .with_metrics_sink(Arc::new(TracingMetricsSink));
    if let Some(sink) = persistence_sink(config)? {
        collaborators = collaborators.with_persistence(sink);
    }

    let service = SessionService::new(config.session_config(), collaborators)?;
    // A session that cannot be loaded is treated as signed out
    if let Err(e) = service.restore() {
        warn!(error = %e, "Failed to restore session");
    }
    Ok(service)
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn prompt_password(label: &str) -> Result<String> {
    Ok(rpassword::prompt_password(label)?)
}

async fn login(service: &SessionService, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match username.or_else(|| std::env::var(USERNAME_ENV).ok()) {
        Some(name) => name,
        None => match config.last_username {
            Some(ref last) => {
                let input = prompt(&format!("Username [{}]: ", last))?;
                if input.is_empty() {
                    last.clone()
                } else {
                    input
                }
            }
            None => prompt("Username: ")?,
        },
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) => password,
        Err(_) => prompt_password("Password: ")?,
    };

    let session = service
        .authenticate(&LoginCredentials::new(username.clone(), password))
        .await?;

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!(
        "Signed in as {} (access expires in {} minutes)",
        session.subject_id,
        session.credential.minutes_until_expiry()
    );
    Ok(())
}

async fn register(service: &SessionService, username: String, email: String) -> Result<()> {
    let password = prompt_password("Password: ")?;
    let confirm = prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    let result = service
        .register(&RegistrationDetails::new(username, email, password))
        .await?;
    println!("Registered account {}", result.subject_id);
    if result.activation_required {
        println!("Check your email for an activation token, then run `sessionward activate <token>`");
    }
    Ok(())
}

fn status(service: &SessionService) {
    let Some(session) = service.current_session() else {
        println!("Not signed in");
        return;
    };

    let now = Utc::now();
    let credential = &session.credential;
    println!("Signed in as {}", session.subject_id);
    println!("  signed in:     {}", session.issued_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if credential.is_access_expired_at(now) {
        println!("  access token:  expired (refreshed on next request)");
    } else {
        println!("  access token:  expires in {} minutes", credential.minutes_until_expiry());
    }
    match credential.refresh_token() {
        Some(_) => println!(
            "  refresh token: expires {}",
            credential.refresh_expires_at().format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("  refresh token: none"),
    }
    if let Some(at) = session.last_validated_at {
        println!("  last verified: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}

async fn validate(service: &SessionService, remote: bool) -> Result<()> {
    if !remote {
        if service.validate_session(false).await {
            println!("Session is valid");
            return Ok(());
        }
        bail!("No valid session");
    }

    match service.verify_session().await {
        Ok(()) => {
            println!("Session verified by the identity service");
            Ok(())
        }
        Err(SessionError::NotAuthenticated) => bail!("Not signed in"),
        Err(e) if e.is_session_expired() => bail!("Session rejected by the identity service; sign in again"),
        Err(e) => Err(anyhow!(e).context("Could not reach the identity service")),
    }
}

async fn fetch(service: &SessionService, url: String, show_metrics: bool) -> Result<()> {
    if !service.is_authenticated() {
        debug!("No session; sending request unauthenticated");
    }

    let result = service.execute(&RequestDescriptor::get(url)).await;

    if show_metrics {
        let report = serde_json::json!({
            "totals": service.security_metrics(),
            "recent_events": service.security_events(),
        });
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
    }

    match result {
        Ok(response) => {
            eprintln!("HTTP {}", response.status);
            println!("{}", response.body);
            if response.is_success() {
                Ok(())
            } else {
                bail!("Request failed with status {}", response.status)
            }
        }
        Err(e) if e.is_session_expired() => Err(anyhow!(e).context("Sign in again with `sessionward login`")),
        Err(e) => Err(e.into()),
    }
}

async fn run(command: Command) -> Result<()> {
    if command == Command::Help {
        print!("{}", USAGE);
        return Ok(());
    }

    let mut config = Config::load().context("Failed to load config")?;
    let service = build_service(&config)?;

    let result = match command {
        Command::Login { username } => login(&service, &mut config, username).await,
        Command::Register { username, email } => register(&service, username, email).await,
        Command::Activate { token } => service
            .activate(&token)
            .await
            .map(|()| println!("Account activated"))
            .map_err(Into::into),
        Command::Status => {
            status(&service);
            Ok(())
        }
        Command::Validate { remote } => validate(&service, remote).await,
        Command::Fetch { url, show_metrics } => fetch(&service, url, show_metrics).await,
        Command::Signout => {
            service.signout().await;
            println!("Signed out");
            Ok(())
        }
        Command::Help => Ok(()),
    };

    // Persist the final session state before exit
    service.flush().await;
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&raw)?;

    let _guard = init_tracing(args.log_file.as_deref())?;
    info!("sessionward starting");

    run(args.command).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Result<Args> {
        let raw: Vec<String> = raw.iter().map(|s| s.to_string()).collect();
        parse_args(&raw)
    }

    #[test]
    fn test_no_arguments_shows_help() {
        assert_eq!(args(&[]).expect("parse").command, Command::Help);
        assert_eq!(args(&["status", "--help"]).expect("parse").command, Command::Help);
    }

    #[test]
    fn test_log_file_anywhere() {
        let parsed = args(&["status", "--log-file", "/tmp/sw.log"]).expect("parse");
        assert_eq!(parsed.command, Command::Status);
        assert_eq!(parsed.log_file, Some(PathBuf::from("/tmp/sw.log")));

        assert!(args(&["status", "--log-file"]).is_err());
    }

    #[test]
    fn test_fetch_with_metrics() {
        let parsed = args(&["fetch", "https://api.test/items", "--metrics"]).expect("parse");
        assert_eq!(
            parsed.command,
            Command::Fetch {
                url: "https://api.test/items".into(),
                show_metrics: true
            }
        );
    }

    #[test]
    fn test_login_username_is_optional() {
        assert_eq!(
            args(&["login"]).expect("parse").command,
            Command::Login { username: None }
        );
        assert_eq!(
            args(&["login", "alice"]).expect("parse").command,
            Command::Login {
                username: Some("alice".into())
            }
        );
    }

    #[test]
    fn test_validate_remote_flag() {
        assert_eq!(
            args(&["validate", "--remote"]).expect("parse").command,
            Command::Validate { remote: true }
        );
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(args(&["register", "alice"]).is_err());
        assert!(args(&["frobnicate"]).is_err());
        assert!(args(&["status", "--verbose"]).is_err());
        assert!(args(&["status", "extra"]).is_err());
    }
}
