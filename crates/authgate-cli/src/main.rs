//! authgate - command-line access to an authgate session.
//!
//! Logs in, keeps the session on disk (or in the OS keychain), and sends
//! authenticated requests that refresh the credential when it expires.

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use authgate_core::{ApiRequest, AuthClient, AuthError, Config};
use serde_json::Value;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Password taken from the environment instead of a prompt
const ENV_PASSWORD: &str = "AUTHGATE_PASSWORD";

const USAGE: &str = "\
Usage: authgate <command> [args]

Commands:
  login [username]                 Log in and store the session
  register <username> <email>      Create an account and store the session
  logout                           Notify the server and drop the session
  whoami                           Show the user behind the current credential
  refresh                          Exchange the current credential for a new one
  status                           Show local session state
  health                           Check the auth service
  request <METHOD> <path> [json]   Send an authenticated request";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(ExitCode::from(2));
    };

    let config = Config::load().context("Failed to load config")?;
    debug!(api = %config.api_base_url, storage = ?config.storage, "Config loaded");
    let auth = AuthClient::from_config(config.clone())?;

    let outcome = match command.as_str() {
        "login" => {
            let username = match args.get(1) {
                Some(u) => u.clone(),
                None => prompt_username(config.last_username.as_deref())?,
            };
            let password = read_password()?;
            let result = auth.login(&username, &password).await;
            if result.is_ok() {
                if let Err(e) = Config::update_file(|c| c.last_username = Some(username)) {
                    warn!(error = %e, "Failed to save config");
                }
            }
            result.map(|token| println!("Logged in as {}", display_name(&token.user)))
        }
        "register" => {
            let (Some(username), Some(email)) = (args.get(1), args.get(2)) else {
                eprintln!("{}", USAGE);
                return Ok(ExitCode::from(2));
            };
            let password = read_password()?;
            auth.register(username, email, &password)
                .await
                .map(|token| println!("Registered {}", display_name(&token.user)))
        }
        "logout" => auth.logout().await.map(|()| println!("Logged out")),
        "whoami" => auth
            .get_current_user()
            .await
            .and_then(|user| print_json(&user)),
        "refresh" => auth.refresh_credential().await.map(|session| {
            println!("Credential refreshed");
            if let Some(minutes) = session.minutes_until_expiry() {
                println!("Expires in about {} minutes", minutes);
            }
        }),
        "status" => {
            print_status(&auth);
            Ok(())
        }
        "health" => auth.health().await.map(|health| {
            println!("{}", health.status);
            if let Some(message) = health.message {
                println!("{}", message);
            }
        }),
        "request" => {
            let request = parse_request(&args[1..])?;
            match auth.gateway().send(request).await {
                Ok(response) => {
                    println!("{}", response.status);
                    if !response.body.is_empty() {
                        println!("{}", response.body);
                    }
                    if response.is_success() {
                        Ok(())
                    } else {
                        return Ok(ExitCode::FAILURE);
                    }
                }
                Err(e) => Err(e),
            }
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            return Ok(ExitCode::from(2));
        }
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            info!(error = ?e, "Command failed");
            eprintln!("Error: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn prompt_username(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    let username = username.trim();
    match (username.is_empty(), last) {
        (true, Some(last)) => Ok(last.to_string()),
        (true, None) => Err(anyhow::anyhow!("Username required")),
        (false, _) => Ok(username.to_string()),
    }
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var(ENV_PASSWORD) {
        return Ok(password);
    }
    let password = rpassword::prompt_password("Password: ")?;
    Ok(password)
}

fn display_name(user: &Value) -> String {
    user.get("username")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| user.to_string())
}

fn print_json(value: &Value) -> Result<(), AuthError> {
    let pretty = serde_json::to_string_pretty(value)
        .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
    println!("{}", pretty);
    Ok(())
}

fn print_status(auth: &AuthClient) {
    let Some(session) = auth.session().load() else {
        println!("Not logged in");
        return;
    };
    println!("Logged in as {}", display_name(&session.user));
    match session.minutes_until_expiry() {
        Some(_) if session.is_expired() => println!("Credential probably expired (will refresh on next request)"),
        Some(minutes) => println!("Credential expires in about {} minutes", minutes),
        None => println!("Credential expiry unknown"),
    }
}

/// `<METHOD> <path> [json-body]`
fn parse_request(args: &[String]) -> Result<ApiRequest> {
    let (Some(method), Some(path)) = (args.first(), args.get(1)) else {
        anyhow::bail!("Usage: authgate request <METHOD> <path> [json]");
    };
    let method = method
        .to_ascii_uppercase()
        .parse()
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let mut request = ApiRequest::new(method, path.clone());
    if let Some(body) = args.get(2) {
        let body: Value = serde_json::from_str(body).context("Request body is not valid JSON")?;
        request = request.json(body);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_request() {
        let request = parse_request(&args(&["post", "/api/v1/projects", r#"{"name": "comic"}"#])).unwrap();
        assert_eq!(request.method.as_str(), "POST");
        assert_eq!(request.url, "/api/v1/projects");
        assert_eq!(request.body, Some(json!({"name": "comic"})));

        assert!(parse_request(&args(&["GET"])).is_err());
        assert!(parse_request(&args(&["GET", "/x", "{bad"])).is_err());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(&json!({"username": "alice"})), "alice");
        assert_eq!(display_name(&json!({"id": 1})), r#"{"id":1}"#);
    }
}
