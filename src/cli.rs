//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::api::validate_login;
use crate::db::{Database, NewUser, UserRole};
use crate::password::{generate_password, hash_password};
use axum::http::HeaderName;
use clap::Parser;
use std::num::NonZeroU32;
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

const MIN_TOKEN_SECRET_LENGTH: usize = 32;
const GENERATED_PASSWORD_LENGTH: usize = 20;

pub const ACCESS_SECRET_ENV: &str = "ACCESS_TOKEN_SECRET";
pub const REFRESH_SECRET_ENV: &str = "REFRESH_TOKEN_SECRET";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "portal-auth",
    about = "Session authentication service for the ministry portal"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORTAL_PORT", default_value = "7300")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "PORTAL_DATABASE", default_value = "portal-auth.db")]
    pub database: String,

    /// Public origin of the portal (e.g., "https://portal.example.org").
    /// Cookies are marked Secure when it uses HTTPS
    #[arg(long, env = "PORTAL_ORIGIN", default_value = "http://localhost:7300")]
    pub origin: String,

    /// Path to file containing the access token secret. Prefer the ACCESS_TOKEN_SECRET env var
    #[arg(long)]
    pub access_secret_file: Option<String>,

    /// Path to file containing the refresh token secret. Prefer the REFRESH_TOKEN_SECRET env var
    #[arg(long)]
    pub refresh_secret_file: Option<String>,

    /// Access token lifetime in seconds (capped at 7 days)
    #[arg(long, env = "PORTAL_ACCESS_TOKEN_TTL")]
    pub access_token_ttl: Option<u64>,

    /// Create an admin with this login and a generated password, then continue starting
    #[arg(long, value_name = "LOGIN")]
    pub create_admin: Option<String>,

    /// Header carrying the client IP when behind a reverse proxy (e.g., "X-Forwarded-For")
    #[arg(long, env = "PORTAL_IP_HEADER", value_parser = parse_header_name)]
    pub ip_header: Option<HeaderName>,

    /// Login attempts allowed per minute and client IP (0 disables the limit)
    #[arg(long, env = "PORTAL_LOGIN_ATTEMPTS_PER_MINUTE", default_value = "10")]
    pub login_attempts_per_minute: u32,

    /// Log output format
    #[arg(short, long, env = "PORTAL_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,
}

fn parse_header_name(s: &str) -> Result<HeaderName, String> {
    HeaderName::from_bytes(s.trim().as_bytes()).map_err(|e| format!("Invalid header name: {e}"))
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load a token secret from an environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_secret(env_var: &str, secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var(env_var) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(env_var) };
        secret
    } else if let Some(path) = secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            env = env_var,
            "Token secret is required. Set the environment variable (recommended) or use the secret file option"
        );
        return None;
    };

    if secret.len() < MIN_TOKEN_SECRET_LENGTH {
        error!(
            env = env_var,
            "Token secret is shorter than {} characters. Use a longer secret",
            MIN_TOKEN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Load both token secrets. They must be distinct so a token of one class can
/// never verify as the other.
pub fn load_token_secrets(args: &Args) -> Option<(String, String)> {
    let access = load_secret(ACCESS_SECRET_ENV, args.access_secret_file.as_deref())?;
    let refresh = load_secret(REFRESH_SECRET_ENV, args.refresh_secret_file.as_deref())?;

    if access == refresh {
        error!("Access and refresh token secrets must differ");
        return None;
    }

    Some((access, refresh))
}

/// Parse and validate the public origin URL.
/// Returns None and logs an error if validation fails.
pub fn validate_origin(origin: &str) -> Option<Url> {
    let url = match Url::parse(origin) {
        Ok(url) => url,
        Err(e) => {
            error!(origin = %origin, error = %e, "Invalid origin URL");
            return None;
        }
    };

    let is_https = url.scheme() == "https";
    let is_local = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));

    if !is_https && !is_local {
        error!("origin must use HTTPS for non-local deployments");
        return None;
    }

    Some(url)
}

/// Handle `--create-admin`: create an active admin with a generated password.
/// Returns false if startup should abort.
pub async fn handle_create_admin(db: &Database, login: &str) -> bool {
    let login = login.trim();
    if let Err(e) = validate_login(login) {
        error!(login = %login, error = ?e, "Invalid admin login");
        return false;
    }

    match db.users().get_by_login(login).await {
        Ok(Some(existing)) => {
            println!();
            println!(
                "User {} already exists (role: {})",
                existing.login,
                existing.role.as_str()
            );
            println!();
            return true;
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "Failed to check for existing user");
            return false;
        }
    }

    let password = generate_password(GENERATED_PASSWORD_LENGTH);
    let password_hash = match hash_password(&password) {
        Ok(hash) => hash,
        Err(e) => {
            error!(error = %e, "Failed to hash admin password");
            return false;
        }
    };

    let uuid = Uuid::new_v4().to_string();
    let result = db
        .users()
        .create(&NewUser {
            uuid: &uuid,
            login,
            display_name: login,
            role: UserRole::Admin,
            password_hash: &password_hash,
        })
        .await;

    match result {
        Ok(_) => {
            info!(user = %uuid, login = %login, "Admin user created");
            println!();
            println!("Admin user created: {}", login);
            println!("Password: {}", password);
            println!("This password is shown only once.");
            println!();
            true
        }
        Err(e) => {
            error!(error = %e, "Failed to create admin user");
            false
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    db: Database,
    origin: &Url,
    secrets: (String, String),
    access_token_ttl: Option<u64>,
    ip_header: Option<HeaderName>,
    login_attempts_per_minute: u32,
) -> ServerConfig {
    let (access_secret, refresh_secret) = secrets;

    ServerConfig {
        db,
        access_secret: access_secret.into_bytes(),
        refresh_secret: refresh_secret.into_bytes(),
        access_token_ttl,
        secure_cookies: origin.scheme() == "https",
        ip_header,
        login_attempts_per_minute: NonZeroU32::new(login_attempts_per_minute),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
