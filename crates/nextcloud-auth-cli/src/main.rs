//! CLI entry point for nextcloud-auth.
//!
//! The `nextcloud-login` binary drives a Nextcloud OAuth login from the
//! terminal: it prints the authorize URL, waits for the redirect on a local
//! port, exchanges the code, and prints the normalized profile.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nextcloud_auth::{CallbackServer, NextcloudOptions, NextcloudStrategy};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Default configuration file, read if present.
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Sign in to a Nextcloud instance with OAuth 2.0.
#[derive(Parser)]
#[command(name = "nextcloud-login", version, about)]
struct Cli {
    /// Path to a TOML file with a `[nextcloud]` section.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Nextcloud base URL (overrides config and environment).
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// The instance serves app routes without `index.php/`.
    #[arg(long, global = true)]
    pretty_urls: bool,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved authorize, token, and profile endpoints.
    Endpoints,

    /// Run the full login and print the user's profile.
    Login {
        /// Local port the redirect URI points at.
        #[arg(long, default_value_t = 8400)]
        port: u16,

        /// Seconds to wait for the redirect.
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },

    /// Print the profile for an existing access token.
    Profile {
        /// OAuth access token.
        #[arg(long, env = "NEXTCLOUD_ACCESS_TOKEN", hide_env_values = true)]
        token: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let options = load_options(&cli)?;

    match cli.command {
        Commands::Endpoints => cmd_endpoints(options),
        Commands::Login { port, timeout } => cmd_login(options, port, timeout).await,
        Commands::Profile { token } => cmd_profile(options, &token).await,
    }
}

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Layer options: config file, then environment, then flags.
fn load_options(cli: &Cli) -> Result<NextcloudOptions> {
    let mut options = match &cli.config {
        Some(path) => NextcloudOptions::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            NextcloudOptions::load(DEFAULT_CONFIG_PATH)
                .with_context(|| format!("failed to load {DEFAULT_CONFIG_PATH}"))?
        }
        None => NextcloudOptions::default(),
    }
    .apply_env();

    if let Some(ref base_url) = cli.base_url {
        options.base_url = Some(base_url.clone());
    }
    if cli.pretty_urls {
        options.pretty_urls = true;
    }

    Ok(options)
}

fn build_strategy(options: NextcloudOptions) -> Result<NextcloudStrategy> {
    NextcloudStrategy::new(options).context(
        "incomplete Nextcloud configuration (set NEXTCLOUD_BASE_URL and NEXTCLOUD_CLIENT_ID)",
    )
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn cmd_endpoints(options: NextcloudOptions) -> Result<()> {
    let endpoints = build_strategy(options)?.endpoints();

    println!("authorize: {}", endpoints.authorization_url);
    println!("token:     {}", endpoints.token_url);
    println!("profile:   {}", endpoints.profile_url);
    Ok(())
}

async fn cmd_login(mut options: NextcloudOptions, port: u16, timeout: u64) -> Result<()> {
    if options.callback_url.is_none() {
        options.callback_url = Some(format!("http://127.0.0.1:{port}/callback"));
    }

    let strategy = build_strategy(options)?;
    let request = strategy.begin()?;

    println!("Open this URL in your browser to sign in:\n\n  {}\n", request.url);

    let callback = CallbackServer::start(port, timeout)
        .await
        .context("did not receive the OAuth redirect")?;

    let outcome = strategy
        .complete(&request, &callback)
        .await
        .context("login failed")?;

    info!(
        user_id = %outcome.profile.id,
        expires_at = ?outcome.tokens.expires_at,
        "signed in"
    );

    println!("{}", serde_json::to_string_pretty(&outcome.profile)?);
    Ok(())
}

async fn cmd_profile(options: NextcloudOptions, token: &str) -> Result<()> {
    let strategy = build_strategy(options)?;
    let profile = strategy
        .user_profile(token)
        .await
        .context("could not load profile")?;

    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn login_defaults() {
        let cli = Cli::try_parse_from(["nextcloud-login", "login"]).unwrap();
        match cli.command {
            Commands::Login { port, timeout } => {
                assert_eq!(port, 8400);
                assert_eq!(timeout, 300);
            }
            _ => panic!("expected login subcommand"),
        }
    }

    #[test]
    fn flags_override_options() {
        let cli = Cli::try_parse_from([
            "nextcloud-login",
            "--config",
            "/nonexistent/nextcloud.toml",
            "endpoints",
        ])
        .unwrap();
        assert!(load_options(&cli).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        std::fs::write(
            &path,
            "[nextcloud]\nbase_url = \"https://file.example.com\"\nclient_id = \"id\"\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "nextcloud-login",
            "--config",
            path.to_str().unwrap(),
            "--base-url",
            "https://flag.example.com",
            "--pretty-urls",
            "endpoints",
        ])
        .unwrap();
        let options = load_options(&cli).unwrap();

        assert_eq!(options.base_url.as_deref(), Some("https://flag.example.com"));
        assert!(options.pretty_urls);
    }
}
