//! nvrctl
//!
//! Command-line client for network video recorders.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client::auth::probe_system_info;
use client::config::Config;
use client::rpc::{RpcClient, DEFAULT_KEEP_ALIVE_SECS};
use client::storage::{connection_identity, CredentialStore, KeychainError, StoredCredentials};
use client::transport::HttpTransport;
use protocol::error::{ErrorKind, ProtocolError};

/// Environment variable holding the account password.
const PASSWORD_ENV: &str = "NVRLINK_PASSWORD";

/// Environment variable overriding the configured log level.
const LOG_LEVEL_ENV: &str = "NVRLINK_LOG_LEVEL";

/// nvrctl - talk to a network video recorder over its RPC interface.
#[derive(Parser, Debug)]
#[command(name = "nvrctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Recorder host, overriding the configuration
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Account name, overriding the configuration
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Log in, negotiate payload encryption and log out again
    Login {
        /// Store the password in the system keychain on success
        #[arg(long)]
        save: bool,
    },

    /// List camera channels
    Cameras {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show device model and firmware
    SystemInfo {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Query device properties over the digest-protected CGI channel
    Probe,

    /// Delete stored credentials for the selected device
    Forget,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    let filter = log_filter(cli.verbose, &config);
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(path) = &cli.config {
        tracing::info!("Using config file: {:?}", path);
    }

    config.apply_env_overrides();
    if let Some(host) = &cli.host {
        config.device.host = host.clone();
    }
    if let Some(user) = &cli.user {
        config.device.username = user.clone();
    }
    config.validate()?;

    match cli.command {
        Commands::Login { save } => {
            let password = resolve_password(&config)?;
            let client = connect(&config, &password).await?;
            let granted = client
                .keep_alive(DEFAULT_KEEP_ALIVE_SECS)
                .await
                .map_err(|e| describe(e, "Keep-alive failed"))?;
            println!(
                "Logged in to {} as {} (keep-alive {}s)",
                config.base_url(),
                config.device.username,
                granted
            );
            client.logout().await.map_err(|e| describe(e, "Logout failed"))?;

            if save {
                let identity = identity(&config);
                CredentialStore::system()
                    .put(
                        &identity,
                        &StoredCredentials::new(config.device.username.clone(), password),
                    )
                    .context("Failed to store credentials in keychain")?;
                println!("Credentials saved for {}", identity);
            }
        }
        Commands::Cameras { json } => {
            let password = resolve_password(&config)?;
            let client = connect(&config, &password).await?;
            let result = client.get_all_cameras().await;
            client.logout().await.map_err(|e| describe(e, "Logout failed"))?;
            let cameras = result.map_err(|e| describe(e, "Failed to list cameras"))?;

            if json {
                let redacted: Vec<_> = cameras.iter().map(|c| c.redacted()).collect();
                println!("{}", serde_json::to_string_pretty(&redacted)?);
            } else if cameras.is_empty() {
                println!("No cameras configured");
            } else {
                println!(
                    "{:<8} {:<24} {:<18} {:<8} {}",
                    "CHANNEL", "NAME", "ADDRESS", "ENABLED", "STATE"
                );
                for camera in &cameras {
                    println!(
                        "{:<8} {:<24} {:<18} {:<8} {}",
                        camera.channel,
                        camera.device_info.name,
                        camera.device_info.address,
                        if camera.enabled { "yes" } else { "no" },
                        camera.connection_state.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        Commands::SystemInfo { json } => {
            let password = resolve_password(&config)?;
            let client = connect(&config, &password).await?;
            let result = tokio::try_join!(client.get_system_info(), client.get_software_version());
            client.logout().await.map_err(|e| describe(e, "Logout failed"))?;
            let (info, version) = result.map_err(|e| describe(e, "Failed to query device"))?;

            if json {
                let value = serde_json::json!({ "system": info, "software": version });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Device type:   {}", info.device_type);
                println!("Serial number: {}", info.serial_number);
                println!("Processor:     {}", info.processor);
                println!("Firmware:      {} ({})", version.version, version.build_date);
            }
        }
        Commands::Probe => {
            let password = resolve_password(&config)?;
            let properties = probe_system_info(&config, &password)
                .await
                .map_err(|e| describe(e, "Probe failed"))?;
            for (key, value) in properties.iter() {
                println!("{}={}", key, value);
            }
        }
        Commands::Forget => {
            let identity = identity(&config);
            match CredentialStore::system().delete(&identity) {
                Ok(()) => println!("Removed stored credentials for {}", identity),
                Err(KeychainError::NotFound(_)) => {
                    println!("No stored credentials for {}", identity)
                }
                Err(e) => return Err(e).context("Failed to delete credentials"),
            }
        }
    }

    Ok(())
}

/// Log filter for the subscriber, which is installed before the environment
/// overrides run so their messages are not lost.
fn log_filter(verbose: bool, config: &Config) -> String {
    if verbose {
        return "debug".to_string();
    }
    match std::env::var(LOG_LEVEL_ENV) {
        Ok(level) if !level.is_empty() => level.to_lowercase(),
        _ => config.logging.log_level.to_lowercase(),
    }
}

fn identity(config: &Config) -> String {
    connection_identity(&config.device.username, &config.device.host, config.device.port)
}

/// Password from the environment, then the keychain.
fn resolve_password(config: &Config) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        if !password.is_empty() {
            tracing::debug!("Using password from {}", PASSWORD_ENV);
            return Ok(password);
        }
    }

    let identity = identity(config);
    match CredentialStore::system().get(&identity) {
        Ok(credentials) => {
            tracing::debug!("Using stored credentials for {}", identity);
            Ok(credentials.password)
        }
        Err(KeychainError::NotFound(_)) => anyhow::bail!(
            "No password for {}: set {} or run `nvrctl login --save`",
            identity,
            PASSWORD_ENV
        ),
        Err(e) => Err(e).context("Failed to read credentials from keychain"),
    }
}

/// Logs in and negotiates payload encryption.
async fn connect(config: &Config, password: &str) -> Result<RpcClient> {
    let transport = HttpTransport::from_config(config)
        .map_err(|e| describe(e, "Failed to create transport"))?;
    let client = RpcClient::new(Arc::new(transport));

    client
        .login(&config.device.username, password)
        .await
        .map_err(|e| describe(e, "Login failed"))?;
    client
        .get_encryption_info()
        .await
        .map_err(|e| describe(e, "Encryption negotiation failed"))?;

    Ok(client)
}

/// Wraps `err` with a message chosen by its kind.
fn describe(err: ProtocolError, action: &str) -> anyhow::Error {
    let hint = match err.kind() {
        ErrorKind::Auth => "wrong credentials or unsupported login scheme",
        ErrorKind::Transport => "device unreachable",
        ErrorKind::Decode => "unexpected response from device",
        ErrorKind::Remote => "device rejected the request",
        ErrorKind::Crypto => "payload encryption failed",
        ErrorKind::Precondition => "not logged in",
    };
    anyhow::Error::new(err).context(format!("{action} ({hint})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use protocol::error::AuthError;
    use serial_test::serial;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_login_command() {
        let cli = Cli::try_parse_from(["nvrctl", "login"]).unwrap();
        match cli.command {
            Commands::Login { save } => assert!(!save),
            _ => panic!("Expected Login command"),
        }
    }

    #[test]
    fn test_login_save() {
        let cli = Cli::try_parse_from(["nvrctl", "login", "--save"]).unwrap();
        assert!(matches!(cli.command, Commands::Login { save: true }));
    }

    #[test]
    fn test_cameras_json() {
        let cli = Cli::try_parse_from(["nvrctl", "cameras", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Cameras { json: true }));
    }

    #[test]
    fn test_system_info_command() {
        let cli = Cli::try_parse_from(["nvrctl", "system-info"]).unwrap();
        assert!(matches!(cli.command, Commands::SystemInfo { json: false }));
    }

    #[test]
    fn test_global_overrides() {
        let cli = Cli::try_parse_from([
            "nvrctl",
            "probe",
            "--host",
            "10.0.0.9",
            "--user",
            "operator",
            "-v",
            "--config",
            "/tmp/nvr.toml",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Probe));
        assert_eq!(cli.host.as_deref(), Some("10.0.0.9"));
        assert_eq!(cli.user.as_deref(), Some("operator"));
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/nvr.toml")));
    }

    #[test]
    fn test_forget_command() {
        let cli = Cli::try_parse_from(["nvrctl", "forget"]).unwrap();
        assert!(matches!(cli.command, Commands::Forget));
    }

    #[test]
    fn test_unknown_command_fails() {
        assert!(Cli::try_parse_from(["nvrctl", "reboot"]).is_err());
    }

    #[test]
    fn test_describe_uses_kind() {
        let err = describe(AuthError::Rechallenge.into(), "Login failed");
        assert!(err.to_string().contains("wrong credentials"));

        let err = describe(ProtocolError::Timeout("10s".into()), "Login failed");
        assert!(err.to_string().contains("device unreachable"));
    }

    #[test]
    #[serial]
    fn test_log_filter_precedence() {
        let mut config = Config::default();
        config.logging.log_level = "WARN".into();

        std::env::remove_var(LOG_LEVEL_ENV);
        assert_eq!(log_filter(false, &config), "warn");
        assert_eq!(log_filter(true, &config), "debug");

        std::env::set_var(LOG_LEVEL_ENV, "trace");
        assert_eq!(log_filter(false, &config), "trace");
        assert_eq!(log_filter(true, &config), "debug");

        std::env::set_var(LOG_LEVEL_ENV, "");
        assert_eq!(log_filter(false, &config), "warn");
        std::env::remove_var(LOG_LEVEL_ENV);
    }

    #[test]
    fn test_identity_from_config() {
        let mut config = Config::default();
        config.device.host = "nvr.local".into();
        config.device.port = 8080;
        config.device.username = "viewer".into();
        assert_eq!(identity(&config), "viewer@nvr.local:8080");
    }
}
