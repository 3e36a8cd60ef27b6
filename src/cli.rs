/// Command line interface
///
/// Every flag falls back to a `PC_*` environment variable. A config file
/// given with `--config` replaces flags and environment entirely.
use crate::{
    account::AccountManager,
    config::{ServerConfig, DEFAULT_MAX_DATA_SIZE},
    context::AppContext,
    mailer, server,
    storage::{SqliteBackend, Store},
};
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine};
use clap::{Args, Parser, Subcommand};
use rand::RngCore;
use std::{path::PathBuf, sync::Arc};

/// A command line interface for Padlock Cloud
#[derive(Parser, Debug)]
#[command(name = "padlock-cloud", version)]
#[command(about = "A command line interface for Padlock Cloud")]
pub struct Cli {
    /// Path to a TOML configuration file. If provided, all other flags and
    /// environment variables are ignored
    #[arg(short, long, env = "PC_CONFIG_PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Path to log file
    #[arg(long, env = "PC_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Path to error log file
    #[arg(long, env = "PC_ERR_FILE", global = true)]
    pub err_file: Option<PathBuf>,

    /// Email address to send error reports to
    #[arg(long, env = "PC_NOTIFY_ERRORS", global = true)]
    pub notify_errors: Option<String>,

    /// Path to the database file
    #[arg(long, env = "PC_DB_PATH", default_value = "db/padlock.sqlite", global = true)]
    pub db_path: PathBuf,

    /// Mail server for sending emails
    #[arg(long, env = "PC_EMAIL_SERVER", global = true)]
    pub email_server: Option<String>,

    /// Port to use with mail server
    #[arg(long, env = "PC_EMAIL_PORT", default_value_t = 587, global = true)]
    pub email_port: u16,

    /// Username for authentication with mail server
    #[arg(long, env = "PC_EMAIL_USER", global = true)]
    pub email_user: Option<String>,

    /// Password for authentication with mail server
    #[arg(long, env = "PC_EMAIL_PASSWORD", global = true, hide_env_values = true)]
    pub email_password: Option<String>,

    /// Sender address, defaults to the mail server username
    #[arg(long, env = "PC_EMAIL_FROM", global = true)]
    pub email_from: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Starts a Padlock Cloud server instance
    Runserver(RunServerArgs),

    /// Commands for managing accounts
    Accounts {
        #[command(subcommand)]
        command: AccountsCommand,
    },

    /// Generate a random 32 byte secret
    Gensecret,
}

#[derive(Args, Debug)]
pub struct RunServerArgs {
    /// Port to listen on
    #[arg(short, long, env = "PC_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Path to assets directory
    #[arg(long, env = "PC_ASSETS_PATH", default_value = "assets")]
    pub assets_path: PathBuf,

    /// Path to TLS certificate
    #[arg(long, env = "PC_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS key
    #[arg(long, env = "PC_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Public host for generated links, e.g. cloud.padlock.io
    #[arg(long, env = "PC_HOST")]
    pub host: Option<String>,

    /// Base64 encoded secret used for signing cookies
    #[arg(long, env = "PC_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Lifetime of api tokens in days
    #[arg(long, env = "PC_API_TOKEN_MAX_AGE_DAYS", default_value_t = 365)]
    pub api_token_max_age_days: i64,

    /// Lifetime of web sessions in hours
    #[arg(long, env = "PC_WEB_TOKEN_MAX_AGE_HOURS", default_value_t = 168)]
    pub web_token_max_age_hours: i64,

    /// Largest data blob a client may store, in bytes
    #[arg(long, env = "PC_MAX_DATA_SIZE", default_value_t = DEFAULT_MAX_DATA_SIZE)]
    pub max_data_size: usize,

    /// Per-ip request budget per minute, 0 disables throttling
    #[arg(long, env = "PC_REQUESTS_PER_MINUTE", default_value_t = 600)]
    pub requests_per_minute: u32,
}

#[derive(Subcommand, Debug)]
pub enum AccountsCommand {
    /// List existing accounts
    List,
    /// Create a new account
    Create { email: String },
    /// Display account
    Display { email: String },
    /// Delete an account and its data
    Delete { email: String },
}

impl Cli {
    /// Resolve the effective configuration
    pub fn server_config(&self) -> anyhow::Result<ServerConfig> {
        if let Some(path) = &self.config {
            let shown = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
            println!(
                "Loading config from {} - all other flags and environment variables will be ignored!",
                shown.display()
            );
            return Ok(ServerConfig::from_file(path)?);
        }

        let mut config = ServerConfig::default();
        config.storage.path = self.db_path.clone();
        config.logging.log_file = self.log_file.clone();
        config.logging.err_file = self.err_file.clone();
        config.logging.notify_errors = self.notify_errors.clone();
        config.email.server = self.email_server.clone();
        config.email.port = self.email_port;
        config.email.user = self.email_user.clone();
        config.email.password = self.email_password.clone();
        config.email.from = self.email_from.clone();

        if let Command::Runserver(args) = &self.command {
            config.server.port = args.port;
            config.server.assets_path = args.assets_path.clone();
            config.server.tls_cert = args.tls_cert.clone();
            config.server.tls_key = args.tls_key.clone();
            config.server.host = args.host.clone();
            config.server.secret = args.secret.clone();
            config.tokens.api_max_age_days = args.api_token_max_age_days;
            config.tokens.web_max_age_hours = args.web_token_max_age_hours;
            config.rate_limit.requests_per_minute = args.requests_per_minute;
            config.storage.max_data_size = args.max_data_size;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Random 32 byte secret, base64 encoded
pub fn gen_secret() -> String {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    STANDARD.encode(secret)
}

async fn open_store(config: &ServerConfig) -> anyhow::Result<Store> {
    let store = Store::new(Arc::new(SqliteBackend::new(&config.storage.path)));
    store
        .open()
        .await
        .with_context(|| format!("Failed to open database {}", config.storage.path.display()))?;
    Ok(store)
}

/// Execute the parsed command
pub async fn run(cli: Cli, config: ServerConfig) -> anyhow::Result<()> {
    match cli.command {
        Command::Runserver(_) => run_server(config).await,
        Command::Accounts { command } => run_accounts(command, &config).await,
        Command::Gensecret => {
            println!("{}", gen_secret());
            Ok(())
        }
    }
}

async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    tracing::info!(
        port = config.server.port,
        db = %config.storage.path.display(),
        assets = %config.server.assets_path.display(),
        tls = config.is_tls(),
        "Starting server"
    );

    let store = open_store(&config).await?;
    let mailer = mailer::from_config(&config.email)?;
    let ctx = AppContext::new(config, store, mailer)?;
    server::serve(ctx).await?;
    Ok(())
}

async fn run_accounts(command: AccountsCommand, config: &ServerConfig) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let manager = AccountManager::new(store.clone(), config.token_policy());

    let result = match command {
        AccountsCommand::List => manager.list_accounts().await.map(|accounts| {
            if accounts.is_empty() {
                println!("No existing accounts!");
            }
            for email in accounts {
                println!("{}", email);
            }
        }),
        AccountsCommand::Create { email } => manager
            .create_account(&email)
            .await
            .map(|account| println!("Created account {}", account.email)),
        AccountsCommand::Display { email } => {
            manager.get_account(&email).await.map(|account| {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&account).unwrap_or_default()
                )
            })
        }
        AccountsCommand::Delete { email } => manager
            .delete_account(&email)
            .await
            .map(|()| println!("Deleted account {}", email)),
    };

    store.close().await?;
    Ok(result?)
}
