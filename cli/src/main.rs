//! CSMS realtime: CLI server and client
//!
//! ```sh
//! # Run the notification server (~/.config/csms-realtime/config.toml)
//! csms-realtime-cli serve
//!
//! # Validate config without starting
//! csms-realtime-cli --check
//!
//! # Mint a development token for a tenant
//! csms-realtime-cli token --tenant tenantA
//!
//! # Stay subscribed, reconnecting as needed, and print every event
//! csms-realtime-cli listen --token <jwt>
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use csms_realtime::auth::{create_token, JwtConfig};
use csms_realtime::config::{config_path_from_env, AppConfig};
use csms_realtime::infrastructure::ws_client::{
    is_normal_closure, ClientOptions, ConnectionEvent, EventKind, ReconnectPolicy, ReconnectingConnection,
};
use csms_realtime::server::{init_tracing, ServerHandle, ServerOptions};

/// CSMS realtime: tenant-scoped change notifications for EV charging.
#[derive(Parser, Debug)]
#[command(
    name = "csms-realtime-cli",
    version,
    about = "Real-time change notifications for a multi-tenant CSMS",
    long_about = "Runs the notification hub or connects to one as a subscriber.\n\n\
                  Default config: ~/.config/csms-realtime/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, global = true, env = "CSMS_REALTIME_CONFIG")]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Validate the configuration file and exit.
    #[arg(long)]
    check: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the notification server.
    Serve {
        /// Override the listen port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Subscribe to a server and print every event.
    Listen {
        /// Subscriber endpoint; defaults to `[client].url`.
        #[arg(long)]
        url: Option<String>,
        /// Token sent as `Authorization: Bearer`.
        #[arg(long)]
        token: String,
        /// Override `[client].auto_reconnect_max_retries` (-1 = forever).
        #[arg(long, allow_hyphen_values = true)]
        max_retries: Option<i32>,
        /// Override `[client].auto_reconnect_timeout` in seconds (0 = never).
        #[arg(long)]
        reconnect_timeout: Option<u64>,
    },
    /// Mint a development token signed with `[security].jwt_secret`.
    Token {
        #[arg(long)]
        tenant: String,
        #[arg(long, default_value = "cli")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // ── Load configuration ─────────────────────────────────────
    let config_path = cli.config.clone().unwrap_or_else(config_path_from_env);

    let mut config = match AppConfig::load(&config_path) {
        Ok(mut cfg) => {
            if let Some(ref level) = cli.log_level {
                cfg.logging.level = level.clone();
            }
            init_tracing(&cfg);
            info!("Configuration loaded from {}", config_path.display());
            cfg
        }
        Err(e) => {
            if cli.check {
                eprintln!("❌ Invalid configuration in {}: {}", config_path.display(), e);
                std::process::exit(1);
            }
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(
                    cli.log_level.as_deref().unwrap_or("info"),
                ))
                .init();
            error!("Failed to load config from {}: {}", config_path.display(), e);
            error!("Using default configuration.");
            AppConfig::default()
        }
    };

    if cli.check {
        println!("✅ Configuration is valid");
        println!("   Config file   : {}", config_path.display());
        println!("   Listen address: {}", config.server.address());
        println!(
            "   Flush periods : list {}s, single {}s",
            config.notifications.list_interval_secs, config.notifications.single_interval_secs
        );
        println!("   Client URL    : {}", config.client.url);
        println!("   Log level     : {}", config.logging.level);
        return Ok(());
    }

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => {
            if let Some(port) = port {
                info!("CLI override: port = {}", port);
                config.server.port = port;
            }
            serve(config).await
        }
        Command::Listen {
            url,
            token,
            max_retries,
            reconnect_timeout,
        } => {
            if let Some(url) = url {
                config.client.url = url;
            }
            if let Some(max) = max_retries {
                config.client.auto_reconnect_max_retries = max;
            }
            if let Some(secs) = reconnect_timeout {
                config.client.auto_reconnect_timeout = secs;
            }
            listen(config, token).await
        }
        Command::Token { tenant, user } => {
            let token = create_token(&user, Some(&tenant), &JwtConfig::from(&config))?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let handle = ServerHandle::start(ServerOptions {
        config,
        ..Default::default()
    })
    .await?;
    handle.install_signal_handler();

    info!("🚀 Press Ctrl+C to shutdown gracefully.");

    handle.shutdown_signal().wait().await;
    handle.wait().await;
    Ok(())
}

async fn listen(config: AppConfig, token: String) -> Result<(), Box<dyn std::error::Error>> {
    let client = &config.client;
    let mut options = ClientOptions::from(client);
    options
        .headers
        .push(("Authorization".to_string(), format!("Bearer {token}")));

    let connection = ReconnectingConnection::new(client.url.clone(), options, ReconnectPolicy::from(client));

    // Why the session stopped, if it stopped on a failure
    let last_failure: Arc<Mutex<Option<String>>> = Arc::default();

    let failure = last_failure.clone();
    connection.on(EventKind::Open, move |_| {
        info!("✅ Subscribed");
        if let Ok(mut failure) = failure.lock() {
            *failure = None;
        }
    });
    let failure = last_failure.clone();
    connection.on(EventKind::Error, move |event| {
        if let (ConnectionEvent::Error(err), Ok(mut failure)) = (event, failure.lock()) {
            *failure = Some(err.to_string());
        }
    });
    connection.on(EventKind::Message, |event| {
        if let ConnectionEvent::Message(message) = event {
            if let Ok(text) = message.to_text() {
                println!("{text}");
            }
        }
    });
    let failure = last_failure.clone();
    connection.on(EventKind::Close, move |event| {
        if let ConnectionEvent::Close { code, reason } = event {
            warn!(code = *code, reason = %reason, "Subscription closed");
            if !is_normal_closure(*code) {
                if let Ok(mut failure) = failure.lock() {
                    *failure = Some(format!("closed with code {code}"));
                }
            }
        }
    });
    connection.on(EventKind::Reconnect, |event| {
        if let ConnectionEvent::Reconnect(cause) = event {
            info!(cause = %cause, "Reconnecting");
        }
    });
    let failure = last_failure.clone();
    connection.on(EventKind::Maximum, move |event| {
        if let (ConnectionEvent::Maximum(cause), Ok(mut failure)) = (event, failure.lock()) {
            *failure = Some(format!("reconnect budget exhausted: {cause}"));
        }
    });

    info!(url = %client.url, "📡 Connecting...");
    connection.open();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Interrupted");
            connection.close(Some(1000), "client exit");
            Ok(())
        }
        _ = connection.settled() => {
            let failure = last_failure.lock().ok().and_then(|failure| failure.clone());
            match failure {
                Some(cause) => {
                    error!(cause = %cause, retries = connection.retry_count(), "Subscription ended");
                    Err(format!("subscription ended: {cause}").into())
                }
                None => {
                    info!("Subscription ended");
                    Ok(())
                }
            }
        }
    }
}
