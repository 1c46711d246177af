//! sitelink-watch - live building data in the terminal
//!
//! Signs in with a bearer token, mounts the configured feeds and prints every
//! change pushed by the building server until interrupted.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use sitelink_proto::{Activity, Device};
use sitelink_sync::{
    live, ConnectionEvent, Credential, CredentialStore, LiveCollection, SyncContext,
};
use sitelink_watch::{render, Feed, WatchConfig, WatchError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "sitelink-watch")]
#[command(about = "Watch live sitelink building data")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow live feeds
    Watch {
        /// Path to config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Push server URL (overrides config)
        #[arg(long)]
        server: Option<String>,

        /// REST API base URL (overrides config)
        #[arg(long)]
        api: Option<String>,

        /// Bearer token
        #[arg(long, env = "SITELINK_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Feeds to follow (overrides config)
        #[arg(long, value_enum, value_delimiter = ',')]
        feed: Vec<Feed>,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "sitelink.json")]
        output: PathBuf,

        /// Push server URL
        #[arg(long, default_value = "ws://localhost:8080/push")]
        server: String,

        /// REST API base URL
        #[arg(long, default_value = "http://localhost:8080/api")]
        api: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("sitelink=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            config,
            server,
            api,
            token,
            feed,
        } => {
            let mut settings = match config {
                Some(path) => WatchConfig::from_file(path)?,
                None => WatchConfig::default(),
            };
            if let Some(server) = server {
                settings.server_url = server;
            }
            if let Some(api) = api {
                settings.api_url = api;
            }
            if !feed.is_empty() {
                settings.feeds = feed;
            }
            settings.validate()?;

            let token = token.ok_or(WatchError::MissingToken)?;
            run_watch(settings, token).await?;
        }

        Commands::InitConfig {
            output,
            server,
            api,
        } => {
            init_config(&output, server, api)?;
        }
    }

    Ok(())
}

async fn run_watch(settings: WatchConfig, token: String) -> anyhow::Result<()> {
    info!(
        server = %settings.server_url,
        api = %settings.api_url,
        feeds = ?settings.feeds,
        "starting sitelink-watch"
    );

    let credentials = CredentialStore::new();
    credentials.set(Credential::bearer(token))?;

    let ctx = SyncContext::connect_to(
        &settings.server_url,
        &settings.api_url,
        credentials,
        settings.sync_config(),
    )?;
    ctx.bind_session();

    let mut events = ctx.manager().events();
    let device_feed: Option<LiveCollection<Device>> = settings
        .feeds
        .contains(&Feed::Devices)
        .then(|| live::devices(&ctx))
        .transpose()?;
    let activity_feed: Option<LiveCollection<Activity>> = settings
        .feeds
        .contains(&Feed::Activities)
        .then(|| live::activities(&ctx))
        .transpose()?;

    let mut device_changes = device_feed.as_ref().map(LiveCollection::watch);
    let mut activity_changes = activity_feed.as_ref().map(LiveCollection::watch);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "connection events lagged"),
                Err(RecvError::Closed) => break,
            },
            Some(text) = next_render(&mut device_changes, render::devices) => {
                println!("{text}");
            }
            Some(text) = next_render(&mut activity_changes, render::activities) => {
                println!("{text}");
            }
        }
    }

    drop(device_feed);
    drop(activity_feed);
    ctx.shutdown();
    Ok(())
}

/// Resolves with the rendered state when a followed collection changes.
/// Never resolves for a feed that is not followed.
async fn next_render<T>(
    rx: &mut Option<watch::Receiver<T>>,
    render: fn(&T) -> String,
) -> Option<String> {
    match rx {
        Some(rx) => {
            rx.changed().await.ok()?;
            let text = render(&rx.borrow_and_update());
            Some(text)
        }
        None => std::future::pending().await,
    }
}

fn print_event(event: &ConnectionEvent) {
    if let Some(text) = render::event(event) {
        if event.is_error() {
            eprintln!("{text}");
        } else {
            println!("{text}");
        }
    }
}

fn init_config(output: &Path, server: String, api: String) -> anyhow::Result<()> {
    let config = WatchConfig {
        server_url: server,
        api_url: api,
        ..WatchConfig::default()
    };
    config.validate()?;

    std::fs::write(output, config.to_json_pretty()?)?;
    info!(path = %output.display(), "wrote config");
    println!("Config written to {}", output.display());
    Ok(())
}
