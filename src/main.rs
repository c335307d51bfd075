use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feed_core::Supervisor;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use twitter_monitor::api::ApiServer;
use twitter_monitor::channels::{resolve_snapshot, ConfigSource};
use twitter_monitor::config::Config;
use twitter_monitor::credentials::Credentials;
use twitter_monitor::discord::DiscordSink;
use twitter_monitor::follow_list::FollowListClient;
use twitter_monitor::twitter::TwitterClient;

#[derive(Parser)]
#[command(name = "twitter-monitor")]
#[command(about = "Relay tracked Twitter accounts and searches into Discord channels")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, env = "CONFIG_PATH")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay
    Run,
    /// Resolve the channel map and compiled rules, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;

    init_logging(&config.logging.level)?;

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_relay(config, cli.config).await,
        Commands::Check => check_config(&config).await,
    }
}

async fn run_relay(config: Config, config_path: String) -> Result<()> {
    tracing::info!("Starting twitter-monitor v{}", env!("CARGO_PKG_VERSION"));

    let credentials =
        Credentials::load(&config.credentials).with_context(|| "Failed to load credentials")?;

    let twitter = Arc::new(
        TwitterClient::new(&config.twitter.api_url, credentials.twitter_bearer_token.clone())
            .with_context(|| "Failed to create Twitter client")?,
    );
    let discord = Arc::new(
        DiscordSink::new(&config.discord.api_url, &credentials.discord_bot_token)
            .with_context(|| "Failed to create Discord client")?,
    );
    let source = Arc::new(ConfigSource::new(
        shellexpand::tilde(&config_path).to_string(),
        FollowListClient::new()?,
    ));

    let shutdown = CancellationToken::new();
    let supervisor = Arc::new(Supervisor::new(
        twitter.clone(),
        twitter,
        source,
        discord,
        config.stream.supervisor_config(),
        shutdown.clone(),
    ));

    let api_server = ApiServer::new(config.api.bind.clone());
    let state = supervisor.state();
    let api_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = api_server.start(state, api_shutdown).await {
            tracing::error!("API server error: {:#}", e);
        }
    });

    let mut runner = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run().await })
    };

    tokio::select! {
        result = &mut runner => {
            shutdown.cancel();
            result
                .context("Supervisor task panicked")?
                .context("Stream supervisor stopped")?;
            return Ok(());
        }
        signal = wait_for_shutdown() => signal?,
    }

    tracing::info!("Received shutdown signal, draining in-flight posts...");
    shutdown.cancel();
    runner
        .await
        .context("Supervisor task panicked")?
        .context("Stream supervisor stopped")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn check_config(config: &Config) -> Result<()> {
    println!("Checking configuration...");
    println!("✓ Configuration is valid ({} channels)", config.channels.len());

    Credentials::load(&config.credentials).with_context(|| "Failed to load credentials")?;
    println!("✓ Credentials are present");

    let lists = FollowListClient::new()?;
    let snapshot = resolve_snapshot(config, &lists)
        .await
        .with_context(|| "Failed to resolve channel map")?;
    println!(
        "✓ Channel map resolved: {} accounts, {} search queries",
        snapshot.channels.len(),
        snapshot.queries.len()
    );

    let rules = snapshot.rules().with_context(|| "Failed to compile filter rules")?;
    println!("✓ {} filter rules compiled:", rules.len());
    for rule in &rules {
        match &rule.tag {
            Some(tag) => println!("  [{tag}] {}", rule.value),
            None => println!("  {}", rule.value),
        }
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        },
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        },
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter.to_string())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .compact(),
        )
        .init();

    Ok(())
}
