use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{init_structured_logging, LoggingConfig};
use orchestrator::{
    AgentRouter, CannedExecutor, ChatRequest, Coordinator, CoordinatorDeps, HttpAgentTransport,
    InMemoryCache, InMemoryStore, IntentClassifier, MpscChannel, OrchestratorConfig,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

mod config;

use config::ConfigLoader;

#[derive(Parser)]
#[command(name = "concierge")]
#[command(about = "Agent orchestration and A2A messaging layer")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./concierge.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator and answer one request per stdin line
    Serve {
        /// User id the requests are sent as
        #[arg(long, default_value = "local-user")]
        user: String,
        /// Solicit the two collaborator agents on every request
        #[arg(long)]
        collaborate: bool,
    },
    /// Show the intent and routing decision for a text
    Classify { text: String },
    /// Start the coordinator, print its health report and stop
    Health,
    /// Print an example configuration file
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::ExampleConfig = cli.command {
        println!("{}", ConfigLoader::generate_example_config()?);
        return Ok(());
    }

    let mut loader = ConfigLoader::new();
    if let Some(path) = cli.config {
        loader = loader.with_path(path);
    }
    let (app_config, source) = loader.load().await?;

    init_structured_logging(
        LoggingConfig::default()
            .with_level_name(&app_config.logging.level)
            .with_json_output(app_config.logging.json),
    )?;
    debug!(source = ?source, "Configuration loaded");

    match cli.command {
        Commands::Serve { user, collaborate } => serve(app_config.orchestrator, user, collaborate).await,
        Commands::Classify { text } => classify(app_config.orchestrator, &text),
        Commands::Health => health(app_config.orchestrator).await,
        Commands::ExampleConfig => Ok(()),
    }
}

fn build_coordinator(config: OrchestratorConfig) -> Result<Coordinator> {
    let transport = HttpAgentTransport::new(config.reliability.timeout.message_timeout());
    let deps = CoordinatorDeps::new(Arc::new(transport), Arc::new(CannedExecutor::default()))
        .with_store(Arc::new(InMemoryStore::default()))
        .with_cache(Arc::new(InMemoryCache::default()));
    Ok(Coordinator::new(config, deps)?)
}

async fn serve(config: OrchestratorConfig, user: String, collaborate: bool) -> Result<()> {
    let coordinator = build_coordinator(config)?;
    let state = coordinator.startup().await?;
    info!(state = %state, user_id = %user, "Ready for requests on stdin");

    let hub = coordinator.hub().context("connection hub missing after startup")?;
    let (channel, mut pushed) = MpscChannel::pair();
    hub.connect(&user, Arc::new(channel)).await;
    let forwarder = tokio::spawn(async move {
        while let Some(frame) = pushed.recv().await {
            debug!(frame = %frame, "Pushed frame");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(text) = line else {
            break;
        };
        if text.trim().is_empty() {
            continue;
        }

        let mut request = ChatRequest::new(user.as_str(), text);
        request.collaborate = collaborate;
        let response = coordinator.handle_request(request).await?;
        println!("{}", serde_json::to_string(&response)?);
    }

    for error in coordinator.shutdown().await {
        warn!(error = %error, "Shutdown error");
    }
    forwarder.abort();
    Ok(())
}

fn classify(config: OrchestratorConfig, text: &str) -> Result<()> {
    let router = AgentRouter::new(config.agents)?;
    let intent = IntentClassifier::new().classify(text);
    let primary = router.select_primary(intent);

    let decision = json!({
        "intent": intent,
        "primary_agent": primary,
        "collaborators": router.get_collaborators(primary),
    });
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

async fn health(config: OrchestratorConfig) -> Result<()> {
    let coordinator = build_coordinator(config)?;
    coordinator.startup().await?;
    let report = coordinator.health_check().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    coordinator.shutdown().await;
    Ok(())
}
