//! Codeforge CLI
//!
//! - `serve`: run the HTTP surface
//! - `generate`: run one supervised generation and print the artifact JSON

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codeforge::models::artifact::{GenerationOptions, GenerationRequest, ProjectArtifact};
use codeforge::models::events::StreamEvent;
use codeforge::services::server;
use codeforge::services::supervisor::{
    LocalSource, PipelineSource, RemoteSource, RetrySupervisor, SupervisorConfig,
};
use codeforge::utils::telemetry::init_tracing;
use codeforge::{AppConfig, AppState};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "codeforge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate multi-file React projects from a prompt", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "CODEFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info", env = "CODEFORGE_LOG")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Listen address (overrides the configuration)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Generate one project
    Generate {
        /// What to build
        prompt: String,

        /// Stream from a running server instead of generating in-process
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Write the artifact here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Paths the project already has
        #[arg(long = "existing-file")]
        existing_files: Vec<String>,

        /// Ask for a Supabase-backed project
        #[arg(long)]
        supabase: bool,

        /// Ask for a Vercel-ready project
        #[arg(long)]
        vercel: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let state = AppState::from_config(&config)?;
            server::serve(state, &config.server.bind).await?;
        }
        Commands::Generate {
            prompt,
            endpoint,
            output,
            existing_files,
            supabase,
            vercel,
        } => {
            let request = GenerationRequest::from_prompt(prompt)
                .with_existing_files(existing_files)
                .with_options(GenerationOptions {
                    include_supabase: supabase,
                    deploy_to_vercel: vercel,
                });

            let artifact = match endpoint {
                Some(endpoint) => {
                    info!(%endpoint, "Generating against remote server");
                    let source = RemoteSource::new(endpoint)?;
                    supervise(source, config.supervisor.clone(), &request).await?
                }
                None => {
                    let state = AppState::from_config(&config)?;
                    supervise(LocalSource::new(state.runner), config.supervisor.clone(), &request)
                        .await?
                }
            };

            let json = serde_json::to_string_pretty(&artifact)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(files = artifact.files.len(), path = %path.display(), "Artifact written");
                }
                None => println!("{}", json),
            }
        }
    }
    Ok(())
}

async fn supervise<S: PipelineSource>(
    source: S,
    config: SupervisorConfig,
    request: &GenerationRequest,
) -> Result<ProjectArtifact> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling generation");
            on_signal.cancel();
        }
    });

    let supervisor = RetrySupervisor::new(source).with_config(config);
    let result = supervisor
        .run_with(request, &cancel, |event| match event {
            StreamEvent::Phase { status, .. } => info!("{}", status),
            StreamEvent::Error { error, .. } => warn!("{}", error),
            _ => {}
        })
        .await;
    result.map_err(|err| anyhow::anyhow!("{} ({})", err.user_message(), err))
}
