use anyhow::{Context, Result};
use clap::Parser;
use interview_api::config::Config;
use interview_api::state::AppState;
use interview_api::{cors_layer, router};
use interview_core::gemini::{GeminiConfig, GeminiProvider};
use interview_core::lm_studio::{LmStudioConfig, LmStudioProvider};
use interview_core::prompt::InterviewPrompts;
use interview_core::{InterviewProvider, Orchestrator};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "WebSocket server for AI-driven voice interviews")]
struct Cli {
    /// Address to listen on, overriding BIND_ADDRESS
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Directory with system.md / opening.md prompt overrides, overriding PROMPTS_DIR
    #[arg(long)]
    prompts_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load application configuration")?;
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if let Some(dir) = cli.prompts_dir {
        config.prompts_dir = Some(dir);
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting interview service...");

    // --- 3. Load Prompts ---
    let prompts = match &config.prompts_dir {
        Some(dir) => InterviewPrompts::from_dir(dir).context("Failed to load interviewer prompts")?,
        None => InterviewPrompts::default(),
    };

    // --- 4. Initialize Providers ---
    let bind_address = config.bind_address;
    let cors = cors_layer(&config.cors_origins);
    let close_grace = config.close_grace;
    let orchestrator = build_orchestrator(config, prompts).await?;

    // --- 5. Serve ---
    let state = Arc::new(AppState::new(orchestrator, close_grace));
    let app = router(state, cors);

    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    tracing::info!("Interview server listening on {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Interview server stopped");
    Ok(())
}

async fn build_orchestrator(config: Config, prompts: InterviewPrompts) -> Result<Orchestrator> {
    let primary: Option<Arc<dyn InterviewProvider>> = if config.use_lm_studio {
        let lm_config = LmStudioConfig::new(config.lm_studio_base_url.clone())
            .with_model(config.lm_studio_model.clone());
        let provider = LmStudioProvider::connect(lm_config, prompts.clone())
            .await
            .context("Failed to set up LM Studio provider")?;
        Some(Arc::new(provider))
    } else {
        tracing::info!("LM Studio disabled, using Gemini only");
        None
    };

    let secondary: Option<Arc<dyn InterviewProvider>> = match config.gemini_api_key {
        Some(api_key) => {
            let gemini_config = GeminiConfig::new(api_key)
                .with_model(config.gemini_model)
                .with_base_url(config.gemini_base_url);
            Some(Arc::new(
                GeminiProvider::new(gemini_config, prompts)
                    .context("Failed to set up Gemini provider")?,
            ))
        }
        None => {
            tracing::warn!("GEMINI_API_KEY not set, no fallback provider available");
            None
        }
    };

    if primary.is_none() && secondary.is_none() {
        tracing::warn!("No AI provider configured; interviews will fail to start");
    }

    Ok(Orchestrator::new(primary, secondary, config.use_lm_studio))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}
