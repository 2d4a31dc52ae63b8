use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use toolscope::config::AppConfig;
use toolscope::index::{PhraseGenerator, ToolIndex};
use toolscope::providers::{OllamaChat, OllamaEmbedding};
use toolscope::server::{self, AppState, MetaToolHandler};
use toolscope::upstream::Supervisor;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (JSON)
    #[arg(short, long, env = "TOOLSCOPE_CONFIG", default_value = "toolscope.json")]
    config: PathBuf,

    /// Raise log verbosity to debug
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    init_tracing(&config.logging.log_level.default, args.debug);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        pid = std::process::id(),
        "toolscope starting"
    );

    // Providers
    let embedding = Arc::new(
        OllamaEmbedding::new(&config.semantic_kernel.ollama_embedding)
            .context("building embedding client")?,
    );
    let phrases = if config.semantic_kernel.use_enhanced_phrase_generation {
        let chat = Arc::new(
            OllamaChat::new(&config.semantic_kernel.ollama_chat)
                .context("building chat client")?,
        );
        PhraseGenerator::with_chat(
            chat,
            config.semantic_kernel.ollama_chat.phrase_generation_prompt.clone(),
            config.semantic_kernel.ollama_chat.temperature,
        )
    } else {
        PhraseGenerator::heuristic()
    };

    // Upstream fleet
    let supervisor = Arc::new(
        Supervisor::from_configs(config.mcp_servers.clone())
            .context("building upstream supervisor")?,
    );
    let (started, total) = supervisor.start_all().await;
    tracing::info!(started, total, "upstream servers started");

    // Tool index
    let index = Arc::new(ToolIndex::new(
        supervisor.clone(),
        embedding,
        phrases,
        config.semantic_kernel.vector_store.collection_name.clone(),
        config.semantic_kernel.vector_store.embedding_dimensions,
    ));
    match index.refresh().await {
        Ok(stats) => tracing::info!(
            servers = stats.servers,
            tools_indexed = stats.tools_indexed,
            tools_skipped = stats.tools_skipped,
            "initial index build complete"
        ),
        Err(e) => tracing::warn!(
            error = %e,
            "initial index build failed; search is unavailable until refresh_tool_index succeeds"
        ),
    }

    // HTTP front-end
    let handler = Arc::new(MetaToolHandler::new(index.clone(), supervisor.clone()));
    let app = server::router(AppState { handler, index });

    let addr: SocketAddr = format!("{}:{}", config.mcp_server.host, config.mcp_server.port)
        .parse()
        .or_else(|_| {
            // "localhost" and other hostnames are not SocketAddrs; fall back
            // to loopback with the configured port.
            format!("127.0.0.1:{}", config.mcp_server.port).parse()
        })
        .context("resolving listen address")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(address = %addr, "MCP endpoint listening at /mcp");

    axum::serve(listener, app)
        .with_graceful_shutdown(server::shutdown_signal())
        .await
        .context("serving HTTP")?;

    supervisor.stop_all().await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the configured level applies, and
/// `--debug` raises everything to debug.
fn init_tracing(configured_level: &str, debug: bool) {
    let default_directive = if debug {
        "debug".to_string()
    } else {
        normalize_level(configured_level)
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("toolscope={default_directive},warn")));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Map config log-level names (including .NET-style ones carried by the
/// config format) onto tracing directives.
fn normalize_level(level: &str) -> String {
    match level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "information" | "info" => "info",
        "warning" | "warn" => "warn",
        "error" | "critical" => "error",
        _ => "info",
    }
    .to_string()
}
