//! llmserve - HTTP API for a pre-loaded LLM session

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llmserve_core::{load_engine, ModelConfig, Session, SharedSession};
use llmserve_server::cli::{self, Cli, CliExit};
use llmserve_server::{create_router, settings, AppState};

fn parse_args() -> Cli {
    match cli::parse_from(std::env::args_os()) {
        Ok(cli) => cli,
        Err(CliExit::Usage(line)) => {
            println!("{}", line);
            std::process::exit(1);
        }
        Err(CliExit::Clap(e)) => e.exit(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = parse_args();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "llmserve_server=debug,llmserve_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting llmserve");
    info!("Config path: {:?}", cli.config);

    // Load configuration
    let model_config = ModelConfig::from_file(&cli.config)?;
    let mut server_config = settings::load(cli.settings.as_deref())?;
    if let Some(host) = cli.host {
        server_config.host = host;
    }
    if let Some(port) = cli.port {
        server_config.port = port;
    }

    // Load the engine before accepting connections
    let engine = tokio::task::spawn_blocking(move || load_engine(&model_config)).await??;
    let session = Session::new(engine, &server_config.session);
    info!(
        "Session ready (engine: {}, busy policy: {:?})",
        session.engine_name(),
        server_config.session.busy_policy
    );
    let session = SharedSession::new(session, server_config.session.busy_policy);

    // Build router
    let addr = server_config.bind_addr();
    let app = create_router(AppState::new(session, server_config));

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
