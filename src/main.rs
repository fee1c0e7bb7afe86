use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use http_file_server::{
    build_router, AppState, Authenticator, Config, PortSpec, ServedRoot, StaticCredentials,
};

#[derive(Parser, Debug)]
#[command(name = "http-file-server")]
#[command(about = "Authenticated HTTP file server with directory listings")]
#[command(version)]
struct Cli {
    /// The host IP to listen on
    #[arg(short = 'H', long, env = "HTTP_FILE_SERVER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// The port to run on; `auto:N` picks the first free port from N
    #[arg(short = 'P', long, env = "HTTP_FILE_SERVER_PORT", default_value = "auto:8000")]
    port: PortSpec,

    /// The directory to serve
    #[arg(short = 'D', long, env = "HTTP_FILE_SERVER_ROOT", default_value = ".")]
    directory: PathBuf,

    /// Config file path (optional)
    #[arg(short, long, env = "HTTP_FILE_SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// Username accepted when system authentication is unavailable
    #[arg(long, env = "HTTP_FILE_SERVER_USERNAME")]
    username: Option<String>,

    /// Password for `--username`
    #[arg(long, env = "HTTP_FILE_SERVER_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, env = "HTTP_FILE_SERVER_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "http_file_server=debug,tower_http=debug"
    } else {
        "http_file_server=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load config from file if provided, otherwise use defaults
    let config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    let root = ServedRoot::new(&cli.directory).map_err(|e| {
        format!(
            "Cannot serve directory {}: {}",
            cli.directory.display(),
            e
        )
    })?;
    info!("Serving files from: {}", root.path().display());

    let static_pair = StaticCredentials::from_pair(cli.username, cli.password);
    let auth = Authenticator::from_config(&config, static_pair);
    if !auth.is_available() {
        warn!(
            "Set HTTP_FILE_SERVER_USERNAME and HTTP_FILE_SERVER_PASSWORD to enable password authentication"
        );
    }

    let port = cli.port.select(&cli.host)?;
    let state = AppState::new(root, config, auth);
    let app = build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind((cli.host.as_str(), port)).await?;
    info!("Starting http-file-server on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
