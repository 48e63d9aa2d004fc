use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{error, info};

use mindline::{chat, web_server, Config, GeminiClient, Language, SessionController};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve the chat page over HTTP.
    Serve {
        #[arg(long, env = "MINDLINE_HOST", default_value = "127.0.0.1", help = "Address to bind.")]
        host: IpAddr,
        #[arg(long, env = "MINDLINE_PORT", default_value_t = 8501, help = "Port for the web server.")]
        port: u16,
    },
    /// Chat in the terminal instead of the browser.
    Chat {
        #[arg(long, default_value = "English", help = "Response language: English, Hindi, Malayalam or Tamil.")]
        language: Language,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for GOOGLE_API_KEY and friends)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG environment variable (e.g., RUST_LOG=info,mindline=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("mindline starting with command: {:?}", cli.command);

    let config = Config::from_env().map_err(|e| {
        error!("Refusing to start: {}", e);
        e
    })?;

    let client = GeminiClient::new(&config).context("Failed to initialize Gemini client")?;
    // Leave room for the client's single retry inside the reply bound.
    let reply_timeout = config.timeout * 2 + std::time::Duration::from_secs(1);
    let controller = SessionController::new(Arc::new(client), reply_timeout);

    match cli.command {
        Commands::Serve { host, port } => {
            let addr = SocketAddr::new(host, port);
            let state = web_server::AppState::new(
                config.templates_dir.clone(),
                config.background_path.clone(),
                controller,
            )
            .with_session_ttl(config.session_ttl);

            let mut web_server_handle =
                tokio::spawn(async move { web_server::start_web_server(addr, state).await });

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, shutting down...");
                    web_server_handle.abort();
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(Ok(())) => info!("Web server task completed."),
                        Ok(Err(e)) => return Err(e),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }
            info!("Shutdown complete.");
        }
        Commands::Chat { language } => {
            chat::run_terminal_chat(&controller, language)
                .await
                .context("Chat session failed")?;
        }
    }

    Ok(())
}
