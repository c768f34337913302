//! Mentor CLI — the main entry point.
//!
//! Commands:
//! - `init`    — Initialize the config directory
//! - `chat`    — Interactive chat or single-message mode
//! - `serve`   — Start the HTTP gateway
//! - `tools`   — List built-in tools
//! - `status`  — Show system status

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "mentor",
    about = "Mentor — streaming AI study assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Init,

    /// Chat with the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List built-in tools
    Tools,

    /// Show system status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Chat { message } => commands::chat::run(message).await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Tools => commands::tools_cmd::run().await?,
        Commands::Status => commands::status::run().await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_with_message() {
        let cli = Cli::parse_from(["mentor", "chat", "--message", "你好"]);
        match cli.command {
            Commands::Chat { message } => assert_eq!(message.as_deref(), Some("你好")),
            _ => panic!("expected chat command"),
        }
    }

    #[test]
    fn parses_serve_with_port() {
        let cli = Cli::parse_from(["mentor", "serve", "--port", "9000"]);
        match cli.command {
            Commands::Serve { port } => assert_eq!(port, Some(9000)),
            _ => panic!("expected serve command"),
        }
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::parse_from(["mentor", "status", "--verbose"]);
        assert!(cli.verbose);
    }
}
