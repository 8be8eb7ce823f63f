use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use unichat_http::{ConfigError, HeaderIdentity, ServerConfig, ServerConfigBuilder, serve};

mod summary;

use summary::config_summary;

#[derive(Parser, Debug)]
#[command(name = "unichat", version)]
#[command(about = "UniChat realtime notification server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the realtime server until SIGINT or SIGTERM
    Serve {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Print the effective configuration as JSON and exit
    CheckConfig {
        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Command-line overrides applied on top of `UNICHAT_*` environment variables
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Listen address
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Comma-separated categories clients may subscribe to
    #[arg(long, value_delimiter = ',')]
    categories: Option<Vec<String>>,
    /// Disable permissive CORS
    #[arg(long)]
    no_cors: bool,
}

fn load_config(overrides: Overrides) -> Result<ServerConfig, ConfigError> {
    let mut builder = ServerConfigBuilder::from_env()?;
    if let Some(bind) = overrides.bind {
        builder = builder.bind_addr(bind);
    }
    if let Some(categories) = overrides.categories {
        builder = builder.categories(categories);
    }
    if overrides.no_cors {
        builder = builder.enable_cors(false);
    }
    builder.build()
}

#[tokio::main]
async fn main() {
    // Initialize JSON logging once.
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let env_filter = match "info".parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter,
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { overrides } => {
            let config = match load_config(overrides) {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!(error = %e, "Invalid configuration");
                    std::process::exit(1);
                }
            };
            let identity = match HeaderIdentity::new(&config.user_header) {
                Ok(identity) => Arc::new(identity),
                Err(e) => {
                    tracing::error!(error = %e, "Invalid identity header");
                    std::process::exit(1);
                }
            };
            if let Err(e) = serve(config, identity).await {
                tracing::error!(error = %e, "Server failed");
                std::process::exit(1);
            }
        }
        Commands::CheckConfig { overrides } => match load_config(overrides) {
            Ok(config) => match serde_json::to_string_pretty(&config_summary(&config)) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to render configuration");
                    std::process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("Invalid configuration: {e}");
                std::process::exit(1);
            }
        },
    }
}
