//! retrygate - Retry and failover layer for an API gateway's upstream client
//!
//! A small gateway that routes requests to upstream groups and retries or
//! fails over transparently according to each group's strategy.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use retrygate::config::{Config, KeySource};
use retrygate::proxy::run_server;

#[derive(Parser)]
#[command(name = "retrygate")]
#[command(about = "Retry and failover gateway for upstream HTTP services")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show configured upstream groups and their endpoints
    Upstreams {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

fn init_tracing(level: &str) {
    let default_filter = format!("retrygate={},tower_http=info", level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn log_key_sources(key_sources: &[(String, KeySource)]) {
    for (group, source) in key_sources {
        if *source != KeySource::None {
            tracing::info!(group = %group, key_source = %source, "Resolved upstream API key");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut loaded, key_sources) = Config::from_file_with_env(&config)?;
            init_tracing(&loaded.logging.level);
            tracing::info!(config = %config, "Loaded configuration");
            log_key_sources(&key_sources);

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                loaded.server.listen = addr;
            }

            run_server(loaded).await
        }

        Commands::Check { config } => {
            init_tracing("info");
            let (loaded, key_sources) = Config::from_file_with_env(&config)?;
            log_key_sources(&key_sources);
            println!(
                "Configuration OK: {} upstream group(s), listen {}",
                loaded.upstreams.len(),
                loaded.server.listen
            );
            Ok(())
        }

        Commands::Upstreams { config } => {
            init_tracing("warn");
            let (loaded, _) = Config::from_file_with_env(&config)?;
            for group in &loaded.upstreams {
                println!(
                    "{} (prefix {}, strategy {}, retry {}, timeout {}ms, balance {})",
                    group.id,
                    group.prefix,
                    group.retry_strategy,
                    group.retry,
                    group.timeout_ms,
                    group.load_balance
                );
                for endpoint in &group.endpoints {
                    println!(
                        "  {}{} weight={} {}",
                        endpoint.protocol,
                        endpoint.url,
                        endpoint.weight,
                        if endpoint.status { "up" } else { "down" }
                    );
                }
            }
            Ok(())
        }
    }
}
