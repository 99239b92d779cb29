use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::json;

use parley_core::config::{Config, LoggingConfig};
use parley_core::history::HistoryStore;
use parley_gateway::{Gateway, GatewayState};
use parley_tools::ToolRegistry;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Local conversational gateway with tool use and history compaction",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Gateway {
        /// Port to listen on (default: 8080)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 127.0.0.1)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Show system status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Persisted conversation history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Tool server inspection
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },

    /// Send one prompt to a running gateway
    Chat {
        /// Prompt text
        #[arg(short, long)]
        message: String,

        /// Gateway base URL (default: from config)
        #[arg(long)]
        url: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Check the configuration for problems
    Validate,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Print the stored turns
    Show,
    /// Delete all stored turns
    Clear,
}

#[derive(Subcommand)]
enum ToolsAction {
    /// List tools advertised by every configured server
    List,
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        logging.level.as_deref().unwrap_or("info")
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut directives = vec![level.to_string()];
        directives.extend(logging.filters.iter().cloned());
        tracing_subscriber::EnvFilter::new(directives.join(","))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (logging.format.as_str(), logging.output.as_str()) {
        ("json", "stdout") => builder.json().with_writer(std::io::stdout).init(),
        ("json", _) => builder.json().with_writer(std::io::stderr).init(),
        (_, "stdout") => builder.with_writer(std::io::stdout).init(),
        _ => builder.with_writer(std::io::stderr).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    init_logging(&config.logging.clone().unwrap_or_default(), cli.verbose);

    match cli.command {
        Commands::Gateway { port, bind } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            let bind = bind.unwrap_or_else(|| config.gateway_bind());
            let (warnings, errors) = config.validate();
            for warning in &warnings {
                tracing::warn!("{warning}");
            }
            if !errors.is_empty() {
                bail!("invalid configuration: {}", errors.join("; "));
            }

            let state = GatewayState::from_config(config).await?;
            let handle = Gateway::bind(state, &format!("{bind}:{port}")).await?;
            tracing::info!("Parley gateway ready on http://{}", handle.local_addr());

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutdown signal received");
            handle.shutdown().await;
        }
        Commands::Status => {
            let history = HistoryStore::open(config.history_path()).await;
            println!("Parley v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!(
                "Gateway: http://{}:{}",
                config.gateway_bind(),
                config.gateway_port()
            );
            println!(
                "History: {} ({} turns)",
                config.history_path().display(),
                history.len().await
            );
            println!("Persona: {}", config.persona().label());
            let servers = config.tool_servers();
            if servers.is_empty() {
                println!("Tool servers: none");
            } else {
                println!("Tool servers:");
                for server in servers {
                    println!("  {} ({}) {}", server.id, server.display_name(), server.endpoint);
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    bail!("{} configuration error(s)", errors.len());
                }
                println!("Configuration OK");
            }
        },
        Commands::History { action } => {
            let history = HistoryStore::open(config.history_path()).await;
            match action {
                HistoryAction::Show => {
                    let turns = history.snapshot().await;
                    if turns.is_empty() {
                        println!("History is empty");
                    }
                    for turn in turns {
                        println!("[{}] {}", turn.role.as_str(), turn.text);
                    }
                }
                HistoryAction::Clear => {
                    history.clear().await;
                    println!("History cleared");
                }
            }
        }
        Commands::Tools { action } => match action {
            ToolsAction::List => {
                let registry = ToolRegistry::from_config(&config);
                if registry.is_empty() {
                    println!("No tool servers configured");
                }
                for (server_id, tools) in registry.list_all_tools().await {
                    println!("{server_id}:");
                    for tool in tools {
                        println!(
                            "  {} - {}",
                            tool.name,
                            tool.description.as_deref().unwrap_or("")
                        );
                    }
                }
            }
        },
        Commands::Chat { message, url } => {
            let base = url.unwrap_or_else(|| {
                format!("http://{}:{}", config.gateway_bind(), config.gateway_port())
            });
            let response = reqwest::Client::new()
                .post(format!("{}/chat", base.trim_end_matches('/')))
                .json(&json!({"prompt": message}))
                .send()
                .await
                .with_context(|| format!("could not reach gateway at {base}"))?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                bail!("gateway returned {status}: {body}");
            }
            println!("{body}");
        }
    }

    Ok(())
}
