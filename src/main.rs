#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use goma_gateway::config::{config_path, GatewayConfig};
use goma_gateway::server;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "goma-gateway", about = "Declarative reverse proxy and API gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway
    Server {
        /// Path to gateway config file (.yml, .toml or .json)
        #[arg(short, long, env = "GOMA_CONFIG_FILE")]
        config: Option<PathBuf>,

        /// Admin listen address (metrics, route listing)
        #[arg(long)]
        admin_listen: Option<String>,
    },
    /// Manage configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print the version
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default configuration
    Init {
        #[arg(short, long, default_value = "goma.yml")]
        output: PathBuf,
    },
    /// Load and validate a configuration file
    Check {
        #[arg(short, long, env = "GOMA_CONFIG_FILE")]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Server {
            config,
            admin_listen,
        } => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
                config_path: config_path(config),
                admin_listen,
            }))
        }
        Command::Config {
            action: ConfigAction::Init { output },
        } => {
            GatewayConfig::sample().write_to(&output)?;
            println!("configuration written to {}", output.display());
            Ok(())
        }
        Command::Config {
            action: ConfigAction::Check { config },
        } => {
            let _log_guards = server::bootstrap::init_tracing();
            let cfg = GatewayConfig::load(&config_path(config))?;
            println!(
                "configuration is valid: {} routes, {} middlewares",
                cfg.routes.len(),
                cfg.middlewares.len()
            );
            Ok(())
        }
        Command::Version => {
            println!("goma-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
