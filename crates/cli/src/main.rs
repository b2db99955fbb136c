use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Sluice — WhatsApp media ingestion gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config file, and the media storage layout.
    Init {
        /// Config file path (default: SLUICE_CONFIG_PATH or ~/.sluice/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the webhook gateway (verify handshake, event ingestion, status endpoints).
    Gateway {
        /// Config file path (default: SLUICE_CONFIG_PATH or ~/.sluice/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 8490)
        #[arg(long, short)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("sluice {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    use anyhow::Context;

    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let config_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;
    if !path.exists() {
        std::fs::write(&path, b"{}\n")
            .with_context(|| format!("writing default config to {}", path.display()))?;
        log::info!("created default config at {}", path.display());
    }

    let (config, _) = lib::config::load_config(Some(path.clone()))?;
    lib::media::ensure_media_dirs(&config.storage.root).with_context(|| {
        format!(
            "creating media directories under {}",
            config.storage.root.display()
        )
    })?;
    println!("initialized configuration at {}", path.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, _path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{}",
        config.gateway.bind,
        config.gateway.port
    );
    lib::gateway::run_gateway(config).await
}
