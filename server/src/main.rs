use clap::Parser;
use log::{error, info};
use server::app::App;
use server::config::{ServerConfig, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;

/// Command line arguments; any flag given overrides the configuration file.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path of the JSON configuration file (created with defaults if missing)
    #[clap(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Server IP address to bind to
    #[clap(short = 'H', long)]
    host: Option<String>,
    /// TCP port to listen on
    #[clap(short, long)]
    port: Option<u16>,
    /// Directory holding Hotels.json, Users.json and Reviews.json
    #[clap(short, long)]
    data_dir: Option<PathBuf>,
    /// Seconds between ranking cycles
    #[clap(short, long)]
    ranking_interval: Option<u64>,
}

impl Args {
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.tcp_port = port;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(secs) = self.ranking_interval {
            config.ranking_interval_secs = secs.max(1);
        }
        config
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = ServerConfig::load_or_create(&args.config)?;
    let config = args.apply(config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.worker_threads)
        .build()?;

    runtime.block_on(async move {
        let mut running = App::new(config)?.start().await?;

        tokio::select! {
            _ = running.ranking_stopped() => {
                error!("Ranking loop stopped unexpectedly, shutting down");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
            }
        }

        running.shutdown().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
