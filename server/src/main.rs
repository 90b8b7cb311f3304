use std::error::Error;
use std::thread;

use clap::Parser;
use log::info;
use serde_derive::{Deserialize, Serialize};

use shkv::{KvServer, ShmemConfig};

#[derive(Parser)]
#[clap(about = "shared-memory key-value store server")]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shkv-server.toml")]
    config: String,
    /// Override the configured worker count.
    #[clap(long)]
    workers: Option<usize>,
    /// Override the configured initial table capacity.
    #[clap(long)]
    capacity: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServerConfig {
    shmem: ShmemConfig,
    workers: usize,
    table_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            shmem: ShmemConfig::default(),
            workers: thread::available_parallelism().map_or(4, |n| n.get()),
            table_capacity: 8,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let opts: Opts = Opts::parse();
    let mut cfg: ServerConfig = confy::load_path(&opts.config)?;
    if let Some(workers) = opts.workers {
        cfg.workers = workers;
    }
    if let Some(capacity) = opts.capacity {
        cfg.table_capacity = capacity;
    }
    info!(
        "segment {} | {} workers | initial capacity {}",
        cfg.shmem.flink_path(),
        cfg.workers,
        cfg.table_capacity
    );

    let server = KvServer::new(&cfg.shmem, cfg.workers, cfg.table_capacity)?;
    server.install_signal_handler()?;
    server.run()?;
    Ok(())
}
