#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use hermes_discovery::server;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "hermes-discovery",
    about = "Keeps service instances registered and discovers their peers"
)]
struct Cli {
    /// Path to agent config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Admin API listen address (health, metrics, registrations, instances)
    #[arg(long, default_value = "0.0.0.0:9092")]
    admin_listen: String,

    /// Tokio worker threads; defaults to the number of CPUs
    #[arg(long)]
    worker_threads: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(n) = cli.worker_threads {
        builder.worker_threads(n.max(1));
    }
    let rt = builder.enable_all().build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        config_path: cli.config,
        admin_listen: cli.admin_listen,
    }))
}
