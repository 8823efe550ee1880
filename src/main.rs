#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use shed_proxy::config::CliOverrides;
use shed_proxy::server;
use std::str::FromStr;

#[derive(Parser)]
#[command(name = "shed-proxy", about = "Adaptive load-shedding reverse proxy")]
struct Cli {
    /// Deployment mode: "proxy" (synchronous admission-controlled) or
    /// "buffered" (enqueue-and-drain).
    #[arg(short, long)]
    mode: Option<String>,

    /// Listen address for the main listener.
    #[arg(short, long)]
    listen: Option<String>,

    /// Admin listen address (health/ready/metrics).
    #[arg(long)]
    admin_listen: Option<String>,

    /// Proxy mode: the single upstream origin to forward admitted requests to.
    #[arg(short, long)]
    origin: Option<String>,

    /// Buffered mode: `host:port` of the forward target (no scheme).
    #[arg(long)]
    forward_host: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mode = cli
        .mode
        .map(|s| shed_proxy::config::Mode::from_str(&s))
        .transpose()?;

    let worker_threads = server::runtime::get_container_cpu_limit();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        cli: CliOverrides {
            mode,
            listen: cli.listen,
            admin_listen: cli.admin_listen,
            origin: cli.origin,
            forward_host: cli.forward_host,
        },
    }))
}
