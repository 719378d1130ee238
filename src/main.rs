use std::net::SocketAddr;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mapswarm::config::{ProjectLimits, ServerConfig, WorkerConfig};
use mapswarm::gateway::{run_gateway, GatewayState};
use mapswarm::registry::ProjectRegistry;
use mapswarm::shutdown::install_shutdown_handler;
use mapswarm::worker::run_worker;

#[derive(Parser, Debug)]
#[command(name = "mapswarm")]
#[command(version)]
#[command(about = "A distributed map-reduce dispatcher over WebSocket worker agents")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a mapswarm gateway server
    Serve(ServeArgs),

    /// Run a worker agent against a gateway
    Work(WorkArgs),
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Address to listen on for WebSocket and HTTP traffic
    #[arg(long, default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// Maximum number of items in a submitted dataset
    #[arg(long, default_value = "100000")]
    max_dataset_len: usize,

    /// Upper bound on the concurrent-job capacity a worker may request
    #[arg(long, default_value = "64")]
    max_worker_capacity: usize,
}

#[derive(Parser, Debug)]
struct WorkArgs {
    /// WebSocket URL of the gateway
    #[arg(long, short = 's', default_value = "ws://127.0.0.1:8000/ws")]
    server: String,

    /// Project ID to join (UUID)
    #[arg(long, short = 'p')]
    project: String,

    /// How many jobs to hold in flight at once
    #[arg(long, short = 'c', default_value = "4")]
    capacity: usize,
}

async fn run_serve(args: ServeArgs) {
    let config = ServerConfig {
        listen_addr: args.listen,
        limits: ProjectLimits {
            max_dataset_len: args.max_dataset_len,
            max_worker_capacity: args.max_worker_capacity,
        },
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        max_dataset_len = config.limits.max_dataset_len,
        max_worker_capacity = config.limits.max_worker_capacity,
        "Starting mapswarm gateway"
    );

    let registry = ProjectRegistry::new(config.limits.clone());
    let state = GatewayState::new(registry);
    let token = install_shutdown_handler();

    run_gateway(config.listen_addr, state, async move {
        token.cancelled().await;
    })
    .await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => {
            run_serve(serve_args).await;
        }
        Commands::Work(work_args) => {
            let config = WorkerConfig {
                server_url: work_args.server,
                project_id: work_args.project,
                capacity: work_args.capacity,
            };
            run_worker(config).await?;
        }
    }

    Ok(())
}
