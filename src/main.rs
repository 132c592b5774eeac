use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;

use taskbridge::api::{ApiClient, Transport};
use taskbridge::config::Config;
use taskbridge::queue::{JsonFileStore, OfflineQueue, QueueStore};
use taskbridge::shutdown;
use taskbridge::tasks::Executor;
use taskbridge::worker::{LivenessRegistry, Worker};

#[derive(Parser, Debug)]
#[command(name = "taskbridge")]
#[command(version)]
#[command(about = "Resilient local worker agent for remote task execution")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the worker loop for an agent identity (foreground)
    Start {
        /// Agent identity to run as
        #[arg(long)]
        agent_id: String,

        /// Seconds between poll cycles (overrides configuration)
        #[arg(long)]
        poll_interval: Option<u64>,
    },

    /// Ask a running worker to stop
    Stop {
        /// Agent identity to stop
        #[arg(long)]
        agent_id: String,
    },

    /// Show worker liveness and offline queue depth
    Status {
        /// Agent identity to inspect
        #[arg(long)]
        agent_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::load()?;

    match args.command {
        Commands::Start {
            agent_id,
            poll_interval,
        } => cmd_start(config, agent_id, poll_interval).await,
        Commands::Stop { agent_id } => cmd_stop(&config, &agent_id),
        Commands::Status { agent_id } => cmd_status(&config, &agent_id).await,
    }
}

async fn cmd_start(
    mut config: Config,
    agent_id: String,
    poll_interval: Option<u64>,
) -> anyhow::Result<()> {
    if let Some(secs) = poll_interval {
        config.poll_interval = Duration::from_secs(secs);
    }
    config.require_worker_settings()?;

    let liveness = LivenessRegistry::new(config.agents_dir());
    if liveness.is_running(&agent_id) {
        bail!("worker for {agent_id} is already running");
    }

    eprintln!("taskbridge v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Agent: {agent_id}");
    eprintln!("   Backend: {}", config.backend_url);
    eprintln!("   Poll interval: {}s", config.poll_interval.as_secs());
    eprintln!("   Queue file: {}", config.queue_path().display());
    eprintln!("   Press Ctrl+C to stop\n");

    let cancel = shutdown::install_shutdown_handler();
    let transport: Arc<dyn Transport> = Arc::new(ApiClient::new(&config));
    let queue = OfflineQueue::new(Arc::new(JsonFileStore::new(config.queue_path())));

    let worker = Worker::new(
        agent_id,
        transport,
        queue,
        Executor::new(),
        liveness,
        cancel,
    )
    .with_poll_interval(config.poll_interval);

    worker.run().await?;
    Ok(())
}

fn cmd_stop(config: &Config, agent_id: &str) -> anyhow::Result<()> {
    let liveness = LivenessRegistry::new(config.agents_dir());
    match liveness.signal_stop(agent_id) {
        Some(pid) => {
            // The worker removes its own marker on the way out.
            eprintln!("Sent stop signal to worker {agent_id} (pid {pid})");
        }
        None => {
            eprintln!("Worker {agent_id} is not running.");
        }
    }
    Ok(())
}

async fn cmd_status(config: &Config, agent_id: &str) -> anyhow::Result<()> {
    let liveness = LivenessRegistry::new(config.agents_dir());
    let running = liveness.is_running(agent_id);

    let store = JsonFileStore::new(config.queue_path());
    let pending = store.load().await.map(|q| q.len()).unwrap_or(0);

    println!(
        "Agent {agent_id}: {}",
        if running { "running" } else { "stopped" }
    );
    println!("Queued requests: {pending}");
    Ok(())
}
