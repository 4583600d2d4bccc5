use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{error, info};
use tokio::net::UdpSocket;

use warden::duty::{
    Duty, DutyScheduler, FileFetcher, JsonLinesSink, LineIngest, LogSink, PeriodicFetch,
    QueueDrain, WorkQueue, WorkSink,
};
use warden::logging::init_logging;
use warden::raft::{split_peer_list, Message, Raft};
use warden::shutdown::install_shutdown_handler;
use warden::Config;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Elects a single leader among a fixed set of peers and runs exclusive duties on it")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a node of the cluster
    Node {
        /// Zero-based index of this node in the peer list
        #[arg(short, long, env = "RAFT_NODE_ID")]
        id: Option<usize>,

        /// Peer addresses in node id order, separated by ';' (host:port;host:port)
        #[arg(short, long, env = "RAFT_PEERS")]
        peers: Option<String>,

        /// JSON config file; flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Local UDP address to bind instead of 0.0.0.0:<own port>
        #[arg(long)]
        bind: Option<SocketAddr>,

        #[arg(long, env = "WARDEN_ELECTION_TIMEOUT_MIN_MS")]
        election_timeout_min_ms: Option<u64>,

        #[arg(long, env = "WARDEN_ELECTION_TIMEOUT_MAX_MS")]
        election_timeout_max_ms: Option<u64>,

        #[arg(long, env = "WARDEN_HEARTBEAT_INTERVAL_MS")]
        heartbeat_interval_ms: Option<u64>,

        /// How long a candidate waits for quorum
        #[arg(long, env = "WARDEN_ELECTION_WINDOW_MS")]
        election_window_ms: Option<u64>,

        /// How often the duty scheduler checks the node's role
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// TCP address accepting newline-delimited work items
        #[arg(long, env = "WARDEN_INGEST_ADDR")]
        ingest: Option<SocketAddr>,

        /// File that receives forwarded work items as JSON lines
        #[arg(long, env = "WARDEN_SINK_PATH")]
        sink: Option<PathBuf>,

        /// Drop file picked up by the periodic fetch duty
        #[arg(long, env = "WARDEN_FETCH_PATH")]
        fetch_file: Option<PathBuf>,

        #[arg(long)]
        fetch_interval_ms: Option<u64>,
    },

    /// Send a single raw election message, e.g. `heartbeat:5:2`
    Send {
        /// Destination host:port
        #[arg(short, long)]
        to: String,

        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Send { to, message } => {
            let message: Message = message
                .parse()
                .with_context(|| format!("invalid message '{message}'"))?;
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            socket.send_to(message.encode().as_bytes(), &to).await?;
            info!("Sent {message} to {to}");
        }
        Command::Node {
            id,
            peers,
            config,
            bind,
            election_timeout_min_ms,
            election_timeout_max_ms,
            heartbeat_interval_ms,
            election_window_ms,
            poll_interval_ms,
            ingest,
            sink,
            fetch_file,
            fetch_interval_ms,
        } => {
            let mut config = match config {
                Some(path) => Config::from_file(&path)?,
                None => Config::default(),
            };

            if let Some(id) = id {
                config.node_id = id;
            }
            if let Some(peers) = peers {
                config.peers = split_peer_list(&peers);
            }
            let raft = &mut config.raft;
            raft.bind_addr = bind.or(raft.bind_addr);
            raft.election_timeout_min_ms =
                election_timeout_min_ms.unwrap_or(raft.election_timeout_min_ms);
            raft.election_timeout_max_ms =
                election_timeout_max_ms.unwrap_or(raft.election_timeout_max_ms);
            raft.heartbeat_interval_ms = heartbeat_interval_ms.unwrap_or(raft.heartbeat_interval_ms);
            raft.election_window_ms = election_window_ms.unwrap_or(raft.election_window_ms);

            let duties = &mut config.duties;
            duties.poll_interval_ms = poll_interval_ms.unwrap_or(duties.poll_interval_ms);
            duties.fetch_interval_ms = fetch_interval_ms.unwrap_or(duties.fetch_interval_ms);
            duties.ingest_addr = ingest.or(duties.ingest_addr);
            duties.sink_path = sink.or(duties.sink_path.take());
            duties.fetch_path = fetch_file.or(duties.fetch_path.take());

            config.validate()?;
            run_node(config).await?;
        }
    }

    Ok(())
}

async fn run_node(config: Config) -> anyhow::Result<()> {
    let peers = config.peer_directory()?;
    info!(
        "Starting node {} of {} at {}",
        peers.local_id(),
        peers.len(),
        peers.local_address()
    );

    let raft = Raft::new(config.raft.clone(), peers)?;
    let handle = raft.bind().await?;
    let observer = handle.observer();
    let shutdown = install_shutdown_handler();

    let queue = WorkQueue::new();

    let sink: Arc<dyn WorkSink> = match &config.duties.sink_path {
        Some(path) => {
            info!("Forwarding work items to {}", path.display());
            Arc::new(JsonLinesSink::new(path))
        }
        None => Arc::new(LogSink),
    };

    let mut duties: Vec<Arc<dyn Duty>> = Vec::new();
    if let Some(addr) = config.duties.ingest_addr {
        duties.push(Arc::new(LineIngest::new(addr, queue.clone())));
    }
    duties.push(Arc::new(QueueDrain::new(
        queue,
        Arc::clone(&sink),
        Duration::from_millis(config.duties.idle_wait_ms),
    )));
    if let Some(path) = &config.duties.fetch_path {
        duties.push(Arc::new(PeriodicFetch::new(
            Arc::new(FileFetcher::new(path)),
            Arc::clone(&sink),
            Duration::from_millis(config.duties.fetch_interval_ms),
        )));
    }

    let scheduler = DutyScheduler::new(
        observer,
        duties,
        Duration::from_millis(config.duties.poll_interval_ms),
    );

    let election = tokio::spawn(handle.run(shutdown.clone()));
    scheduler.run(shutdown.clone()).await;

    match election.await {
        Ok(result) => result?,
        Err(e) => error!("Election task failed: {e}"),
    }
    info!("Node shut down");
    Ok(())
}
