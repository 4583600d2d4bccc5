mod config;
mod error;
mod message;
mod node;
mod observer;
mod peers;
mod resolver;
mod state;
mod timer;
mod transport;

pub use self::config::RaftConfig;
pub use self::error::{RaftError, WireError};
pub use self::message::{Message, MessageKind};
pub use self::node::{Action, Event, RaftNode};
pub use self::observer::RoleObserver;
pub use self::peers::{split_peer_list, Peer, PeerDirectory};
pub use self::resolver::PeerAddressBook;
pub use self::state::{NodeRole, NodeState, RoleSnapshot};
pub use self::timer::{random_election_timeout, Fired, OneShotTimer, PeriodicTimer, TimerKind};
pub use self::transport::UdpTransport;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use log::{debug, info, warn};

/// Dense, zero-based index into the peer list.
pub type NodeId = usize;

/// Input to the single dispatch loop.
#[derive(Debug)]
pub enum Dispatch {
    Inbound(Message),
    Timer(Fired),
}

// Election service, not yet bound to a socket
pub struct Raft {
    config: RaftConfig,
    peers: PeerDirectory,
}

impl Raft {
    pub fn new(config: RaftConfig, peers: PeerDirectory) -> Result<Self, RaftError> {
        config.validate()?;
        Ok(Self { config, peers })
    }

    /// Binds `bind_addr`, or `0.0.0.0:<own port>` when unset. Failure here
    /// is fatal; the node never runs partially initialised.
    pub async fn bind(self) -> Result<RaftHandle, RaftError> {
        let addr = match self.config.bind_addr {
            Some(addr) => addr,
            None => SocketAddr::from(([0, 0, 0, 0], self.peers.local_port()?)),
        };
        let transport = UdpTransport::bind(addr).await?;
        info!(
            "Node {} bound to {}",
            self.peers.local_id(),
            transport.local_addr()?
        );
        Ok(self.attach(transport))
    }

    pub fn with_socket(self, socket: UdpSocket) -> RaftHandle {
        self.attach(UdpTransport::from_socket(socket))
    }

    fn attach(self, transport: UdpTransport) -> RaftHandle {
        let node = RaftNode::new(self.peers.clone());
        let peers = Arc::new(self.peers);
        RaftHandle {
            node: Arc::new(Mutex::new(node)),
            transport: Arc::new(transport),
            config: self.config,
            addresses: PeerAddressBook::new(Arc::clone(&peers)),
            peers,
        }
    }
}

pub struct RaftHandle {
    node: Arc<Mutex<RaftNode>>,
    transport: Arc<UdpTransport>,
    config: RaftConfig,
    peers: Arc<PeerDirectory>,
    addresses: PeerAddressBook,
}

struct Timers {
    election: OneShotTimer,
    window: OneShotTimer,
    heartbeat: PeriodicTimer,
}

impl Timers {
    fn new(tx: &mpsc::Sender<Dispatch>) -> Self {
        Self {
            election: OneShotTimer::new(TimerKind::Election, tx.clone()),
            window: OneShotTimer::new(TimerKind::ElectionWindow, tx.clone()),
            heartbeat: PeriodicTimer::new(TimerKind::Heartbeat, tx.clone()),
        }
    }

    fn accept(&mut self, fired: &Fired) -> bool {
        match fired.kind {
            TimerKind::Election => self.election.accept(fired),
            TimerKind::ElectionWindow => self.window.accept(fired),
            TimerKind::Heartbeat => self.heartbeat.accept(fired),
        }
    }

    fn stop_all(&mut self) {
        self.election.disarm();
        self.window.disarm();
        self.heartbeat.stop();
    }
}

impl RaftHandle {
    pub fn observer(&self) -> RoleObserver {
        RoleObserver::new(Arc::clone(&self.node))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RaftError> {
        self.transport.local_addr()
    }

    pub fn id(&self) -> NodeId {
        self.peers.local_id()
    }

    /// Runs the receive loop and the timers until `shutdown` fires. Every
    /// event is applied to the node under its lock, one at a time.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), RaftError> {
        let (tx, mut rx) = mpsc::channel::<Dispatch>(256);

        let receiver = {
            let transport = Arc::clone(&self.transport);
            let tx = tx.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        received = transport.recv() => match received {
                            Ok((message, _from)) => {
                                if tx.send(Dispatch::Inbound(message)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("Receive error: {e}");
                                tokio::time::sleep(Duration::from_millis(10)).await;
                            }
                        },
                    }
                }
            })
        };

        let resolver = tokio::spawn(self.addresses.clone().run(shutdown.clone()));

        let mut timers = Timers::new(&tx);
        drop(tx);
        self.arm_election_timer(&mut timers);
        info!(
            "Node {} started as Follower in a cluster of {}",
            self.peers.local_id(),
            self.peers.len()
        );

        loop {
            let dispatch = tokio::select! {
                _ = shutdown.cancelled() => break,
                dispatch = rx.recv() => match dispatch {
                    Some(dispatch) => dispatch,
                    None => break,
                },
            };

            let event = match dispatch {
                Dispatch::Inbound(message) => Event::Message(message),
                Dispatch::Timer(fired) => {
                    if !timers.accept(&fired) {
                        debug!("Discarding superseded {:?} timer firing", fired.kind);
                        continue;
                    }
                    fired.event
                }
            };

            let actions = {
                let mut node = self.node.lock().unwrap_or_else(PoisonError::into_inner);
                node.handle(event)
            };
            self.execute(actions, &mut timers).await;
        }

        timers.stop_all();
        receiver.abort();
        resolver.abort();
        info!("Node {} stopped", self.peers.local_id());
        Ok(())
    }

    fn arm_election_timer(&self, timers: &mut Timers) {
        let timeout = random_election_timeout(
            self.config.election_timeout_min_ms,
            self.config.election_timeout_max_ms,
        );
        debug!(
            "Node {} election timer set to {}ms",
            self.peers.local_id(),
            timeout.as_millis()
        );
        timers.election.arm(timeout, Event::ElectionTimeout);
    }

    async fn execute(&self, actions: Vec<Action>, timers: &mut Timers) {
        for action in actions {
            match action {
                Action::Send { to, message } => self.send_to_peer(to, &message).await,
                Action::Broadcast(message) => {
                    for peer in self.peers.others() {
                        self.send_to_peer(peer.id, &message).await;
                    }
                }
                Action::ResetElectionTimer => self.arm_election_timer(timers),
                Action::StopElectionTimer => timers.election.disarm(),
                Action::StartElectionWindow { term } => timers.window.arm(
                    Duration::from_millis(self.config.election_window_ms),
                    Event::ElectionWindowClosed { term },
                ),
                Action::StartHeartbeat => timers.heartbeat.start(
                    Duration::from_millis(self.config.heartbeat_interval_ms),
                    Event::HeartbeatTick,
                ),
                Action::StopHeartbeat => timers.heartbeat.stop(),
            }
        }
    }

    async fn send_to_peer(&self, to: NodeId, message: &Message) {
        match self.addresses.get(to) {
            Some(address) => self.transport.send(address, message).await,
            None => debug!("Peer {to} not resolved yet, dropping {message}"),
        }
    }
}
