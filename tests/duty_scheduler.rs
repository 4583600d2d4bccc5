use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use warden::duty::{Duty, DutyScheduler, DutyTransition, LineIngest, WorkQueue};
use warden::raft::{Event, Message, PeerDirectory, RaftNode, RoleObserver};

#[derive(Default)]
struct CountingDuty {
    starts: AtomicUsize,
    active: AtomicUsize,
}

#[async_trait]
impl Duty for CountingDuty {
    fn name(&self) -> &str {
        "counting"
    }

    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingDuty {
    attempts: AtomicUsize,
}

#[async_trait]
impl Duty for FailingDuty {
    fn name(&self) -> &str {
        "failing"
    }

    async fn run(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("upstream unavailable")
    }
}

/// Node 0 of a two-node cluster, driven directly through its events.
fn two_node_cluster() -> Arc<Mutex<RaftNode>> {
    let peers = PeerDirectory::parse(0, "127.0.0.1:7000;127.0.0.1:7001").unwrap();
    Arc::new(Mutex::new(RaftNode::new(peers)))
}

fn drive(node: &Arc<Mutex<RaftNode>>, event: Event) {
    node.lock().unwrap().handle(event);
}

/// Runs an election for the next term and wins it with node 1's vote.
fn win_election(node: &Arc<Mutex<RaftNode>>) -> u64 {
    drive(node, Event::ElectionTimeout);
    let term = node.lock().unwrap().state().current_term;
    drive(node, Event::Message(Message::vote_granted(term, 1)));
    assert!(node.lock().unwrap().is_leader());
    term
}

async fn wait_for(counter: &AtomicUsize, value: usize) {
    for _ in 0..200 {
        if counter.load(Ordering::SeqCst) == value {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {value}, counter stayed at {}",
        counter.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn duties_follow_leadership() {
    let node = two_node_cluster();
    let duty = Arc::new(CountingDuty::default());
    let duties: Vec<Arc<dyn Duty>> = vec![duty.clone() as Arc<dyn Duty>];
    let scheduler = DutyScheduler::new(
        RoleObserver::new(Arc::clone(&node)),
        duties,
        Duration::from_millis(50),
    );

    assert_eq!(scheduler.poll_once().await, DutyTransition::Unchanged);
    assert!(!scheduler.is_running().await);

    let term = win_election(&node);
    assert_eq!(scheduler.poll_once().await, DutyTransition::Started { term });
    wait_for(&duty.starts, 1).await;

    // Repeated polls while leading never start a second copy.
    for _ in 0..5 {
        assert_eq!(scheduler.poll_once().await, DutyTransition::Unchanged);
    }
    sleep(Duration::from_millis(20)).await;
    assert_eq!(duty.starts.load(Ordering::SeqCst), 1);
    assert_eq!(duty.active.load(Ordering::SeqCst), 1);

    drive(&node, Event::Message(Message::heartbeat(term + 1, 1)));
    assert_eq!(scheduler.poll_once().await, DutyTransition::Stopped);
    assert_eq!(duty.active.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.poll_once().await, DutyTransition::Unchanged);
    assert!(!scheduler.is_running().await);
}

#[tokio::test]
async fn leadership_lost_and_regained_between_polls_restarts_duties() {
    let node = two_node_cluster();
    let duty = Arc::new(CountingDuty::default());
    let duties: Vec<Arc<dyn Duty>> = vec![duty.clone() as Arc<dyn Duty>];
    let scheduler = DutyScheduler::new(
        RoleObserver::new(Arc::clone(&node)),
        duties,
        Duration::from_millis(50),
    );

    let first = win_election(&node);
    assert_eq!(
        scheduler.poll_once().await,
        DutyTransition::Started { term: first }
    );
    wait_for(&duty.starts, 1).await;

    drive(&node, Event::Message(Message::heartbeat(first + 1, 1)));
    let second = win_election(&node);
    assert!(second > first);

    assert_eq!(
        scheduler.poll_once().await,
        DutyTransition::Started { term: second }
    );
    wait_for(&duty.starts, 2).await;
    wait_for(&duty.active, 1).await;
}

#[tokio::test]
async fn finished_duty_is_restarted_on_next_poll() {
    let node = two_node_cluster();
    let duty = Arc::new(FailingDuty {
        attempts: AtomicUsize::new(0),
    });
    let duties: Vec<Arc<dyn Duty>> = vec![duty.clone() as Arc<dyn Duty>];
    let scheduler = DutyScheduler::new(
        RoleObserver::new(Arc::clone(&node)),
        duties,
        Duration::from_millis(50),
    );

    let term = win_election(&node);
    assert_eq!(scheduler.poll_once().await, DutyTransition::Started { term });
    wait_for(&duty.attempts, 1).await;
    sleep(Duration::from_millis(10)).await;

    assert_eq!(scheduler.poll_once().await, DutyTransition::Unchanged);
    wait_for(&duty.attempts, 2).await;
}

#[tokio::test]
async fn run_stops_duties_on_shutdown() {
    let node = two_node_cluster();
    let duty = Arc::new(CountingDuty::default());
    let duties: Vec<Arc<dyn Duty>> = vec![duty.clone() as Arc<dyn Duty>];
    let scheduler = Arc::new(DutyScheduler::new(
        RoleObserver::new(Arc::clone(&node)),
        duties,
        Duration::from_millis(10),
    ));
    win_election(&node);

    let shutdown = CancellationToken::new();
    let task = {
        let scheduler = Arc::clone(&scheduler);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    wait_for(&duty.active, 1).await;
    shutdown.cancel();
    task.await.unwrap();

    assert_eq!(duty.active.load(Ordering::SeqCst), 0);
    assert!(!scheduler.is_running().await);
}

fn free_local_addr() -> SocketAddr {
    let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    reserved.local_addr().unwrap()
}

async fn connect_when_listening(addr: SocketAddr) -> TcpStream {
    for _ in 0..200 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("ingest on {addr} never accepted");
}

#[tokio::test]
async fn ingest_accepts_work_only_while_leading() {
    let node = two_node_cluster();
    let queue = WorkQueue::new();
    let addr = free_local_addr();
    let ingest: Arc<dyn Duty> = Arc::new(LineIngest::new(addr, queue.clone()));
    let duties = vec![ingest];
    let scheduler = DutyScheduler::new(
        RoleObserver::new(Arc::clone(&node)),
        duties,
        Duration::from_millis(50),
    );

    // A follower never opens the port, so nothing can land in its queue.
    assert_eq!(scheduler.poll_once().await, DutyTransition::Unchanged);
    assert!(TcpStream::connect(addr).await.is_err());
    assert!(queue.is_empty());

    let term = win_election(&node);
    assert_eq!(scheduler.poll_once().await, DutyTransition::Started { term });
    let mut client = connect_when_listening(addr).await;
    client.write_all(b"book-1\n").await.unwrap();
    client.shutdown().await.unwrap();
    drop(client);
    for _ in 0..200 {
        if queue.len() == 1 {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(queue.try_pop().expect("queued item").payload, b"book-1");

    drive(&node, Event::Message(Message::heartbeat(term + 1, 1)));
    assert_eq!(scheduler.poll_once().await, DutyTransition::Stopped);
    assert!(TcpStream::connect(addr).await.is_err());
    assert!(queue.is_empty());
}
