use std::net::SocketAddr;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::{Duty, DutyError, WorkItem, WorkQueue};

/// Accepts newline-delimited work items over TCP and queues them. Only bound
/// while this node leads; followers refuse connections so producers retry
/// against the leader.
pub struct LineIngest {
    addr: SocketAddr,
    queue: WorkQueue,
}

impl LineIngest {
    pub fn new(addr: SocketAddr, queue: WorkQueue) -> Self {
        Self { addr, queue }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl Duty for LineIngest {
    fn name(&self) -> &str {
        "line-ingest"
    }

    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("binding work ingest on {}", self.addr))?;
        log::info!("Work ingest listening on {}", listener.local_addr()?);

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let queue = self.queue.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                log::debug!("Closing ingest connection from {peer}, no longer leader");
                            }
                            read = read_lines(stream, peer, &queue) => match read {
                                Ok(count) => log::debug!("Queued {count} items from {peer}"),
                                Err(e) => log::warn!("Ingest connection from {peer} failed: {e}"),
                            },
                        }
                    });
                }
                Err(e) => log::warn!("Ingest accept error: {e}"),
            }
        }

        log::info!("Work ingest on {} closed", self.addr);
        Ok(())
    }
}

async fn read_lines(
    stream: TcpStream,
    peer: SocketAddr,
    queue: &WorkQueue,
) -> Result<usize, DutyError> {
    let mut lines = BufReader::new(stream).lines();
    let source = format!("ingest:{peer}");
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        queue.push(WorkItem::new(source.clone(), line));
        count += 1;
    }
    Ok(count)
}
