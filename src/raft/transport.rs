use std::net::SocketAddr;

use tokio::net::UdpSocket;
use log::{debug, warn};

use super::{Message, RaftError};

const RECV_BUFFER_SIZE: usize = 1024;

/// Unreliable datagram endpoint. Sends are fire-and-forget; malformed
/// inbound datagrams are skipped.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self, RaftError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| RaftError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self { socket })
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RaftError> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn send(&self, address: SocketAddr, message: &Message) {
        let payload = message.encode();
        match self.socket.send_to(payload.as_bytes(), address).await {
            Ok(_) => debug!("Sent {payload} to {address}"),
            Err(e) => warn!("Failed to send {payload} to {address}: {e}"),
        }
    }

    pub async fn recv(&self) -> Result<(Message, SocketAddr), RaftError> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            match Message::decode(&buf[..len]) {
                Ok(message) => {
                    debug!("Received {message} from {from}");
                    return Ok((message, from));
                }
                Err(e) => debug!("Dropping malformed datagram from {from}: {e}"),
            }
        }
    }
}
