use std::fmt;
use std::str::FromStr;

use super::{NodeId, WireError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    RequestVote,
    VoteGranted,
    Heartbeat,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::RequestVote => "requestVote",
            MessageKind::VoteGranted => "voteGranted",
            MessageKind::Heartbeat => "heartbeat",
        }
    }
}

impl FromStr for MessageKind {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requestVote" => Ok(MessageKind::RequestVote),
            "voteGranted" => Ok(MessageKind::VoteGranted),
            "heartbeat" => Ok(MessageKind::Heartbeat),
            other => Err(WireError::UnknownKind(other.to_string())),
        }
    }
}

/// A single election datagram: `<kind>:<term>:<senderId>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub term: u64,
    pub sender: NodeId,
}

impl Message {
    pub fn request_vote(term: u64, sender: NodeId) -> Self {
        Self { kind: MessageKind::RequestVote, term, sender }
    }

    pub fn vote_granted(term: u64, sender: NodeId) -> Self {
        Self { kind: MessageKind::VoteGranted, term, sender }
    }

    pub fn heartbeat(term: u64, sender: NodeId) -> Self {
        Self { kind: MessageKind::Heartbeat, term, sender }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(bytes).map_err(|_| WireError::NotUtf8)?;
        text.parse()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind.as_str(), self.term, self.sender)
    }
}

impl FromStr for Message {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 3 {
            return Err(WireError::FieldCount(parts.len()));
        }

        let kind = parts[0].parse()?;
        // u64::MAX leaves no room for the next election's term.
        let term = parts[1]
            .parse::<u64>()
            .ok()
            .filter(|&term| term < u64::MAX)
            .ok_or_else(|| WireError::InvalidTerm(parts[1].to_string()))?;
        let sender = parts[2]
            .parse::<NodeId>()
            .map_err(|_| WireError::InvalidSender(parts[2].to_string()))?;

        Ok(Self { kind, term, sender })
    }
}
