use std::collections::HashSet;

use log::{debug, info, warn};

use super::{Message, MessageKind, NodeId, NodeRole, NodeState, PeerDirectory, RoleSnapshot};

/// Everything that can change node state. Network messages and timer
/// firings both arrive through `RaftNode::handle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Message(Message),
    ElectionTimeout,
    ElectionWindowClosed { term: u64 },
    HeartbeatTick,
}

/// Side effects requested by the state machine. The driver performs them
/// after the node lock has been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Send { to: NodeId, message: Message },
    Broadcast(Message),
    ResetElectionTimer,
    StopElectionTimer,
    StartElectionWindow { term: u64 },
    StartHeartbeat,
    StopHeartbeat,
}

pub struct RaftNode {
    id: NodeId,
    peers: PeerDirectory,
    state: NodeState,
    // Voters counted this term; guards against duplicated datagrams.
    granted_by: HashSet<NodeId>,
}

impl RaftNode {
    pub fn new(peers: PeerDirectory) -> Self {
        Self {
            id: peers.local_id(),
            peers,
            state: NodeState::default(),
            granted_by: HashSet::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.state.role, NodeRole::Leader)
    }

    pub fn snapshot(&self) -> RoleSnapshot {
        RoleSnapshot {
            role: self.state.role,
            term: self.state.current_term,
        }
    }

    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        let before = self.state.role;
        let mut actions = Vec::new();

        match event {
            Event::Message(message) => self.on_message(message, &mut actions),
            Event::ElectionTimeout => self.on_election_timeout(&mut actions),
            Event::ElectionWindowClosed { term } => self.on_election_window_closed(term),
            Event::HeartbeatTick => self.on_heartbeat_tick(&mut actions),
        }

        self.finish_transition(before, &mut actions);
        actions
    }

    fn on_message(&mut self, message: Message, actions: &mut Vec<Action>) {
        if message.sender == self.id || !self.peers.contains(message.sender) {
            debug!(
                "Node {} dropping {} with invalid sender",
                self.id, message
            );
            return;
        }

        if message.term < self.state.current_term {
            debug!(
                "Node {} ignoring stale {} at term {}",
                self.id, message, self.state.current_term
            );
            return;
        }

        if message.term > self.state.current_term {
            self.adopt_term(message.term);
        }

        match message.kind {
            MessageKind::RequestVote => self.on_request_vote(message.sender, actions),
            MessageKind::VoteGranted => self.on_vote_granted(message.term, message.sender, actions),
            MessageKind::Heartbeat => self.on_heartbeat(message.sender, actions),
        }
    }

    fn adopt_term(&mut self, term: u64) {
        info!(
            "Node {} observed term {} (was {}), becoming Follower",
            self.id, term, self.state.current_term
        );
        self.state.current_term = term;
        self.state.voted_for = None;
        self.become_follower();
    }

    fn become_follower(&mut self) {
        self.state.role = NodeRole::Follower;
        self.state.votes_received = 0;
        self.granted_by.clear();
    }

    // `candidate_id` is sending at our current term here.
    fn on_request_vote(&mut self, candidate_id: NodeId, actions: &mut Vec<Action>) {
        if self.state.role != NodeRole::Follower {
            // Already voted for ourselves this term.
            info!(
                "Node {} stepping down from {} on vote request from node {} in term {}",
                self.id, self.state.role, candidate_id, self.state.current_term
            );
            self.become_follower();
            self.state.voted_for.get_or_insert(self.id);
            return;
        }

        match self.state.voted_for {
            None => {
                info!(
                    "Node {} granting vote to node {} in term {}",
                    self.id, candidate_id, self.state.current_term
                );
                self.state.voted_for = Some(candidate_id);
                actions.push(Action::Send {
                    to: candidate_id,
                    message: Message::vote_granted(self.state.current_term, self.id),
                });
                actions.push(Action::ResetElectionTimer);
            }
            Some(voted) => {
                debug!(
                    "Node {} already voted for node {} in term {}, dropping request from node {}",
                    self.id, voted, self.state.current_term, candidate_id
                );
            }
        }
    }

    fn on_vote_granted(&mut self, term: u64, voter_id: NodeId, actions: &mut Vec<Action>) {
        if self.state.role != NodeRole::Candidate || term != self.state.current_term {
            debug!(
                "Node {} ignoring vote from node {} for term {} (role {}, term {})",
                self.id, voter_id, term, self.state.role, self.state.current_term
            );
            return;
        }

        if !self.granted_by.insert(voter_id) {
            debug!("Node {} ignoring duplicate vote from node {}", self.id, voter_id);
            return;
        }

        self.state.votes_received += 1;
        info!(
            "Node {} received vote from node {}, total votes: {}",
            self.id, voter_id, self.state.votes_received
        );

        if self.state.votes_received >= self.peers.quorum() {
            self.become_leader(actions);
        }
    }

    fn on_heartbeat(&mut self, leader_id: NodeId, actions: &mut Vec<Action>) {
        if self.state.role != NodeRole::Follower {
            info!(
                "Node {} stepping down from {} on heartbeat from node {} in term {}",
                self.id, self.state.role, leader_id, self.state.current_term
            );
        }
        debug!(
            "Node {} received heartbeat from leader {} in term {}",
            self.id, leader_id, self.state.current_term
        );
        self.become_follower();
        self.state.voted_for = Some(leader_id);
        actions.push(Action::ResetElectionTimer);
    }

    fn on_election_timeout(&mut self, actions: &mut Vec<Action>) {
        if self.is_leader() {
            debug!("Node {} ignoring election timeout as Leader", self.id);
            return;
        }

        let Some(next_term) = self.state.current_term.checked_add(1) else {
            warn!(
                "Node {} cannot start an election past term {}",
                self.id, self.state.current_term
            );
            return;
        };
        self.state.current_term = next_term;
        self.state.role = NodeRole::Candidate;
        self.state.voted_for = Some(self.id);
        self.granted_by.clear();
        self.state.votes_received = 1;
        info!(
            "Node {} starting election for term {}, voted for self",
            self.id, self.state.current_term
        );

        if self.state.votes_received >= self.peers.quorum() {
            self.become_leader(actions);
            return;
        }

        actions.push(Action::Broadcast(Message::request_vote(
            self.state.current_term,
            self.id,
        )));
        actions.push(Action::StartElectionWindow {
            term: self.state.current_term,
        });
    }

    fn on_election_window_closed(&mut self, term: u64) {
        if self.state.role != NodeRole::Candidate || term != self.state.current_term {
            return;
        }

        info!(
            "Node {} election for term {} failed with {} votes, reverting to Follower",
            self.id, term, self.state.votes_received
        );
        // voted_for stays at self for the remainder of the term.
        self.become_follower();
    }

    fn on_heartbeat_tick(&mut self, actions: &mut Vec<Action>) {
        if self.is_leader() {
            actions.push(Action::Broadcast(Message::heartbeat(
                self.state.current_term,
                self.id,
            )));
        }
    }

    fn become_leader(&mut self, actions: &mut Vec<Action>) {
        info!(
            "Node {} became Leader for term {} with {} votes",
            self.id, self.state.current_term, self.state.votes_received
        );

        self.state.role = NodeRole::Leader;
        self.state.voted_for = None;
        self.state.votes_received = 0;
        self.granted_by.clear();

        actions.push(Action::StopElectionTimer);
        actions.push(Action::StartHeartbeat);
        actions.push(Action::Broadcast(Message::heartbeat(
            self.state.current_term,
            self.id,
        )));
    }

    fn finish_transition(&self, before: NodeRole, actions: &mut Vec<Action>) {
        let after = self.state.role;
        if before == NodeRole::Leader
            && after != NodeRole::Leader
            && !actions.contains(&Action::StopHeartbeat)
        {
            actions.push(Action::StopHeartbeat);
        }
        if before != NodeRole::Follower
            && after == NodeRole::Follower
            && !actions.contains(&Action::ResetElectionTimer)
        {
            actions.push(Action::ResetElectionTimer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_node(id: NodeId, size: usize) -> RaftNode {
        let addrs = (0..size).map(|i| format!("127.0.0.1:{}", 5000 + i)).collect();
        RaftNode::new(PeerDirectory::new(id, addrs).expect("peer directory"))
    }

    fn deliver(node: &mut RaftNode, message: Message) -> Vec<Action> {
        node.handle(Event::Message(message))
    }

    #[test]
    fn single_node_cluster_becomes_leader_on_first_timeout() {
        let mut node = cluster_node(0, 1);
        let actions = node.handle(Event::ElectionTimeout);

        assert!(node.is_leader());
        assert_eq!(node.state().current_term, 1);
        assert_eq!(node.state().voted_for, None);
        assert!(actions.contains(&Action::StartHeartbeat));
        assert!(actions.contains(&Action::StopElectionTimer));
    }

    #[test]
    fn uncontested_election_in_three_node_cluster() {
        let mut node0 = cluster_node(0, 3);
        let mut node1 = cluster_node(1, 3);
        let mut node2 = cluster_node(2, 3);

        let actions = node0.handle(Event::ElectionTimeout);
        assert_eq!(node0.state().role, NodeRole::Candidate);
        assert_eq!(node0.state().votes_received, 1);
        let request = Message::request_vote(1, 0);
        assert!(actions.contains(&Action::Broadcast(request)));
        assert!(actions.contains(&Action::StartElectionWindow { term: 1 }));
        assert_eq!(request.encode(), "requestVote:1:0");

        let reply1 = deliver(&mut node1, request);
        let reply2 = deliver(&mut node2, request);
        let grant1 = Message::vote_granted(1, 1);
        let grant2 = Message::vote_granted(1, 2);
        assert_eq!(
            reply1,
            vec![
                Action::Send { to: 0, message: grant1 },
                Action::ResetElectionTimer
            ]
        );
        assert!(reply2.contains(&Action::Send { to: 0, message: grant2 }));
        assert_eq!(node1.state().voted_for, Some(0));
        assert_eq!(node1.state().current_term, 1);

        let after_first = deliver(&mut node0, grant1);
        assert!(node0.is_leader());
        assert!(after_first.contains(&Action::Broadcast(Message::heartbeat(1, 0))));

        // Late vote after leadership is ignored.
        let after_second = deliver(&mut node0, grant2);
        assert!(after_second.is_empty());
        assert!(node0.is_leader());
        assert_eq!(node0.state().current_term, 1);
    }

    #[test]
    fn split_vote_reverts_both_candidates_to_follower() {
        let mut node1 = cluster_node(1, 3);
        let mut node2 = cluster_node(2, 3);

        node1.handle(Event::ElectionTimeout);
        node2.handle(Event::ElectionTimeout);

        let from1 = deliver(&mut node2, Message::request_vote(1, 1));
        let from2 = deliver(&mut node1, Message::request_vote(1, 2));
        for actions in [&from1, &from2] {
            assert!(!actions
                .iter()
                .any(|a| matches!(a, Action::Send { message, .. } if message.kind == MessageKind::VoteGranted)));
            assert!(actions.contains(&Action::ResetElectionTimer));
        }

        for node in [&node1, &node2] {
            assert_eq!(node.state().role, NodeRole::Follower);
            assert_eq!(node.state().current_term, 1);
            assert_eq!(node.state().voted_for, Some(node.id()));
        }

        // Window expiry is a no-op once already reverted.
        assert!(node1.handle(Event::ElectionWindowClosed { term: 1 }).is_empty());
    }

    #[test]
    fn election_window_expiry_without_quorum() {
        let mut node = cluster_node(0, 3);
        node.handle(Event::ElectionTimeout);

        let actions = node.handle(Event::ElectionWindowClosed { term: 1 });
        assert_eq!(actions, vec![Action::ResetElectionTimer]);
        assert_eq!(node.state().role, NodeRole::Follower);
        assert_eq!(node.state().voted_for, Some(0));

        // Still single vote per term after reverting.
        let actions = deliver(&mut node, Message::request_vote(1, 2));
        assert!(actions.is_empty());

        // The next election uses a fresh term.
        node.handle(Event::ElectionTimeout);
        assert_eq!(node.state().current_term, 2);
    }

    #[test]
    fn stale_window_expiry_is_ignored() {
        let mut node = cluster_node(0, 3);
        node.handle(Event::ElectionTimeout);
        node.handle(Event::ElectionTimeout);
        assert_eq!(node.state().current_term, 2);

        assert!(node.handle(Event::ElectionWindowClosed { term: 1 }).is_empty());
        assert_eq!(node.state().role, NodeRole::Candidate);
    }

    #[test]
    fn heartbeat_with_higher_term_adopts_leader() {
        let mut node = cluster_node(0, 3);
        for _ in 0..3 {
            node.handle(Event::ElectionTimeout);
            node.handle(Event::ElectionWindowClosed {
                term: node.state().current_term,
            });
        }
        assert_eq!(node.state().current_term, 3);

        let actions = deliver(&mut node, "heartbeat:5:2".parse().unwrap());
        assert_eq!(node.state().current_term, 5);
        assert_eq!(node.state().role, NodeRole::Follower);
        assert_eq!(node.state().voted_for, Some(2));
        assert_eq!(actions, vec![Action::ResetElectionTimer]);
    }

    #[test]
    fn leader_demoted_by_equal_term_heartbeat() {
        let mut node = cluster_node(0, 3);
        node.handle(Event::ElectionTimeout);
        deliver(&mut node, Message::vote_granted(1, 1));
        assert!(node.is_leader());

        let actions = deliver(&mut node, Message::heartbeat(1, 2));
        assert_eq!(node.state().role, NodeRole::Follower);
        assert_eq!(node.state().current_term, 1);
        assert!(actions.contains(&Action::StopHeartbeat));
        assert!(actions.contains(&Action::ResetElectionTimer));
    }

    #[test]
    fn leader_steps_down_on_equal_term_vote_request_without_granting() {
        let mut node = cluster_node(0, 3);
        node.handle(Event::ElectionTimeout);
        deliver(&mut node, Message::vote_granted(1, 1));
        assert!(node.is_leader());

        let actions = deliver(&mut node, Message::request_vote(1, 2));
        assert_eq!(node.state().role, NodeRole::Follower);
        assert_eq!(node.state().voted_for, Some(0));
        assert!(actions.contains(&Action::StopHeartbeat));
        assert!(!actions.iter().any(|a| matches!(a, Action::Send { .. })));
    }

    #[test]
    fn stale_messages_never_change_state() {
        let mut node = cluster_node(0, 3);
        for _ in 0..3 {
            node.handle(Event::ElectionTimeout);
        }
        deliver(&mut node, Message::vote_granted(3, 1));
        assert!(node.is_leader());
        node.state.current_term = 4;

        assert!(deliver(&mut node, "voteGranted:2:1".parse().unwrap()).is_empty());
        assert!(deliver(&mut node, Message::heartbeat(3, 2)).is_empty());
        assert!(deliver(&mut node, Message::request_vote(2, 2)).is_empty());
        assert!(node.is_leader());
        assert_eq!(node.state().current_term, 4);
    }

    #[test]
    fn higher_term_vote_request_is_granted_after_adoption() {
        let mut node = cluster_node(1, 3);
        node.handle(Event::ElectionTimeout);
        assert_eq!(node.state().voted_for, Some(1));

        let actions = deliver(&mut node, Message::request_vote(4, 2));
        assert_eq!(node.state().current_term, 4);
        assert_eq!(node.state().voted_for, Some(2));
        assert!(actions.contains(&Action::Send {
            to: 2,
            message: Message::vote_granted(4, 1)
        }));
    }

    #[test]
    fn duplicate_votes_are_counted_once() {
        let mut node = cluster_node(0, 5);
        node.handle(Event::ElectionTimeout);
        deliver(&mut node, Message::vote_granted(1, 1));
        deliver(&mut node, Message::vote_granted(1, 1));
        assert_eq!(node.state().votes_received, 2);
        assert_eq!(node.state().role, NodeRole::Candidate);

        deliver(&mut node, Message::vote_granted(1, 3));
        assert!(node.is_leader());
    }

    #[test]
    fn messages_from_self_or_unknown_ids_are_dropped() {
        let mut node = cluster_node(0, 3);
        assert!(deliver(&mut node, Message::heartbeat(9, 0)).is_empty());
        assert!(deliver(&mut node, Message::heartbeat(9, 7)).is_empty());
        assert_eq!(node.state().current_term, 0);
    }

    #[test]
    fn heartbeat_tick_only_broadcasts_as_leader() {
        let mut node = cluster_node(0, 1);
        assert!(node.handle(Event::HeartbeatTick).is_empty());

        node.handle(Event::ElectionTimeout);
        assert_eq!(
            node.handle(Event::HeartbeatTick),
            vec![Action::Broadcast(Message::heartbeat(1, 0))]
        );
        assert!(node.handle(Event::ElectionTimeout).is_empty());
        assert_eq!(node.state().current_term, 1);
    }

    #[test]
    fn election_timeout_at_final_term_is_dropped() {
        let mut node = cluster_node(0, 3);
        deliver(
            &mut node,
            Message {
                kind: MessageKind::Heartbeat,
                term: u64::MAX,
                sender: 1,
            },
        );
        assert_eq!(node.state().current_term, u64::MAX);

        assert!(node.handle(Event::ElectionTimeout).is_empty());
        assert_eq!(node.state().current_term, u64::MAX);
        assert_eq!(node.state().role, NodeRole::Follower);
        assert_eq!(node.state().voted_for, Some(1));
    }
}
