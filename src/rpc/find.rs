//! Iterative lookup of the nodes closest to a target.

use std::collections::HashSet;
use std::time::Instant;

use tracing::trace;

use crate::common::{FindRequestArguments, Id, Node, RequestSpecific, RequestTypeSpecific};

use super::{ClosestNodes, KademliaSocket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindState {
    /// Seeded, nothing sent yet.
    Init,
    /// Waiting for the requests of the current round.
    Round,
    /// A round did not change the closest nodes.
    Converged,
    /// Every candidate was queried.
    Exhausted,
}

/// State machine of one lookup, advanced by [FindQuery::tick] and
/// [FindQuery::response].
///
/// Each round asks up to `fan_out` of the closest candidates not asked yet.
/// A round ends once all its requests answered or timed out, and the lookup
/// stops when a round leaves the `max` closest candidates unchanged, or
/// when nobody is left to ask.
#[derive(Debug)]
pub struct FindQuery {
    target: Id,
    max: usize,
    ignore_self: bool,
    base_id: Id,
    fan_out: usize,
    closest: ClosestNodes,
    queried: HashSet<Id>,
    responded: HashSet<Id>,
    /// Requests of the current round, and who they were sent to.
    inflight: Vec<(u32, Id)>,
    best_before_round: Vec<Id>,
    rounds: usize,
    state: FindState,
}

impl FindQuery {
    pub fn new(
        target: Id,
        max: usize,
        ignore_self: bool,
        base_id: Id,
        fan_out: usize,
        seeds: impl IntoIterator<Item = Node>,
    ) -> Self {
        let mut closest = ClosestNodes::new(target.clone());
        for node in seeds {
            closest.add(node);
        }

        Self {
            target,
            max,
            ignore_self,
            // Never asked.
            queried: HashSet::from([base_id.clone()]),
            responded: HashSet::new(),
            base_id,
            fan_out: fan_out.max(1),
            closest,
            inflight: Vec::new(),
            best_before_round: Vec::new(),
            rounds: 0,
            state: FindState::Init,
        }
    }

    // === Getters ===

    pub fn target(&self) -> &Id {
        &self.target
    }

    pub fn state(&self) -> FindState {
        self.state
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, FindState::Converged | FindState::Exhausted)
    }

    /// Returns true if `transaction_id` belongs to the current round.
    pub fn owns(&self, transaction_id: u32) -> bool {
        self.inflight.iter().any(|(tid, _)| *tid == transaction_id)
    }

    /// The closest `max` candidates seen so far.
    pub fn result(&self) -> Vec<Node> {
        self.closest
            .nodes()
            .iter()
            .filter(|node| !(self.ignore_self && node.id == self.base_id))
            .take(self.max)
            .cloned()
            .collect()
    }

    /// Candidates that answered this lookup, closest first.
    ///
    /// Unlike [FindQuery::result], nodes that timed out or were never asked
    /// are left out.
    pub fn responded(&self) -> Vec<Node> {
        self.closest
            .nodes()
            .iter()
            .filter(|node| self.responded.contains(&node.id))
            .cloned()
            .collect()
    }

    // === Public Methods ===

    /// Merge the nodes returned by the responder of `transaction_id`.
    pub fn response(&mut self, transaction_id: u32, nodes: Vec<Node>) {
        if let Some(position) = self
            .inflight
            .iter()
            .position(|(tid, _)| *tid == transaction_id)
        {
            let (_, id) = self.inflight.swap_remove(position);
            self.responded.insert(id);
        }

        for node in nodes {
            self.closest.add(node);
        }
    }

    pub fn tick(&mut self, socket: &mut KademliaSocket, now: Instant) {
        match self.state {
            FindState::Init => self.start_round(socket, now),
            FindState::Round => {
                // Timed out requests are no longer inflight at the socket.
                self.inflight.retain(|(tid, _)| socket.inflight(*tid));

                if !self.inflight.is_empty() {
                    return;
                }

                if self.closest.closest_ids(self.max) == self.best_before_round {
                    self.finish(FindState::Converged);
                } else {
                    self.start_round(socket, now);
                }
            }
            FindState::Converged | FindState::Exhausted => {}
        }
    }

    // === Private Methods ===

    fn start_round(&mut self, socket: &mut KademliaSocket, now: Instant) {
        let next = self
            .closest
            .nodes()
            .iter()
            .filter(|node| !self.queried.contains(&node.id))
            .take(self.fan_out)
            .cloned()
            .collect::<Vec<_>>();

        if next.is_empty() {
            self.finish(FindState::Exhausted);
            return;
        }

        self.best_before_round = self.closest.closest_ids(self.max);
        self.rounds += 1;

        for node in next {
            let tid = socket.request(
                &node.link,
                RequestSpecific {
                    requester_id: Some(self.base_id.clone()),
                    request_type: RequestTypeSpecific::Find(FindRequestArguments {
                        target: self.target.clone(),
                        max: self.max,
                    }),
                },
                now,
            );

            self.queried.insert(node.id.clone());
            self.inflight.push((tid, node.id));
        }

        self.state = FindState::Round;
    }

    fn finish(&mut self, state: FindState) {
        self.state = state;

        trace!(
            context = "find_done",
            target = %self.target,
            ?state,
            rounds = self.rounds,
            queried = self.queried.len().saturating_sub(1),
            responded = self.responded.len(),
            candidates = self.closest.len()
        );
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::common::{Message, MessageType};
    use crate::rpc::Transport;

    use super::*;

    #[derive(Debug, Clone, Default)]
    struct RecordingTransport {
        sent: Arc<Mutex<Vec<(String, Message)>>>,
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, to: &str, message: Message) -> std::io::Result<()> {
            self.sent.lock().unwrap().push((to.to_string(), message));
            Ok(())
        }
    }

    fn id(bits: &str) -> Id {
        bits.parse().unwrap()
    }

    fn node(bits: &str) -> Node {
        Node::new(id(bits), bits)
    }

    fn socket() -> (KademliaSocket, RecordingTransport) {
        let transport = RecordingTransport::default();
        let (_, receiver) = flume::unbounded();

        let socket = KademliaSocket::new(
            Box::new(transport.clone()),
            receiver,
            Duration::from_secs(2),
            Duration::ZERO,
        );

        (socket, transport)
    }

    fn sent_to(transport: &RecordingTransport) -> Vec<(String, u32)> {
        transport
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, message)| matches!(message.message_type, MessageType::Request(_)))
            .map(|(to, message)| (to.clone(), message.transaction_id))
            .collect()
    }

    #[test]
    fn never_queries_base() {
        let (mut socket, transport) = socket();
        let mut query = FindQuery::new(
            id("0000"),
            2,
            true,
            id("0000"),
            3,
            vec![node("0000"), node("0001")],
        );

        query.tick(&mut socket, Instant::now());

        let sent = sent_to(&transport);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "0001");
        assert_eq!(query.state(), FindState::Round);
        assert_eq!(query.result(), vec![node("0001")]);
    }

    #[test]
    fn all_timeouts_converge_on_local_candidates() {
        let (mut socket, _) = socket();
        let now = Instant::now();
        let mut query = FindQuery::new(
            id("1000"),
            2,
            true,
            id("0000"),
            3,
            vec![node("1001"), node("1100")],
        );

        query.tick(&mut socket, now);
        assert_eq!(query.state(), FindState::Round);

        query.tick(&mut socket, now);
        assert_eq!(query.state(), FindState::Round, "still waiting");

        socket.cleanup(now + Duration::from_secs(2));
        query.tick(&mut socket, now + Duration::from_secs(2));

        assert_eq!(query.state(), FindState::Converged);
        assert_eq!(query.rounds(), 1);
        assert_eq!(query.result(), vec![node("1001"), node("1100")]);
        assert!(query.responded().is_empty());
    }

    #[test]
    fn responded_leaves_out_timeouts() {
        let (mut socket, transport) = socket();
        let now = Instant::now();
        let mut query = FindQuery::new(
            id("1000"),
            3,
            true,
            id("0000"),
            3,
            vec![node("1001"), node("1100")],
        );

        query.tick(&mut socket, now);

        let sent = sent_to(&transport);
        let (_, answered) = sent
            .iter()
            .find(|(to, _)| to == "1100")
            .cloned()
            .unwrap();

        // Learns about 1010, which is never asked before the lookup ends.
        assert!(socket.cleanup(now).is_empty());
        query.response(answered, vec![node("1010")]);

        socket.cleanup(now + Duration::from_secs(2));
        query.tick(&mut socket, now + Duration::from_secs(2));
        assert_eq!(query.rounds(), 2);

        socket.cleanup(now + Duration::from_secs(4));
        query.tick(&mut socket, now + Duration::from_secs(4));

        assert!(query.is_done());
        assert_eq!(
            query.result(),
            vec![node("1001"), node("1010"), node("1100")]
        );
        assert_eq!(query.responded(), vec![node("1100")]);
    }

    #[test]
    fn closer_nodes_start_another_round() {
        let (mut socket, transport) = socket();
        let now = Instant::now();
        let mut query = FindQuery::new(id("1000"), 1, true, id("0000"), 1, vec![node("1100")]);

        query.tick(&mut socket, now);
        let (_, tid) = sent_to(&transport)[0].clone();
        assert!(query.owns(tid));

        // Socket side of receiving the response.
        assert!(socket.cleanup(now).is_empty());
        query.response(tid, vec![node("1001"), node("0000")]);
        assert!(!query.owns(tid));

        query.tick(&mut socket, now);
        assert_eq!(query.rounds(), 2);
        assert_eq!(sent_to(&transport).last().unwrap().0, "1001");

        let (_, tid) = sent_to(&transport)[1].clone();
        query.response(tid, vec![]);
        query.tick(&mut socket, now);

        assert_eq!(query.state(), FindState::Converged);
        assert_eq!(query.result(), vec![node("1001")]);
    }

    #[test]
    fn exhausted_without_candidates() {
        let (mut socket, _) = socket();
        let mut query = FindQuery::new(id("1000"), 3, true, id("0000"), 3, vec![]);

        query.tick(&mut socket, Instant::now());

        assert_eq!(query.state(), FindState::Exhausted);
        assert!(query.is_done());
        assert!(query.result().is_empty());
    }

    #[test]
    fn keep_self_when_asked() {
        let query = FindQuery::new(
            id("0000"),
            2,
            false,
            id("0000"),
            3,
            vec![node("0000"), node("0001")],
        );

        assert_eq!(query.result(), vec![node("0000"), node("0001")]);
    }
}
