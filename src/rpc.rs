//! Kademlia RPC: lookups, inbound requests and routing table maintenance.

mod clock;
mod closest_nodes;
pub mod config;
mod find;
mod info;
mod maintenance;
mod socket;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::Receiver;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, trace, warn};

use crate::common::{
    BitString, FindRequestArguments, FindResponseArguments, Id, Message, MessageType, Node,
    PingResponseArguments, RequestSpecific, RequestTypeSpecific, ResponseSpecific,
    RouterChangeSet,
};
use crate::routing::{Router, SimpleTreeLayout};
use crate::{Error, Result};

pub use clock::{Clock, ManualClock, SystemClock};
pub use closest_nodes::ClosestNodes;
pub use config::Config;
pub use find::{FindQuery, FindState};
pub use info::Info;
pub use socket::{KademliaSocket, Transport};

use maintenance::{refresh_candidates, Maintenance};

/// Upper bound of inbound messages handled in one [Rpc::tick].
const MAX_MESSAGES_PER_TICK: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
enum QueryPurpose {
    /// Lookup of our own id right after reaching the bootstrap node.
    Join,
    /// Filling the bucket at this prefix after joining.
    Populate(BitString),
    Advertise,
    Refresh(BitString),
    /// Requested through [Rpc::search].
    Search,
}

#[derive(Debug)]
struct RunningQuery {
    purpose: QueryPurpose,
    query: FindQuery,
}

#[derive(Debug)]
enum PendingPing {
    Join { attempts: usize },
    Sweep(Node),
}

/// Outcome of one [Rpc::tick].
#[derive(Debug, Default)]
pub struct RpcTickReport {
    /// Searches that finished during this tick, by the id [Rpc::search] returned.
    pub done_searches: Vec<(u64, Vec<Node>)>,
}

/// A Kademlia node, driven by calling [Rpc::tick] in a loop.
#[derive(Debug)]
pub struct Rpc {
    id: Id,
    router: Router,
    socket: KademliaSocket,
    clock: Arc<dyn Clock>,
    rng: StdRng,

    queries: HashMap<u64, RunningQuery>,
    next_query_id: u64,
    pending_pings: HashMap<u32, PendingPing>,
    maintenance: Maintenance,

    // Options
    bootstrap: Option<String>,
    bootstrap_attempts: usize,
    fan_out: usize,
    find_result_count: usize,
    ping_sweep_size: usize,
    stagnation_threshold: Duration,
    refresh_batch: usize,
}

impl Rpc {
    /// Create a node and, if [Config::bootstrap] is set, start joining through it.
    pub fn new(
        config: Config,
        transport: Box<dyn Transport>,
        inbound: Receiver<(String, Message)>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let layout = SimpleTreeLayout::new(
            config.branches_per_level,
            config.bucket_size,
            config.cache_size,
        )?;
        let router = Router::new(config.base_id.clone(), &layout, config.near_set_size)?;

        let rng = match &config.seed {
            Some(seed) => {
                let seed = seed
                    .get(..config::MIN_SEED_SIZE)
                    .and_then(|seed| <[u8; config::MIN_SEED_SIZE]>::try_from(seed).ok())
                    .ok_or(Error::SeedTooSmall {
                        minimum: config::MIN_SEED_SIZE,
                        actual: seed.len(),
                    })?;
                StdRng::from_seed(seed)
            }
            None => StdRng::from_entropy(),
        };

        let now = clock.now();

        let mut rpc = Rpc {
            id: config.base_id.clone(),
            router,
            socket: KademliaSocket::new(
                transport,
                inbound,
                config.request_timeout,
                config.poll_interval,
            ),
            clock,
            rng,

            queries: HashMap::new(),
            next_query_id: 0,
            pending_pings: HashMap::new(),
            maintenance: Maintenance::new(&config, now),

            bootstrap: config.bootstrap,
            bootstrap_attempts: config.bootstrap_attempts,
            fan_out: config.fan_out,
            find_result_count: config.find_result_count,
            ping_sweep_size: config.ping_sweep_size,
            stagnation_threshold: config.stagnation_threshold,
            refresh_batch: config.refresh_batch,
        };

        match rpc.bootstrap.clone() {
            Some(bootstrap) => rpc.ping_bootstrap(&bootstrap, 1, now),
            None => info!(id = %rpc.id, "First node in the network, nothing to join"),
        }

        Ok(rpc)
    }

    // === Getters ===

    /// Returns this node's [Id].
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn running_queries(&self) -> usize {
        self.queries.len()
    }

    pub fn inflight_requests(&self) -> usize {
        self.socket.inflight_count()
    }

    pub fn info(&self) -> Info {
        Info::from(self)
    }

    // === Public Methods ===

    /// Record `node` as seen now.
    pub fn add_node(&mut self, node: Node) -> Result<RouterChangeSet> {
        self.router.touch(self.clock.now(), node)
    }

    /// Start looking up the `max` nodes closest to `target`.
    ///
    /// Returns the id that the results are reported under in
    /// [RpcTickReport::done_searches].
    pub fn search(&mut self, target: Id, max: usize) -> Result<u64> {
        self.id.check_len(&target)?;

        self.start_query(target, max, true, QueryPurpose::Search)
    }

    pub fn tick(&mut self) -> RpcTickReport {
        let now = self.clock.now();
        let mut report = RpcTickReport::default();

        // === Timeouts ===
        for transaction_id in self.socket.cleanup(now) {
            if let Some(ping) = self.pending_pings.remove(&transaction_id) {
                self.ping_timed_out(ping, now);
            }
        }

        // === Tick Queries ===
        for running in self.queries.values_mut() {
            running.query.tick(&mut self.socket, now);
        }

        // === Remove done queries ===
        let done = self
            .queries
            .iter()
            .filter(|(_, running)| running.query.is_done())
            .map(|(query_id, _)| *query_id)
            .collect::<Vec<_>>();

        for query_id in done {
            if let Some(running) = self.queries.remove(&query_id) {
                self.query_done(query_id, running, now, &mut report);
            }
        }

        self.maintain_routing_table(now);

        for _ in 0..MAX_MESSAGES_PER_TICK {
            let Some((message, from)) = self.socket.recv_from() else {
                break;
            };

            match message.message_type {
                MessageType::Request(request) => {
                    self.handle_request(from, message.transaction_id, request, now);
                }
                MessageType::Response(response) => {
                    self.handle_response(from, message.transaction_id, response, now);
                }
            }
        }

        report
    }

    // === Private Methods ===

    fn handle_request(
        &mut self,
        from: String,
        transaction_id: u32,
        request: RequestSpecific,
        now: Instant,
    ) {
        if let Some(requester_id) = request.requester_id {
            if requester_id != self.id {
                self.touch(now, Node::new(requester_id, from.clone()));
            }
        }

        match request.request_type {
            RequestTypeSpecific::Ping => {
                self.socket.response(
                    &from,
                    transaction_id,
                    ResponseSpecific::Ping(PingResponseArguments {
                        responder_id: self.id.clone(),
                    }),
                );
            }
            RequestTypeSpecific::Find(FindRequestArguments { target, max }) => {
                let max = max.min(self.find_result_count);

                match self.router.find(&target, max, false) {
                    Ok(nodes) => self.socket.response(
                        &from,
                        transaction_id,
                        ResponseSpecific::Find(FindResponseArguments {
                            responder_id: self.id.clone(),
                            nodes,
                        }),
                    ),
                    Err(error) => {
                        debug!(?error, %from, "Invalid find request");
                    }
                }
            }
        }
    }

    fn handle_response(
        &mut self,
        from: String,
        transaction_id: u32,
        response: ResponseSpecific,
        now: Instant,
    ) {
        let responder_id = response.responder_id().clone();

        if responder_id == self.id {
            warn!(%from, "Response claiming our own id, ignoring");
            self.pending_pings.remove(&transaction_id);
            return;
        }

        self.touch(now, Node::new(responder_id, from));

        if let Some(ping) = self.pending_pings.remove(&transaction_id) {
            if let PendingPing::Join { .. } = ping {
                debug!("Bootstrap node responded, looking up our own id");
                self.start_maintenance_query(self.id.clone(), false, QueryPurpose::Join);
            }
            return;
        }

        if let ResponseSpecific::Find(FindResponseArguments { nodes, .. }) = response {
            if let Some(running) = self
                .queries
                .values_mut()
                .find(|running| running.query.owns(transaction_id))
            {
                running.query.response(transaction_id, nodes);
            }
        }
    }

    fn query_done(
        &mut self,
        query_id: u64,
        running: RunningQuery,
        now: Instant,
        report: &mut RpcTickReport,
    ) {
        match running.purpose {
            QueryPurpose::Search => {
                report
                    .done_searches
                    .push((query_id, running.query.result()));
            }
            // Only nodes that answered are known to be alive.
            QueryPurpose::Join => {
                self.touch_all(now, running.query.responded());

                let table_size = self.router.len();
                if table_size == 0 {
                    warn!("Could not populate the routing table from the bootstrap node");
                } else {
                    debug!(table_size, "Joined the network");
                }

                self.populate();
            }
            QueryPurpose::Populate(_) | QueryPurpose::Advertise | QueryPurpose::Refresh(_) => {
                self.touch_all(now, running.query.responded());
            }
        }
    }

    fn maintain_routing_table(&mut self, now: Instant) {
        let decisions = self.maintenance.decisions_at(now);

        if decisions.should_advertise
            && !self
                .queries
                .values()
                .any(|running| running.purpose == QueryPurpose::Advertise)
        {
            self.start_maintenance_query(self.id.clone(), true, QueryPurpose::Advertise);
        }

        if decisions.should_refresh {
            let running = self
                .queries
                .values()
                .filter_map(|running| match &running.purpose {
                    QueryPurpose::Refresh(prefix) => Some(prefix.clone()),
                    _ => None,
                })
                .collect::<HashSet<_>>();

            let stagnant = now
                .checked_sub(self.stagnation_threshold)
                .map(|older_than| self.router.stagnant_buckets(older_than))
                .unwrap_or_default()
                .into_iter()
                .map(|prefix| {
                    let populated = self
                        .router
                        .dump_bucket(&prefix)
                        .is_ok_and(|nodes| !nodes.is_empty());
                    (prefix, populated)
                })
                .collect();

            for prefix in refresh_candidates(stagnant, &running, self.refresh_batch) {
                self.start_prefix_query(prefix.clone(), QueryPurpose::Refresh(prefix));
            }
        }

        if decisions.should_ping {
            let target = Id::random(self.id.bit_len(), &mut self.rng);

            match self.router.find(&target, self.ping_sweep_size, true) {
                Ok(nodes) => {
                    for node in nodes {
                        self.ping(node, now);
                    }
                }
                Err(error) => debug!(?error, "Could not pick nodes to ping"),
            }
        }
    }

    /// Look up a random id in every bucket but our own.
    fn populate(&mut self) {
        for prefix in self.router.dump_bucket_prefixes() {
            if self.id.starts_with(&prefix) {
                continue;
            }

            self.start_prefix_query(prefix.clone(), QueryPurpose::Populate(prefix));
        }
    }

    fn start_prefix_query(&mut self, prefix: BitString, purpose: QueryPurpose) {
        match Id::random_with_prefix(&prefix, self.id.bit_len(), &mut self.rng) {
            Ok(target) => self.start_maintenance_query(target, true, purpose),
            Err(error) => debug!(?error, %prefix, "Could not pick a target in bucket"),
        }
    }

    fn start_maintenance_query(&mut self, target: Id, ignore_self: bool, purpose: QueryPurpose) {
        if let Err(error) = self.start_query(target, self.find_result_count, ignore_self, purpose)
        {
            debug!(?error, "Could not start maintenance query");
        }
    }

    fn start_query(
        &mut self,
        target: Id,
        max: usize,
        ignore_self: bool,
        purpose: QueryPurpose,
    ) -> Result<u64> {
        let seeds = self.router.find(&target, max, true)?;

        trace!(
            context = "query_start",
            %target,
            ?purpose,
            seeds = seeds.len()
        );

        let query = FindQuery::new(target, max, ignore_self, self.id.clone(), self.fan_out, seeds);

        let query_id = self.next_query_id;
        self.next_query_id = self.next_query_id.wrapping_add(1);

        self.queries.insert(query_id, RunningQuery { purpose, query });

        Ok(query_id)
    }

    fn ping_bootstrap(&mut self, bootstrap: &str, attempts: usize, now: Instant) {
        debug!(bootstrap, attempts, "Pinging bootstrap node");

        let transaction_id = self.socket.request(
            bootstrap,
            RequestSpecific {
                // Not added to the bootstrap node's table until it can reach us.
                requester_id: None,
                request_type: RequestTypeSpecific::Ping,
            },
            now,
        );

        self.pending_pings
            .insert(transaction_id, PendingPing::Join { attempts });
    }

    fn ping(&mut self, node: Node, now: Instant) {
        let transaction_id = self.socket.request(
            &node.link,
            RequestSpecific {
                requester_id: Some(self.id.clone()),
                request_type: RequestTypeSpecific::Ping,
            },
            now,
        );

        self.pending_pings
            .insert(transaction_id, PendingPing::Sweep(node));
    }

    fn ping_timed_out(&mut self, ping: PendingPing, now: Instant) {
        match ping {
            PendingPing::Join { attempts } => match self.bootstrap.clone() {
                Some(bootstrap) if attempts < self.bootstrap_attempts => {
                    self.ping_bootstrap(&bootstrap, attempts + 1, now);
                }
                _ => warn!(attempts, "Could not reach the bootstrap node"),
            },
            PendingPing::Sweep(node) => match self.router.stale(&node) {
                Ok(_) | Err(Error::NodeNotFound(_)) => {
                    trace!(context = "ping_sweep", id = %node.id, "Unresponsive node");
                }
                Err(error) => debug!(?error, "Could not mark node as stale"),
            },
        }
    }

    fn touch_all(&mut self, now: Instant, nodes: Vec<Node>) {
        for node in nodes {
            if node.id != self.id {
                self.touch(now, node);
            }
        }
    }

    fn touch(&mut self, now: Instant, node: Node) {
        if let Err(error) = self.router.touch(now, node) {
            debug!(?error, "Rejected node");
        }
    }
}

#[cfg(test)]
mod test {
    use crate::common::ID_BITS;

    use super::*;

    #[derive(Debug, Clone, Default)]
    struct NullTransport;

    impl Transport for NullTransport {
        fn send(&mut self, _to: &str, _message: Message) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn rpc(config: Config, clock: &ManualClock) -> (Rpc, flume::Sender<(String, Message)>) {
        let (sender, receiver) = flume::unbounded();
        let rpc = Rpc::new(
            Config {
                poll_interval: Duration::ZERO,
                ..config
            },
            Box::new(NullTransport),
            receiver,
            Arc::new(clock.clone()),
        )
        .unwrap();

        (rpc, sender)
    }

    #[test]
    fn rejects_invalid_config() {
        let (_, receiver) = flume::unbounded();

        let result = Rpc::new(
            Config {
                seed: Some(vec![1; 4]),
                ..Default::default()
            },
            Box::new(NullTransport),
            receiver,
            Arc::new(SystemClock),
        );

        assert!(matches!(result, Err(Error::SeedTooSmall { .. })));
    }

    #[test]
    fn requester_is_touched() {
        let clock = ManualClock::new();
        let (mut rpc, sender) = rpc(Config::default(), &clock);

        let requester = Id::random(ID_BITS, &mut rand::thread_rng());
        sender
            .send((
                "peer".to_string(),
                Message {
                    transaction_id: 1,
                    message_type: MessageType::Request(RequestSpecific {
                        requester_id: Some(requester.clone()),
                        request_type: RequestTypeSpecific::Ping,
                    }),
                },
            ))
            .unwrap();

        rpc.tick();

        assert_eq!(rpc.router().len(), 1);
        assert_eq!(
            rpc.router().find(&requester, 1, false).unwrap(),
            vec![Node::new(requester, "peer")]
        );
    }

    #[test]
    fn search_without_peers_finishes_empty() {
        let clock = ManualClock::new();
        let (mut rpc, _sender) = rpc(Config::default(), &clock);

        let target = Id::random(ID_BITS, &mut rand::thread_rng());
        let search = rpc.search(target, 5).unwrap();

        let report = rpc.tick();

        assert_eq!(report.done_searches, vec![(search, vec![])]);
        assert_eq!(rpc.running_queries(), 0);
    }

    #[test]
    fn search_rejects_wrong_length() {
        let clock = ManualClock::new();
        let (mut rpc, _sender) = rpc(Config::default(), &clock);

        assert!(matches!(
            rpc.search("0101".parse().unwrap(), 5),
            Err(Error::IdLengthMismatch { .. })
        ));
    }

    #[test]
    fn bootstrap_ping_is_retried() {
        let clock = ManualClock::new();
        let (mut rpc, _sender) = rpc(
            Config {
                bootstrap: Some("nowhere".into()),
                bootstrap_attempts: 2,
                ..Default::default()
            },
            &clock,
        );

        assert_eq!(rpc.inflight_requests(), 1);

        clock.advance(Duration::from_secs(2));
        rpc.tick();
        assert_eq!(rpc.inflight_requests(), 1, "second attempt");

        clock.advance(Duration::from_secs(2));
        rpc.tick();
        assert_eq!(rpc.inflight_requests(), 0, "gave up");
    }
}
