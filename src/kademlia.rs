//! Kademlia node running on its own thread.

use std::collections::HashMap;
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender, TryRecvError};
use tracing::{debug, error, info};

use crate::common::{Id, Node};
use crate::rpc::{Info, Rpc};
use crate::{Error, Result};

/// Outcome of a node thread that was ended with [Kademlia::kill].
///
/// Kept apart from [Error] so that error handling can never mistake it for a
/// failure, or swallow it.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Kademlia actor was killed")]
pub struct Killed;

/// Look up the `max` nodes closest to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub target: Id,
    pub max: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResponse {
    /// Closest first.
    pub nodes: Vec<Node>,
}

/// Handle to a Kademlia node ticking on its own thread.
///
/// Clones share the same node, only the handle from [Kademlia::new] can
/// [Kademlia::join] it.
/// The thread stops when every handle is dropped, or on [Kademlia::kill].
#[derive(Debug)]
pub struct Kademlia {
    sender: Sender<ActorMessage>,
    handle: Option<JoinHandle<Result<(), Killed>>>,
}

impl Clone for Kademlia {
    fn clone(&self) -> Self {
        Kademlia {
            sender: self.sender.clone(),
            handle: None,
        }
    }
}

impl Kademlia {
    /// Move `rpc` to a new thread and start ticking it.
    pub fn new(rpc: Rpc) -> Result<Self> {
        let (sender, receiver) = flume::unbounded();

        info!(id = %rpc.id(), "Kademlia node running");

        let handle = thread::Builder::new()
            .name(format!("kademlia-{}", rpc.id()))
            .spawn(move || run(rpc, receiver))
            .map_err(|error| Error::ThreadSpawn(error.to_string()))?;

        Ok(Kademlia {
            sender,
            handle: Some(handle),
        })
    }

    // === Public Methods ===

    /// Run a lookup, blocking until it finishes.
    pub fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let (sender, receiver) = flume::bounded(1);

        self.sender
            .send(ActorMessage::Search(request, sender))
            .map_err(|_| Error::ActorShutdown)?;

        receiver.recv().map_err(|_| Error::ActorShutdown)?
    }

    pub fn info(&self) -> Result<Info> {
        let (sender, receiver) = flume::bounded(1);

        self.sender
            .send(ActorMessage::Info(sender))
            .map_err(|_| Error::ActorShutdown)?;

        receiver.recv().map_err(|_| Error::ActorShutdown)
    }

    /// Ask the node thread to stop, abandoning running lookups.
    pub fn kill(&self) {
        let _ = self.sender.send(ActorMessage::Kill);
    }

    /// Drop this handle and block until the node thread ends, which needs
    /// every clone dropped too, or a [Kademlia::kill].
    ///
    /// Returns `Err(Killed)` if it ended through [Kademlia::kill]. Clones have
    /// no thread to wait for and return right away.
    ///
    /// # Panics
    ///
    /// Resumes the panic of a node thread that panicked.
    pub fn join(self) -> Result<(), Killed> {
        let Kademlia { sender, handle } = self;
        drop(sender);

        let Some(handle) = handle else {
            return Ok(());
        };

        let name = handle.thread().name().map(ToString::to_string);

        handle.join().unwrap_or_else(|panic| {
            error!(thread = ?name, "Kademlia actor thread panicked");
            std::panic::resume_unwind(panic)
        })
    }
}

#[derive(Debug)]
enum ActorMessage {
    Search(SearchRequest, Sender<Result<SearchResponse>>),
    Info(Sender<Info>),
    Kill,
}

fn run(mut rpc: Rpc, receiver: Receiver<ActorMessage>) -> Result<(), Killed> {
    let mut searches = HashMap::<u64, Sender<Result<SearchResponse>>>::new();

    loop {
        match receiver.try_recv() {
            Ok(ActorMessage::Search(SearchRequest { target, max }, sender)) => {
                match rpc.search(target, max) {
                    Ok(search_id) => {
                        searches.insert(search_id, sender);
                    }
                    Err(error) => {
                        let _ = sender.send(Err(error));
                    }
                }
            }
            Ok(ActorMessage::Info(sender)) => {
                let _ = sender.send(rpc.info());
            }
            Ok(ActorMessage::Kill) => {
                debug!(id = %rpc.id(), "Kademlia actor killed");
                return Err(Killed);
            }
            Err(TryRecvError::Disconnected) => {
                // Every handle was dropped.
                debug!(id = %rpc.id(), "Kademlia actor thread was shutdown after Drop.");
                return Ok(());
            }
            Err(TryRecvError::Empty) => {}
        }

        let report = rpc.tick();

        for (search_id, nodes) in report.done_searches {
            if let Some(sender) = searches.remove(&search_id) {
                let _ = sender.send(Ok(SearchResponse { nodes }));
            }
        }
    }
}
