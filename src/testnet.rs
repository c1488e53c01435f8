//! In-memory network of Kademlia nodes, for tests and demos.

use std::io;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flume::{Receiver, Sender};

use crate::common::Message;
use crate::kademlia::Kademlia;
use crate::rpc::{Clock, Config, Rpc, SystemClock, Transport};
use crate::{Error, Result};

type Inbox = Sender<(String, Message)>;

/// Links registered on this network, and the inbox each one delivers to.
///
/// Clones share the same network.
#[derive(Debug, Clone, Default)]
pub struct Testnet {
    links: Arc<DashMap<String, Inbox>>,
}

impl Testnet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered links, in no particular order.
    pub fn links(&self) -> Vec<String> {
        self.links.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Register `link`, returning the transport to send from it and the
    /// receiver of everything sent to it.
    pub fn bind(
        &self,
        link: impl Into<String>,
    ) -> Result<(TestnetTransport, Receiver<(String, Message)>)> {
        let link = link.into();

        match self.links.entry(link.clone()) {
            Entry::Occupied(_) => Err(Error::LinkInUse(link)),
            Entry::Vacant(entry) => {
                let (sender, receiver) = flume::unbounded();
                entry.insert(sender);

                let transport = TestnetTransport {
                    link,
                    links: self.links.clone(),
                };

                Ok((transport, receiver))
            }
        }
    }

    /// Unregister `link`, so messages to it fail to send.
    ///
    /// Returns `true` if it was registered.
    pub fn disconnect(&self, link: &str) -> bool {
        self.links.remove(link).is_some()
    }

    /// A node bound to `link`, ticked by the caller.
    pub fn rpc(&self, link: &str, config: Config, clock: Arc<dyn Clock>) -> Result<Rpc> {
        let (transport, inbound) = self.bind(link)?;

        Rpc::new(config, Box::new(transport), inbound, clock).inspect_err(|_| {
            self.disconnect(link);
        })
    }

    /// A node bound to `link`, running on its own thread.
    pub fn spawn(&self, link: &str, config: Config) -> Result<Kademlia> {
        Kademlia::new(self.rpc(link, config, Arc::new(SystemClock))?)
    }
}

/// Sending half of a [Testnet] link.
#[derive(Debug, Clone)]
pub struct TestnetTransport {
    link: String,
    links: Arc<DashMap<String, Inbox>>,
}

impl TestnetTransport {
    /// The link messages are sent from.
    pub fn link(&self) -> &str {
        &self.link
    }
}

impl Transport for TestnetTransport {
    fn send(&mut self, to: &str, message: Message) -> io::Result<()> {
        let inbox = self
            .links
            .get(to)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, format!("unknown link {to:?}"))
            })?;

        inbox
            .send((self.link.clone(), message))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, format!("{to:?} is gone")))
    }
}

#[cfg(test)]
mod test {
    use crate::common::{MessageType, RequestSpecific, RequestTypeSpecific};

    use super::*;

    fn ping() -> Message {
        Message {
            transaction_id: 3,
            message_type: MessageType::Request(RequestSpecific {
                requester_id: None,
                request_type: RequestTypeSpecific::Ping,
            }),
        }
    }

    #[test]
    fn deliver_tagged_with_sender() {
        let testnet = Testnet::new();
        let (mut a, _) = testnet.bind("a").unwrap();
        let (_, b_inbox) = testnet.bind("b").unwrap();

        a.send("b", ping()).unwrap();

        assert_eq!(b_inbox.try_recv().unwrap(), ("a".to_string(), ping()));
    }

    #[test]
    fn link_in_use() {
        let testnet = Testnet::new();
        let _bound = testnet.bind("a").unwrap();

        assert_eq!(
            testnet.bind("a").unwrap_err(),
            Error::LinkInUse("a".to_string())
        );
    }

    #[test]
    fn send_to_unknown_or_disconnected() {
        let testnet = Testnet::new();
        let (mut a, _) = testnet.bind("a").unwrap();
        let _b = testnet.bind("b").unwrap();

        assert_eq!(
            a.send("nowhere", ping()).unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );

        assert!(testnet.disconnect("b"));
        assert!(!testnet.disconnect("b"));
        assert!(a.send("b", ping()).is_err());
        assert_eq!(testnet.links(), vec!["a".to_string()]);
    }
}
