//! Socket layer correlating outgoing requests with incoming responses.

mod inflight_requests;

use std::fmt::Debug;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::{debug, trace};

use crate::common::{Message, MessageType, RequestSpecific, ResponseSpecific};

use inflight_requests::InflightRequests;

/// Shortest wait on a disconnected inbound channel.
const DISCONNECTED_BACKOFF: Duration = Duration::from_millis(10);

/// Outbound half of whatever carries [Message]s between nodes.
///
/// Inbound messages are delivered on a `flume::Receiver<(String, Message)>`,
/// tagged with the link of the sender.
pub trait Transport: Send + Debug {
    /// Send `message` to the node reachable at `to`.
    fn send(&mut self, to: &str, message: Message) -> std::io::Result<()>;
}

/// A [Transport] wrapper that assigns transaction ids and filters responses
/// that nobody is waiting for.
#[derive(Debug)]
pub struct KademliaSocket {
    next_tid: u32,
    transport: Box<dyn Transport>,
    inbound: Receiver<(String, Message)>,
    inflight_requests: InflightRequests,
    request_timeout: Duration,
    poll_interval: Duration,
}

impl KademliaSocket {
    pub fn new(
        transport: Box<dyn Transport>,
        inbound: Receiver<(String, Message)>,
        request_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            next_tid: 0,
            transport,
            inbound,
            inflight_requests: InflightRequests::new(),
            request_timeout,
            poll_interval,
        }
    }

    // === Getters ===

    /// Returns true if this transaction_id is still inflight.
    pub fn inflight(&self, transaction_id: u32) -> bool {
        self.inflight_requests.contains(transaction_id)
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight_requests.len()
    }

    // === Public Methods ===

    /// Send a request to `to` and return its transaction_id.
    pub fn request(&mut self, to: &str, request: RequestSpecific, now: Instant) -> u32 {
        let transaction_id = self.tid();
        let message = Message {
            transaction_id,
            message_type: MessageType::Request(request),
        };

        self.inflight_requests.add(transaction_id, to, now);

        let _ = self.send(to, message).map_err(|e| {
            debug!(?e, to, "Error sending request message");
        });

        transaction_id
    }

    /// Send a response to the given link.
    pub fn response(&mut self, to: &str, transaction_id: u32, response: ResponseSpecific) {
        let message = Message {
            transaction_id,
            message_type: MessageType::Response(response),
        };

        let _ = self.send(to, message).map_err(|e| {
            debug!(?e, to, "Error sending response message");
        });
    }

    /// Drop expired requests, returning their transaction ids.
    pub fn cleanup(&mut self, now: Instant) -> Vec<u32> {
        self.inflight_requests.cleanup(now, self.request_timeout)
    }

    /// Receives a single message, waiting up to the poll interval.
    ///
    /// Requests are always returned, responses only if their transaction_id
    /// is inflight and they come from the link it was sent to.
    pub fn recv_from(&mut self) -> Option<(Message, String)> {
        let received = if self.poll_interval.is_zero() {
            self.inbound.try_recv().map_err(|error| match error {
                TryRecvError::Empty => RecvTimeoutError::Timeout,
                TryRecvError::Disconnected => RecvTimeoutError::Disconnected,
            })
        } else {
            self.inbound.recv_timeout(self.poll_interval)
        };

        match received {
            Ok((from, message)) => {
                let should_return = match message.message_type {
                    MessageType::Request(_) => {
                        trace!(
                            context = "socket_message_receiving",
                            ?message,
                            %from,
                            "Received request message"
                        );
                        true
                    }
                    MessageType::Response(_) => {
                        trace!(
                            context = "socket_message_receiving",
                            ?message,
                            %from,
                            "Received response message"
                        );
                        self.is_expected_response(&message, &from)
                    }
                };

                if should_return {
                    return Some((message, from));
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                trace!(context = "socket_error", "Inbound channel disconnected");
                // Nothing will ever arrive, do not spin.
                std::thread::sleep(self.poll_interval.max(DISCONNECTED_BACKOFF));
            }
        }

        None
    }

    // === Private Methods ===

    fn is_expected_response(&mut self, message: &Message, from: &str) -> bool {
        if !self.inflight_requests.contains(message.transaction_id) {
            trace!(
                context = "socket_validation",
                message = "Unexpected response id"
            );
            return false;
        }

        if self
            .inflight_requests
            .remove(message.transaction_id, from)
            .is_none()
        {
            trace!(
                context = "socket_validation",
                message = "Response from wrong link"
            );
            return false;
        }

        true
    }

    /// Increments self.next_tid and returns the previous value.
    fn tid(&mut self) -> u32 {
        let tid = self.next_tid;
        self.next_tid = self.next_tid.wrapping_add(1);
        tid
    }

    fn send(&mut self, to: &str, message: Message) -> std::io::Result<()> {
        trace!(context = "socket_message_sending", to, ?message);
        self.transport.send(to, message)
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use crate::common::{
        FindRequestArguments, Id, PingResponseArguments, RequestTypeSpecific,
    };

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

    fn socket() -> (
        KademliaSocket,
        RecordingTransport,
        flume::Sender<(String, Message)>,
    ) {
        let transport = RecordingTransport::default();
        let (sender, receiver) = flume::unbounded();

        let socket = KademliaSocket::new(
            Box::new(transport.clone()),
            receiver,
            Duration::from_secs(2),
            Duration::ZERO,
        );

        (socket, transport, sender)
    }

    fn id(bits: &str) -> Id {
        bits.parse().unwrap()
    }

    fn ping_response(transaction_id: u32) -> Message {
        Message {
            transaction_id,
            message_type: MessageType::Response(ResponseSpecific::Ping(PingResponseArguments {
                responder_id: id("0101"),
            })),
        }
    }

    #[test]
    fn disconnected_inbound_backs_off() {
        let (mut socket, _, sender) = socket();
        drop(sender);

        let start = Instant::now();
        assert!(socket.recv_from().is_none());

        assert!(start.elapsed() >= DISCONNECTED_BACKOFF);
    }

    #[test]
    fn tid() {
        let (mut socket, _, _) = socket();

        assert_eq!(socket.tid(), 0);
        assert_eq!(socket.tid(), 1);
        assert_eq!(socket.tid(), 2);

        socket.next_tid = u32::MAX;

        assert_eq!(socket.tid(), u32::MAX);
        assert_eq!(socket.tid(), 0);
    }

    #[test]
    fn request_is_sent_and_inflight() {
        let (mut socket, transport, _) = socket();
        
        let request = RequestSpecific {
            requester_id: Some(id("0001")),
            request_type: RequestTypeSpecific::Find(FindRequestArguments {
                target: id("1111"),
                max: 3,
            }),
        };

        let tid = socket.request("b", request.clone(), Instant::now());

        assert!(socket.inflight(tid));

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "b");
        assert_eq!(sent[0].1.message_type, MessageType::Request(request));
    }

    #[test]
    fn recv_request() {
        let (mut socket, _, sender) = socket();

        let request = Message {
            transaction_id: 120,
            message_type: MessageType::Request(RequestSpecific {
                requester_id: None,
                request_type: RequestTypeSpecific::Ping,
            }),
        };
        sender.send(("a".to_string(), request.clone())).unwrap();

        assert_eq!(socket.recv_from(), Some((request, "a".to_string())));
        assert_eq!(socket.recv_from(), None);
    }

    #[test]
    fn recv_response() {
        let (mut socket, _, sender) = socket();
        let tid = socket.request(
            "b",
            RequestSpecific {
                requester_id: None,
                request_type: RequestTypeSpecific::Ping,
            },
            Instant::now(),
        );

        sender.send(("b".to_string(), ping_response(tid))).unwrap();

        assert_eq!(socket.recv_from(), Some((ping_response(tid), "b".to_string())));
        assert!(!socket.inflight(tid), "receiving removes the inflight request");
    }

    #[test]
    fn ignore_unexpected_responses() {
        let (mut socket, _, sender) = socket();
        let tid = socket.request(
            "b",
            RequestSpecific {
                requester_id: None,
                request_type: RequestTypeSpecific::Ping,
            },
            Instant::now(),
        );

        // Wrong link.
        sender.send(("c".to_string(), ping_response(tid))).unwrap();
        assert_eq!(socket.recv_from(), None);
        assert!(socket.inflight(tid));

        // Unknown transaction id.
        sender
            .send(("b".to_string(), ping_response(tid + 1)))
            .unwrap();
        assert_eq!(socket.recv_from(), None);
    }

    #[test]
    fn inflight_request_timeout() {
        let (mut socket, _, _) = socket();
        let now = Instant::now();

        let tid = socket.request(
            "b",
            RequestSpecific {
                requester_id: None,
                request_type: RequestTypeSpecific::Ping,
            },
            now,
        );

        assert!(socket.cleanup(now + Duration::from_secs(1)).is_empty());
        assert_eq!(socket.cleanup(now + Duration::from_secs(2)), vec![tid]);
        assert!(!socket.inflight(tid));
    }
}
