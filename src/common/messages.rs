//! Typed Kademlia requests and responses.
//!
//! Byte level encoding is left to the [Transport](crate::rpc::Transport).

use crate::common::{Id, Node};

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    /// Chosen by the requester, echoed back by the responder.
    pub transaction_id: u32,

    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),
}

#[derive(Debug, PartialEq, Clone)]
pub struct RequestSpecific {
    /// Absent when the requester does not want to be added to the
    /// responder's routing table, e.g. a joining node pinging its bootstrap.
    pub requester_id: Option<Id>,
    pub request_type: RequestTypeSpecific,
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestTypeSpecific {
    Ping,
    Find(FindRequestArguments),
}

#[derive(Debug, PartialEq, Clone)]
pub enum ResponseSpecific {
    Ping(PingResponseArguments),
    Find(FindResponseArguments),
}

impl ResponseSpecific {
    pub fn responder_id(&self) -> &Id {
        match self {
            ResponseSpecific::Ping(arguments) => &arguments.responder_id,
            ResponseSpecific::Find(arguments) => &arguments.responder_id,
        }
    }
}

// === PING ===

#[derive(Debug, PartialEq, Clone)]
pub struct PingResponseArguments {
    pub responder_id: Id,
}

// === FIND ===

#[derive(Debug, PartialEq, Clone)]
pub struct FindRequestArguments {
    pub target: Id,
    /// Upper bound on the number of nodes wanted back.
    pub max: usize,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindResponseArguments {
    pub responder_id: Id,
    pub nodes: Vec<Node>,
}
