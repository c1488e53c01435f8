#![doc = include_str!("../README.md")]

// Public modules
mod common;
mod error;
mod kademlia;
pub mod routing;
pub mod rpc;
pub mod testnet;

pub use crate::common::*;
pub use error::{Error, Result};
pub use kademlia::{Kademlia, Killed, SearchRequest, SearchResponse};
pub use routing::Router;
pub use rpc::{Config, Info};
pub use testnet::Testnet;
