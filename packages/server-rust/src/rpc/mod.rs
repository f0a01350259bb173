//! Correlated RPC layer: message ids, pending calls and the node that ties
//! them to a transport.

pub mod node;
mod pending;

pub use node::RpcNode;
