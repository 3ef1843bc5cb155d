// Broker node and its replication peers
pub mod node;
pub mod peers;

pub use node::BrokerNode;
pub use peers::{FanOutReport, Peer, PeerSet};
