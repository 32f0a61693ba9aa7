//! Node-to-node plumbing: calls to the owning node and best-effort broadcasts
//!
//! The coordinator only needs two things from the network: a blocking call
//! to one named node, and a one-way cast to every other node. Anything that
//! can do both (an in-process mesh, a TCP mesh speaking [`wire`] frames) is a
//! [`Transport`].

pub mod local;
pub mod wire;

pub use local::LocalCluster;
pub use wire::Frame;

use std::time::Duration;

use crate::coordinator::Inbox;
use crate::error::PgResult;
use crate::types::NodeId;

/// Requests that need an answer from the owning node
#[derive(Debug, Clone, PartialEq)]
pub enum Call<G, P, M> {
    Join { group: G, pid: P, meta: Option<M> },
    Leave { group: G, pid: P },
    /// A request this node does not understand
    Unknown(String),
}

impl<G, P, M> Call<G, P, M> {
    /// Operation name, also used as the wire tag
    pub fn op(&self) -> &str {
        match self {
            Call::Join { .. } => wire::JOIN,
            Call::Leave { .. } => wire::LEAVE,
            Call::Unknown(op) => op,
        }
    }
}

/// One-way replica updates sent by the owning node
#[derive(Debug, Clone, PartialEq)]
pub enum Cast<G, P, M> {
    ApplyJoin { group: G, pid: P, meta: Option<M> },
    ApplyLeave { group: G, pid: P },
    /// A cast this node does not understand
    Unknown(String),
}

impl<G, P, M> Cast<G, P, M> {
    /// Operation name, also used as the wire tag
    pub fn op(&self) -> &str {
        match self {
            Cast::ApplyJoin { .. } => wire::APPLY_JOIN,
            Cast::ApplyLeave { .. } => wire::APPLY_LEAVE,
            Cast::Unknown(op) => op,
        }
    }
}

/// Answer to a [`Call`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ok,
    /// The call was not recognized
    Undefined,
}

/// Cluster membership change seen by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    Up(NodeId),
    Down(NodeId),
}

/// Delivery of calls and casts between coordinators
pub trait Transport<G, P, M>: Send + Sync {
    /// Route inbound traffic for `node` to `inbox` and subscribe the inbox
    /// to node up/down events
    fn attach(&self, node: NodeId, inbox: Inbox<G, P, M>) -> PgResult<()>;

    /// Stop routing to `node`
    fn detach(&self, node: NodeId);

    /// Invoke `call` on `node` and wait at most `timeout` for the reply
    fn call(&self, node: NodeId, call: Call<G, P, M>, timeout: Duration) -> PgResult<Reply>;

    /// Send `cast` to every attached node except `from`. No acknowledgment,
    /// no ordering across receivers, failures are not reported.
    fn broadcast(&self, from: NodeId, cast: Cast<G, P, M>);

    /// Nodes currently reachable
    fn nodes(&self) -> Vec<NodeId>;
}
