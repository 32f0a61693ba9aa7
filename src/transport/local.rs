//! In-process cluster: every node's coordinator lives in the same process
//!
//! Calls and casts still travel as encoded [`Frame`]s, so peers see exactly
//! what a network transport would hand them, `Unknown` operations included.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::coordinator::Inbox;
use crate::error::{PgError, PgResult};
use crate::transport::wire::{self, Frame};
use crate::transport::{Call, Cast, NodeEvent, Reply, Transport};
use crate::types::NodeId;

/// Transport routing encoded frames directly into coordinator mailboxes
pub struct LocalCluster<G, P, M> {
    /// Attached nodes
    routes: DashMap<NodeId, Inbox<G, P, M>>,
    /// Transport statistics
    stats: ClusterStats,
}

#[derive(Debug, Default)]
struct ClusterStats {
    calls: AtomicU64,
    broadcasts: AtomicU64,
    casts_delivered: AtomicU64,
}

impl<G, P, M> LocalCluster<G, P, M>
where
    G: Clone + Send + 'static,
    P: Clone + Send + 'static,
    M: Clone + Send + 'static,
{
    /// Create an empty cluster
    pub fn new() -> Self {
        LocalCluster {
            routes: DashMap::new(),
            stats: ClusterStats::default(),
        }
    }

    /// Number of broadcasts issued so far
    pub fn broadcast_count(&self) -> u64 {
        self.stats.broadcasts.load(Ordering::Relaxed)
    }

    /// Number of casts handed to a receiving mailbox
    pub fn delivered_count(&self) -> u64 {
        self.stats.casts_delivered.load(Ordering::Relaxed)
    }

    /// Number of calls routed
    pub fn call_count(&self) -> u64 {
        self.stats.calls.load(Ordering::Relaxed)
    }

    fn inbox(&self, node: NodeId) -> Option<Inbox<G, P, M>> {
        self.routes.get(&node).map(|entry| entry.value().clone())
    }

    fn peers_of(&self, node: NodeId) -> Vec<(NodeId, Inbox<G, P, M>)> {
        self.routes
            .iter()
            .filter(|entry| *entry.key() != node)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}

impl<G, P, M> Default for LocalCluster<G, P, M>
where
    G: Clone + Send + 'static,
    P: Clone + Send + 'static,
    M: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<G, P, M> Transport<G, P, M> for LocalCluster<G, P, M>
where
    G: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    P: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    M: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    fn attach(&self, node: NodeId, inbox: Inbox<G, P, M>) -> PgResult<()> {
        let peers = self.peers_of(node);
        for (peer, peer_inbox) in &peers {
            peer_inbox.node_event(NodeEvent::Up(node));
            inbox.node_event(NodeEvent::Up(*peer));
        }

        if self.routes.insert(node, inbox).is_some() {
            debug!(%node, "node re-attached, previous route replaced");
        }
        Ok(())
    }

    fn detach(&self, node: NodeId) {
        if self.routes.remove(&node).is_none() {
            return;
        }
        for (_, peer_inbox) in self.peers_of(node) {
            peer_inbox.node_event(NodeEvent::Down(node));
        }
    }

    fn call(&self, node: NodeId, call: Call<G, P, M>, timeout: Duration) -> PgResult<Reply> {
        let inbox = self.inbox(node).ok_or(PgError::UnknownNode(node))?;
        let frame = over_wire(wire::encode_call(&call)?)?;
        self.stats.calls.fetch_add(1, Ordering::Relaxed);
        inbox.call(wire::decode_call(&frame)?, timeout)
    }

    fn broadcast(&self, from: NodeId, cast: Cast<G, P, M>) {
        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        let cast = match wire::encode_cast(&cast)
            .and_then(over_wire)
            .and_then(|frame| wire::decode_cast(&frame))
        {
            Ok(cast) => cast,
            Err(err) => {
                warn!(%from, op = cast.op(), error = %err, "cast dropped");
                return;
            }
        };
        for (peer, inbox) in self.peers_of(from) {
            trace!(%peer, op = cast.op(), "cast");
            if inbox.cast(cast.clone()) {
                self.stats.casts_delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.routes.iter().map(|entry| *entry.key()).collect();
        nodes.sort();
        nodes
    }
}

/// Serialize a frame and read it back, as a socket would
fn over_wire(frame: Frame) -> PgResult<Frame> {
    Frame::from_bytes(&frame.to_bytes()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::mailbox::{mailbox, Envelope};
    use crate::types::Pid;
    use crossbeam_channel::Receiver;

    type TestCluster = LocalCluster<String, Pid, String>;
    type TestMailbox = Receiver<Envelope<String, Pid, String>>;

    fn attach(cluster: &TestCluster) -> (NodeId, TestMailbox) {
        let node = NodeId::new();
        let (inbox, rx) = mailbox(node);
        cluster.attach(node, inbox).unwrap();
        (node, rx)
    }

    fn node_events(rx: &TestMailbox) -> Vec<NodeEvent> {
        rx.try_iter()
            .filter_map(|envelope| match envelope {
                Envelope::Node(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_attach_announces_both_ways() {
        let cluster = TestCluster::new();
        let (a, rx_a) = attach(&cluster);
        let (b, rx_b) = attach(&cluster);

        assert_eq!(node_events(&rx_a), vec![NodeEvent::Up(b)]);
        assert_eq!(node_events(&rx_b), vec![NodeEvent::Up(a)]);

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(cluster.nodes(), expected);

        cluster.detach(b);
        assert_eq!(node_events(&rx_a), vec![NodeEvent::Down(b)]);
        assert_eq!(cluster.nodes(), vec![a]);
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let cluster = TestCluster::new();
        let (a, rx_a) = attach(&cluster);
        let (_b, rx_b) = attach(&cluster);
        let (_c, rx_c) = attach(&cluster);
        node_events(&rx_a);

        let pid = Pid::spawn_on(a);
        cluster.broadcast(a, Cast::ApplyLeave { group: "g".to_string(), pid });

        assert_eq!(cluster.broadcast_count(), 1);
        assert_eq!(cluster.delivered_count(), 2);
        assert!(rx_a.try_recv().is_err());
        for rx in [&rx_b, &rx_c] {
            let casts = rx
                .try_iter()
                .filter(|envelope| matches!(envelope, Envelope::Cast(_)))
                .count();
            assert_eq!(casts, 1);
        }
    }

    #[test]
    fn test_unknown_cast_survives_the_wire() {
        let cluster = TestCluster::new();
        let (a, _rx_a) = attach(&cluster);
        let (_b, rx_b) = attach(&cluster);

        cluster.broadcast(a, Cast::Unknown("resync".to_string()));
        let ops: Vec<String> = rx_b
            .try_iter()
            .filter_map(|envelope| match envelope {
                Envelope::Cast(Cast::Unknown(op)) => Some(op),
                _ => None,
            })
            .collect();
        assert_eq!(ops, vec!["resync".to_string()]);
    }

    #[test]
    fn test_call_to_unknown_node() {
        let cluster = TestCluster::new();
        let missing = NodeId::new();
        let result = cluster.call(
            missing,
            Call::Unknown("ping".to_string()),
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(PgError::UnknownNode(node)) if node == missing));
        assert_eq!(cluster.call_count(), 0);
    }
}
