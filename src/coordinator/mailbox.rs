//! Coordinator mailbox: one ordered queue for calls, casts, DOWNs and node events

use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::trace;

use crate::error::{PgError, PgResult};
use crate::liveness::DownSink;
use crate::transport::{Call, Cast, NodeEvent, Reply};
use crate::types::{Down, NodeId};

/// Everything a coordinator processes, in arrival order
pub(crate) enum Envelope<G, P, M> {
    /// Request from a caller, answered on `reply`
    Call {
        call: Call<G, P, M>,
        reply: Sender<PgResult<Reply>>,
    },
    /// Replica update from a peer
    Cast(Cast<G, P, M>),
    /// A monitored member exited
    Down(Down<P>),
    /// Cluster membership change
    Node(NodeEvent),
    /// Leave the processing loop
    Stop,
}

pub(crate) fn mailbox<G, P, M>(node: NodeId) -> (Inbox<G, P, M>, Receiver<Envelope<G, P, M>>) {
    let (tx, rx) = unbounded();
    (Inbox { node, tx }, rx)
}

/// Sending half of a coordinator mailbox.
///
/// Transports deliver inbound traffic through it and liveness monitors post
/// DOWN notifications to it, so all of them are serialized with local
/// requests.
pub struct Inbox<G, P, M> {
    node: NodeId,
    tx: Sender<Envelope<G, P, M>>,
}

impl<G, P, M> Clone for Inbox<G, P, M> {
    fn clone(&self) -> Self {
        Inbox {
            node: self.node,
            tx: self.tx.clone(),
        }
    }
}

impl<G, P, M> Inbox<G, P, M> {
    /// Node whose coordinator owns this mailbox
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Queue a call and wait for the reply
    pub fn call(&self, call: Call<G, P, M>, timeout: Duration) -> PgResult<Reply> {
        let op = call.op().to_string();
        let (reply_tx, reply_rx) = bounded(1);

        self.tx
            .send(Envelope::Call { call, reply: reply_tx })
            .map_err(|_| self.stopped())?;

        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(PgError::Timeout(format!(
                "{} on node {} after {:?}",
                op, self.node, timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(self.stopped()),
        }
    }

    /// Queue a cast. Returns false if the coordinator is gone.
    pub fn cast(&self, cast: Cast<G, P, M>) -> bool {
        self.tx.send(Envelope::Cast(cast)).is_ok()
    }

    /// Queue a node up/down event
    pub fn node_event(&self, event: NodeEvent) {
        let _ = self.tx.send(Envelope::Node(event));
    }

    pub(crate) fn stop(&self) {
        let _ = self.tx.send(Envelope::Stop);
    }

    fn stopped(&self) -> PgError {
        PgError::CoordinatorStopped(format!("mailbox of node {} is closed", self.node))
    }
}

impl<G, P, M> DownSink<P> for Inbox<G, P, M>
where
    G: Send + 'static,
    P: Send + std::fmt::Display + 'static,
    M: Send + 'static,
{
    fn deliver(&self, down: Down<P>) {
        let pid = down.pid.to_string();
        if self.tx.send(Envelope::Down(down)).is_err() {
            trace!(node = %self.node, %pid, "DOWN after coordinator stop, dropped");
        }
    }
}
