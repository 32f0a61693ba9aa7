//! The coordinator loop: the only writer of the local membership table

use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::coordinator::mailbox::{Envelope, Inbox};
use crate::error::{PgError, PgResult};
use crate::liveness::{DownSink, Liveness};
use crate::store::{Membership, MembershipStore};
use crate::transport::{Call, Cast, NodeEvent, Reply, Transport};
use crate::types::{Down, GroupMeta, GroupName, NodeId, ProcessId};

pub(crate) struct Server<G, P, M> {
    node: NodeId,
    store: Arc<dyn MembershipStore<G, P, M>>,
    liveness: Arc<dyn Liveness<P>>,
    transport: Arc<dyn Transport<G, P, M>>,
    /// Where monitors post DOWN notifications: our own mailbox
    down_sink: Arc<dyn DownSink<P>>,
    mailbox: Receiver<Envelope<G, P, M>>,
}

impl<G, P, M> Server<G, P, M>
where
    G: GroupName,
    P: ProcessId,
    M: GroupMeta,
{
    pub(crate) fn new(
        node: NodeId,
        store: Arc<dyn MembershipStore<G, P, M>>,
        liveness: Arc<dyn Liveness<P>>,
        transport: Arc<dyn Transport<G, P, M>>,
        inbox: Inbox<G, P, M>,
        mailbox: Receiver<Envelope<G, P, M>>,
    ) -> Self {
        Server {
            node,
            store,
            liveness,
            transport,
            down_sink: Arc::new(inbox),
            mailbox,
        }
    }

    /// Process envelopes one at a time until told to stop
    pub(crate) fn run(self) {
        debug!(node = %self.node, "coordinator loop running");

        while let Ok(envelope) = self.mailbox.recv() {
            match envelope {
                Envelope::Call { call, reply } => {
                    let result = self.handle_call(call);
                    // The caller may have timed out and gone away
                    let _ = reply.send(result);
                }
                Envelope::Cast(cast) => self.handle_cast(cast),
                Envelope::Down(down) => self.handle_down(down),
                Envelope::Node(event) => self.handle_node_event(event),
                Envelope::Stop => break,
            }
        }

        info!(node = %self.node, "coordinator stopped");
    }

    fn handle_call(&self, call: Call<G, P, M>) -> PgResult<Reply> {
        match call {
            Call::Join { group, pid, meta } => self.join(group, pid, meta),
            Call::Leave { group, pid } => self.leave(group, pid),
            Call::Unknown(op) => {
                warn!(node = %self.node, %op, "unexpected call");
                Ok(Reply::Undefined)
            }
        }
    }

    fn handle_cast(&self, cast: Cast<G, P, M>) {
        match cast {
            Cast::ApplyJoin { group, pid, meta } => {
                self.store.write(Membership::replica(group, pid, meta));
            }
            Cast::ApplyLeave { group, pid } => {
                self.store.delete(&group, &pid);
            }
            Cast::Unknown(op) => {
                warn!(node = %self.node, %op, "unexpected cast");
            }
        }
    }

    fn handle_down(&self, down: Down<P>) {
        // A Down from a monitor we already dropped must not touch entries
        // held under a newer one
        let entries: Vec<_> = self
            .store
            .read_by_handle(&down.pid)
            .into_iter()
            .filter(|entry| entry.monitor.map_or(true, |monitor| monitor == down.monitor))
            .collect();
        if entries.is_empty() {
            debug!(
                node = %self.node,
                pid = %down.pid,
                reason = %down.reason,
                "unmonitored process exit"
            );
            return;
        }

        for entry in entries {
            if !down.reason.is_benign() {
                warn!(
                    node = %self.node,
                    pid = %entry.pid,
                    group = ?entry.group,
                    reason = %down.reason,
                    "group member exited"
                );
            }
            self.store.delete(&entry.group, &entry.pid);
            self.transport.broadcast(
                self.node,
                Cast::ApplyLeave { group: entry.group, pid: entry.pid },
            );
        }
    }

    fn handle_node_event(&self, event: NodeEvent) {
        match event {
            NodeEvent::Up(peer) => debug!(node = %self.node, %peer, "node up"),
            NodeEvent::Down(peer) => debug!(node = %self.node, %peer, "node down"),
        }
    }

    fn join(&self, group: G, pid: P, meta: Option<M>) -> PgResult<Reply> {
        self.check_owner(&pid)?;
        if !self.liveness.is_alive(&pid) {
            return Err(PgError::NotAlive(pid.to_string()));
        }

        // All memberships of a pid share the monitor created by its first join
        let monitor = match self
            .store
            .read_by_handle(&pid)
            .iter()
            .find_map(|entry| entry.monitor)
        {
            Some(monitor) => monitor,
            None => self.liveness.monitor(&pid, Arc::clone(&self.down_sink)),
        };

        self.store.delete(&group, &pid);
        self.store.write(Membership::owned(group.clone(), pid.clone(), meta.clone(), monitor));
        debug!(node = %self.node, %pid, group = ?group, %monitor, "joined");

        self.transport.broadcast(self.node, Cast::ApplyJoin { group, pid, meta });
        Ok(Reply::Ok)
    }

    fn leave(&self, group: G, pid: P) -> PgResult<Reply> {
        self.check_owner(&pid)?;
        let entry = self
            .store
            .read_exact(&group, &pid)
            .ok_or_else(|| PgError::NotInGroup(format!("{} / {:?}", pid, group)))?;

        if self.is_last_membership(&entry) {
            if let Some(monitor) = entry.monitor {
                self.liveness.demonitor(monitor);
            }
        }

        self.store.delete(&group, &pid);
        debug!(node = %self.node, %pid, group = ?group, "left");

        self.transport.broadcast(self.node, Cast::ApplyLeave { group, pid });
        Ok(Reply::Ok)
    }

    /// True when no other group of the same pid relies on this entry's monitor
    fn is_last_membership(&self, entry: &Membership<G, P, M>) -> bool {
        !self
            .store
            .read_by_handle(&entry.pid)
            .iter()
            .any(|other| other.group != entry.group && other.monitor == entry.monitor)
    }

    fn check_owner(&self, pid: &P) -> PgResult<()> {
        if pid.node() == self.node {
            Ok(())
        } else {
            Err(PgError::NotOwner { node: self.node, pid: pid.to_string() })
        }
    }
}
