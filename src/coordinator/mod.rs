//! Group coordinator: per-node owner of all membership mutations
//!
//! Every join and leave for a process is decided by the coordinator of the
//! node the process runs on. That coordinator is a single thread draining one
//! mailbox, so joins, leaves, DOWN notifications and replica updates for a
//! process never interleave. Other nodes learn about the outcome through
//! best-effort broadcasts and keep a replica that reads can be served from.

pub(crate) mod mailbox;
mod server;

pub use mailbox::Inbox;

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::info;

use crate::config::PgConfig;
use crate::error::{PgError, PgResult};
use crate::liveness::Liveness;
use crate::store::{MemoryStore, MembershipStore};
use crate::transport::{Call, Reply, Transport};
use crate::types::{GroupMeta, GroupName, NodeId, ProcessId};

use server::Server;

/// Handle to a running group coordinator
pub struct GroupCoordinator<G, P, M>
where
    G: GroupName,
    P: ProcessId,
    M: GroupMeta,
{
    /// Local node identity
    node: NodeId,
    /// Configuration
    config: PgConfig,
    /// Local replica; written only by the coordinator thread
    store: Arc<dyn MembershipStore<G, P, M>>,
    /// Route to other nodes
    transport: Arc<dyn Transport<G, P, M>>,
    /// Own mailbox
    inbox: Inbox<G, P, M>,
    /// Coordinator thread, taken on stop
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<G, P, M> GroupCoordinator<G, P, M>
where
    G: GroupName,
    P: ProcessId,
    M: GroupMeta,
{
    /// Start a coordinator backed by a fresh in-memory store
    pub fn start(
        config: PgConfig,
        liveness: Arc<dyn Liveness<P>>,
        transport: Arc<dyn Transport<G, P, M>>,
    ) -> PgResult<Self> {
        Self::start_with_store(config, Arc::new(MemoryStore::new()), liveness, transport)
    }

    /// Start a coordinator over the given store.
    ///
    /// The store should hold no entries for this node's own processes: those
    /// are only created by `join`, which is what attaches their monitor.
    pub fn start_with_store(
        config: PgConfig,
        store: Arc<dyn MembershipStore<G, P, M>>,
        liveness: Arc<dyn Liveness<P>>,
        transport: Arc<dyn Transport<G, P, M>>,
    ) -> PgResult<Self> {
        config.validate()?;
        let node = config.node_id.unwrap_or_default();
        let (inbox, rx) = mailbox::mailbox(node);

        let server = Server::new(
            node,
            Arc::clone(&store),
            liveness,
            Arc::clone(&transport),
            inbox.clone(),
            rx,
        );
        let worker = std::thread::Builder::new()
            .name(format!("pg-coordinator-{}", node.short()))
            .spawn(move || server.run())?;

        // Subscribes to node up/down and makes us reachable for peers
        transport.attach(node, inbox.clone())?;
        info!(%node, "group coordinator started");

        Ok(GroupCoordinator {
            node,
            config,
            store,
            transport,
            inbox,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Local node identity
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// Mailbox of this coordinator, for transports and liveness adapters
    pub fn inbox(&self) -> Inbox<G, P, M> {
        self.inbox.clone()
    }

    /// Add `pid` to `group`, replacing the metadata of an existing membership.
    ///
    /// Runs on the node owning `pid`. Returns once the owner has written its
    /// local table; peers are updated asynchronously.
    pub fn join(&self, group: G, pid: P, meta: Option<M>) -> PgResult<()> {
        let owner = pid.node();
        let reply = self.route(owner, Call::Join { group, pid, meta })?;
        expect_ok(reply, "join")
    }

    /// Remove `pid` from `group`.
    ///
    /// Fails with `NotInGroup` without contacting the owner when the local
    /// replica has no such membership. The owner checks again before acting.
    pub fn leave(&self, group: G, pid: P) -> PgResult<()> {
        if self.store.read_exact(&group, &pid).is_none() {
            return Err(PgError::NotInGroup(format!("{} / {:?}", pid, group)));
        }
        let owner = pid.node();
        let reply = self.route(owner, Call::Leave { group, pid })?;
        expect_ok(reply, "leave")
    }

    /// Members of a group, sorted
    pub fn get_members(&self, group: &G) -> Vec<P> {
        let mut members: Vec<P> = self
            .store
            .read_by_group(group)
            .into_iter()
            .map(|entry| entry.pid)
            .collect();
        members.sort();
        members
    }

    /// Members of a group with their metadata, sorted by pid
    pub fn get_members_with_meta(&self, group: &G) -> Vec<(P, Option<M>)> {
        let mut members: Vec<(P, Option<M>)> = self
            .store
            .read_by_group(group)
            .into_iter()
            .map(|entry| (entry.pid, entry.meta))
            .collect();
        members.sort_by(|a, b| a.0.cmp(&b.0));
        members
    }

    /// Members of a group running on this node, sorted
    pub fn get_local_members(&self, group: &G) -> Vec<P> {
        let mut members = self.get_members(group);
        members.retain(|pid| pid.node() == self.node);
        members
    }

    pub fn is_member(&self, pid: &P, group: &G) -> bool {
        self.store.read_exact(group, pid).is_some()
    }

    /// Groups with at least one member, sorted
    pub fn which_groups(&self) -> Vec<G> {
        let mut groups = self.store.groups();
        groups.sort();
        groups
    }

    /// Groups `pid` belongs to, sorted
    pub fn groups_of(&self, pid: &P) -> Vec<G> {
        let mut groups: Vec<G> = self
            .store
            .read_by_handle(pid)
            .into_iter()
            .map(|entry| entry.group)
            .collect();
        groups.sort();
        groups
    }

    /// Detach from the transport and stop the coordinator thread
    pub fn stop(&self) -> PgResult<()> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };

        self.transport.detach(self.node);
        self.inbox.stop();
        worker.join().map_err(|_| {
            PgError::CoordinatorStopped(format!("coordinator thread of node {} panicked", self.node))
        })
    }

    fn route(&self, owner: NodeId, call: Call<G, P, M>) -> PgResult<Reply> {
        let timeout = self.config.call_timeout();
        if owner == self.node {
            self.inbox.call(call, timeout)
        } else {
            self.transport.call(owner, call, timeout)
        }
    }
}

impl<G, P, M> Drop for GroupCoordinator<G, P, M>
where
    G: GroupName,
    P: ProcessId,
    M: GroupMeta,
{
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn expect_ok(reply: Reply, op: &str) -> PgResult<()> {
    match reply {
        Reply::Ok => Ok(()),
        Reply::Undefined => Err(PgError::UnexpectedReply(format!("{} answered undefined", op))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::ProcessTable;
    use crate::transport::LocalCluster;
    use crate::types::{ExitReason, Pid};
    use std::time::{Duration, Instant};

    type Coordinator = GroupCoordinator<String, Pid, String>;

    fn single_node() -> (Coordinator, Arc<ProcessTable<Pid>>) {
        let processes = Arc::new(ProcessTable::new());
        let cluster: Arc<LocalCluster<String, Pid, String>> = Arc::new(LocalCluster::new());
        let coordinator = Coordinator::start(PgConfig::default(), processes.clone(), cluster).unwrap();
        (coordinator, processes)
    }

    fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_join_then_leave() {
        let (pg, processes) = single_node();
        let pid = Pid::spawn_on(pg.node_id());
        processes.spawn(pid);
        let workers = "workers".to_string();

        pg.join(workers.clone(), pid, Some("meta-a".to_string())).unwrap();
        assert!(pg.is_member(&pid, &workers));
        assert_eq!(pg.get_members(&workers), vec![pid]);

        pg.join(workers.clone(), pid, Some("meta-b".to_string())).unwrap();
        assert_eq!(pg.get_members(&workers), vec![pid]);
        assert_eq!(
            pg.get_members_with_meta(&workers),
            vec![(pid, Some("meta-b".to_string()))]
        );

        pg.leave(workers.clone(), pid).unwrap();
        assert!(pg.get_members(&workers).is_empty());
        assert!(!pg.is_member(&pid, &workers));
    }

    #[test]
    fn test_join_dead_process_is_rejected() {
        let (pg, _processes) = single_node();
        let pid = Pid::spawn_on(pg.node_id());

        let result = pg.join("workers".to_string(), pid, None);
        assert!(matches!(result, Err(PgError::NotAlive(_))));
        assert!(pg.which_groups().is_empty());
    }

    #[test]
    fn test_leave_unknown_membership() {
        let (pg, processes) = single_node();
        let pid = Pid::spawn_on(pg.node_id());
        processes.spawn(pid);

        let result = pg.leave("workers".to_string(), pid);
        assert!(matches!(result, Err(PgError::NotInGroup(_))));
    }

    #[test]
    fn test_crash_clears_memberships() {
        let (pg, processes) = single_node();
        let pid = Pid::spawn_on(pg.node_id());
        processes.spawn(pid);

        pg.join("a".to_string(), pid, None).unwrap();
        pg.join("b".to_string(), pid, None).unwrap();
        assert_eq!(processes.monitor_count(&pid), 1);

        processes.exit(&pid, ExitReason::Error("boom".to_string()));
        assert!(wait_until(|| pg.groups_of(&pid).is_empty()));
        assert!(pg.which_groups().is_empty());
    }

    #[test]
    fn test_unknown_call_answers_undefined() {
        let (pg, _processes) = single_node();
        let reply = pg
            .inbox()
            .call(Call::Unknown("which_groups_v2".to_string()), Duration::from_secs(1))
            .unwrap();
        assert_eq!(reply, Reply::Undefined);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (pg, processes) = single_node();
        pg.stop().unwrap();
        pg.stop().unwrap();

        let pid = Pid::spawn_on(pg.node_id());
        processes.spawn(pid);
        let result = pg.join("workers".to_string(), pid, None);
        assert!(matches!(result, Err(PgError::CoordinatorStopped(_))));
    }
}
