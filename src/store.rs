//! Membership table: one entry per (group, process) pair, indexed both ways

use std::collections::{BTreeMap, BTreeSet};

use dashmap::DashMap;

use crate::types::{GroupMeta, GroupName, MonitorRef, NodeId, ProcessId};

/// A single group membership
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership<G, P, M> {
    /// Group name
    pub group: G,
    /// Member process
    pub pid: P,
    /// Metadata attached to this membership only
    pub meta: Option<M>,
    /// Liveness subscription; set only on the node owning `pid`
    pub monitor: Option<MonitorRef>,
}

impl<G, P: ProcessId, M> Membership<G, P, M> {
    /// Entry as written by the owning node
    pub fn owned(group: G, pid: P, meta: Option<M>, monitor: MonitorRef) -> Self {
        Membership { group, pid, meta, monitor: Some(monitor) }
    }

    /// Entry as applied from a peer's broadcast
    pub fn replica(group: G, pid: P, meta: Option<M>) -> Self {
        Membership { group, pid, meta, monitor: None }
    }

    /// Node that owns the member process
    pub fn owner(&self) -> NodeId {
        self.pid.node()
    }
}

/// Local, unsynchronized-across-nodes storage for memberships.
///
/// Implementations are shared between the coordinator thread (the only
/// writer) and query callers, hence `Send + Sync`. None of these calls may
/// talk to another node.
pub trait MembershipStore<G, P, M>: Send + Sync {
    /// Insert or overwrite the entry for `(entry.group, entry.pid)`
    fn write(&self, entry: Membership<G, P, M>);

    /// Remove an entry, returning it if it existed
    fn delete(&self, group: &G, pid: &P) -> Option<Membership<G, P, M>>;

    /// All entries of a group, sorted by pid
    fn read_by_group(&self, group: &G) -> Vec<Membership<G, P, M>>;

    /// All entries of a process, sorted by group
    fn read_by_handle(&self, pid: &P) -> Vec<Membership<G, P, M>>;

    /// Exact lookup
    fn read_exact(&self, group: &G, pid: &P) -> Option<Membership<G, P, M>>;

    /// Groups with at least one member, sorted
    fn groups(&self) -> Vec<G>;
}

/// In-memory store backed by two concurrent maps
pub struct MemoryStore<G, P, M>
where
    G: GroupName,
    P: ProcessId,
    M: GroupMeta,
{
    /// Primary table: group -> pid -> entry
    by_group: DashMap<G, BTreeMap<P, Membership<G, P, M>>>,
    /// Secondary index: pid -> groups
    by_handle: DashMap<P, BTreeSet<G>>,
}

impl<G, P, M> MemoryStore<G, P, M>
where
    G: GroupName,
    P: ProcessId,
    M: GroupMeta,
{
    /// Create an empty store
    pub fn new() -> Self {
        MemoryStore {
            by_group: DashMap::new(),
            by_handle: DashMap::new(),
        }
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.by_group.iter().map(|members| members.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_group.is_empty()
    }
}

impl<G, P, M> Default for MemoryStore<G, P, M>
where
    G: GroupName,
    P: ProcessId,
    M: GroupMeta,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<G, P, M> MembershipStore<G, P, M> for MemoryStore<G, P, M>
where
    G: GroupName,
    P: ProcessId,
    M: GroupMeta,
{
    fn write(&self, entry: Membership<G, P, M>) {
        self.by_handle
            .entry(entry.pid.clone())
            .or_default()
            .insert(entry.group.clone());
        self.by_group
            .entry(entry.group.clone())
            .or_default()
            .insert(entry.pid.clone(), entry);
    }

    fn delete(&self, group: &G, pid: &P) -> Option<Membership<G, P, M>> {
        let removed = self
            .by_group
            .get_mut(group)
            .and_then(|mut members| members.remove(pid));
        self.by_group.remove_if(group, |_, members| members.is_empty());

        if let Some(mut groups) = self.by_handle.get_mut(pid) {
            groups.remove(group);
        }
        self.by_handle.remove_if(pid, |_, groups| groups.is_empty());

        removed
    }

    fn read_by_group(&self, group: &G) -> Vec<Membership<G, P, M>> {
        self.by_group
            .get(group)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    fn read_by_handle(&self, pid: &P) -> Vec<Membership<G, P, M>> {
        let groups: Vec<G> = match self.by_handle.get(pid) {
            Some(groups) => groups.iter().cloned().collect(),
            None => return Vec::new(),
        };

        groups
            .iter()
            .filter_map(|group| self.read_exact(group, pid))
            .collect()
    }

    fn read_exact(&self, group: &G, pid: &P) -> Option<Membership<G, P, M>> {
        self.by_group
            .get(group)
            .and_then(|members| members.get(pid).cloned())
    }

    fn groups(&self) -> Vec<G> {
        let mut groups: Vec<G> = self.by_group.iter().map(|entry| entry.key().clone()).collect();
        groups.sort();
        groups
    }
}
