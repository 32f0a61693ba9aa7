//! Core types for process groups: node and process identities, monitors, exit reasons

use std::fmt;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a node in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Generate a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// First eight hex digits, enough to tell nodes apart in logs
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A process handle that knows which node it runs on.
///
/// Group names, handles and metadata are otherwise opaque to the
/// coordinator; the owning node is the one thing it has to derive from a
/// handle, because every mutation for a handle is routed there.
pub trait ProcessId: Clone + Ord + Hash + Debug + fmt::Display + Send + Sync + 'static {
    /// Node the process executes on
    fn node(&self) -> NodeId;
}

/// Bounds required of group names
pub trait GroupName: Clone + Ord + Hash + Debug + Send + Sync + 'static {}

impl<T> GroupName for T where T: Clone + Ord + Hash + Debug + Send + Sync + 'static {}

/// Bounds required of per-membership metadata
pub trait GroupMeta: Clone + Debug + Send + Sync + 'static {}

impl<T> GroupMeta for T where T: Clone + Debug + Send + Sync + 'static {}

/// Process identifier - unique across the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pid {
    /// Owning node
    pub node: NodeId,
    /// Node-local serial
    pub id: u64,
}

impl Pid {
    /// Allocate a fresh PID on the given node
    pub fn spawn_on(node: NodeId) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Pid {
            node,
            id: COUNTER.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Create a PID from its parts
    pub fn from_parts(node: NodeId, id: u64) -> Self {
        Pid { node, id }
    }

    /// Get the raw serial
    pub fn raw(&self) -> u64 {
        self.id
    }
}

impl ProcessId for Pid {
    fn node(&self) -> NodeId {
        self.node
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}.{}>", self.node.short(), self.id)
    }
}

/// Monitor reference for tracking liveness subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonitorRef(pub u64);

impl MonitorRef {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        MonitorRef(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for MonitorRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MonitorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#Ref<{}>", self.0)
    }
}

/// Why a process terminated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Process returned normally
    Normal,
    /// Orderly shutdown requested by a supervisor
    Shutdown,
    /// Orderly shutdown with a detail term
    ShutdownWith(String),
    /// Process was killed unconditionally
    Killed,
    /// Process did not exist when it was monitored
    NoProc,
    /// Process crashed
    Error(String),
}

impl ExitReason {
    /// True for the normal-shutdown family, which is not worth a warning
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            ExitReason::Normal | ExitReason::Shutdown | ExitReason::ShutdownWith(_)
        )
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Shutdown => write!(f, "shutdown"),
            ExitReason::ShutdownWith(detail) => write!(f, "{{shutdown, {}}}", detail),
            ExitReason::Killed => write!(f, "killed"),
            ExitReason::NoProc => write!(f, "noproc"),
            ExitReason::Error(detail) => write!(f, "{}", detail),
        }
    }
}

/// Liveness notification: a monitored process is gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Down<P> {
    /// The process that exited
    pub pid: P,
    /// Monitor that fired
    pub monitor: MonitorRef,
    /// Exit reason
    pub reason: ExitReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_carries_owner() {
        let node = NodeId::new();
        let a = Pid::spawn_on(node);
        let b = Pid::spawn_on(node);

        assert_eq!(a.node(), node);
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn test_pid_order_groups_by_node() {
        let low = NodeId::from_bytes([0; 16]);
        let high = NodeId::from_bytes([0xff; 16]);

        let late_low = Pid::from_parts(low, 900);
        let early_high = Pid::from_parts(high, 1);
        assert!(late_low < early_high);
    }

    #[test]
    fn test_benign_exit_reasons() {
        assert!(ExitReason::Normal.is_benign());
        assert!(ExitReason::Shutdown.is_benign());
        assert!(ExitReason::ShutdownWith("app_stop".to_string()).is_benign());
        assert!(!ExitReason::Killed.is_benign());
        assert!(!ExitReason::NoProc.is_benign());
        assert!(!ExitReason::Error("badarith".to_string()).is_benign());
    }

    #[test]
    fn test_monitor_refs_are_unique() {
        assert_ne!(MonitorRef::new(), MonitorRef::new());
    }

    #[test]
    fn test_display() {
        let node = NodeId::from_bytes([0xab; 16]);
        assert_eq!(Pid::from_parts(node, 7).to_string(), "<abababab.7>");
        assert_eq!(
            ExitReason::ShutdownWith("drain".to_string()).to_string(),
            "{shutdown, drain}"
        );
    }
}
