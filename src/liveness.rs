//! Liveness monitoring: one-shot DOWN notifications for watched processes

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::types::{Down, ExitReason, MonitorRef, ProcessId};

/// Receiver of DOWN notifications
pub trait DownSink<P>: Send + Sync {
    /// Deliver a notification; must not block on the monitored process
    fn deliver(&self, down: Down<P>);
}

/// Liveness primitive of the local runtime
pub trait Liveness<P>: Send + Sync {
    /// Whether the process is running right now
    fn is_alive(&self, pid: &P) -> bool;

    /// Watch `pid`. Exactly one `Down` reaches `sink` when it exits, unless
    /// the monitor is cancelled first. Monitoring a dead process delivers
    /// `Down` with `ExitReason::NoProc` immediately.
    fn monitor(&self, pid: &P, sink: Arc<dyn DownSink<P>>) -> MonitorRef;

    /// Cancel a monitor. Returns false if it already fired or never existed.
    fn demonitor(&self, monitor: MonitorRef) -> bool;
}

struct Watch<P> {
    pid: P,
    sink: Arc<dyn DownSink<P>>,
}

struct Table<P> {
    alive: HashSet<P>,
    watches: HashMap<MonitorRef, Watch<P>>,
    by_pid: HashMap<P, HashSet<MonitorRef>>,
}

/// Process table of a single node
pub struct ProcessTable<P: ProcessId> {
    table: Mutex<Table<P>>,
}

impl<P: ProcessId> ProcessTable<P> {
    /// Create an empty table
    pub fn new() -> Self {
        ProcessTable {
            table: Mutex::new(Table {
                alive: HashSet::new(),
                watches: HashMap::new(),
                by_pid: HashMap::new(),
            }),
        }
    }

    /// Register a running process
    pub fn spawn(&self, pid: P) {
        self.table.lock().alive.insert(pid);
    }

    /// Terminate a process and fire every monitor on it. Returns how many
    /// notifications were delivered.
    pub fn exit(&self, pid: &P, reason: ExitReason) -> usize {
        let fired: Vec<(MonitorRef, Watch<P>)> = {
            let mut table = self.table.lock();
            table.alive.remove(pid);
            let refs = table.by_pid.remove(pid).unwrap_or_default();
            refs.into_iter()
                .filter_map(|monitor| table.watches.remove(&monitor).map(|watch| (monitor, watch)))
                .collect()
        };

        let count = fired.len();
        for (monitor, watch) in fired {
            trace!(pid = ?watch.pid, %monitor, %reason, "monitor fired");
            watch.sink.deliver(Down {
                pid: watch.pid,
                monitor,
                reason: reason.clone(),
            });
        }
        count
    }

    /// Number of live monitors on a process
    pub fn monitor_count(&self, pid: &P) -> usize {
        self.table
            .lock()
            .by_pid
            .get(pid)
            .map(|refs| refs.len())
            .unwrap_or(0)
    }

    /// Number of running processes
    pub fn process_count(&self) -> usize {
        self.table.lock().alive.len()
    }
}

impl<P: ProcessId> Default for ProcessTable<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ProcessId> Liveness<P> for ProcessTable<P> {
    fn is_alive(&self, pid: &P) -> bool {
        self.table.lock().alive.contains(pid)
    }

    fn monitor(&self, pid: &P, sink: Arc<dyn DownSink<P>>) -> MonitorRef {
        let monitor = MonitorRef::new();
        {
            let mut table = self.table.lock();
            if table.alive.contains(pid) {
                table.by_pid.entry(pid.clone()).or_default().insert(monitor);
                table.watches.insert(monitor, Watch { pid: pid.clone(), sink });
                return monitor;
            }
        }

        sink.deliver(Down {
            pid: pid.clone(),
            monitor,
            reason: ExitReason::NoProc,
        });
        monitor
    }

    fn demonitor(&self, monitor: MonitorRef) -> bool {
        let mut table = self.table.lock();
        let Some(watch) = table.watches.remove(&monitor) else {
            return false;
        };

        let drained = match table.by_pid.get_mut(&watch.pid) {
            Some(refs) => {
                refs.remove(&monitor);
                refs.is_empty()
            }
            None => false,
        };
        if drained {
            table.by_pid.remove(&watch.pid);
        }
        true
    }
}
