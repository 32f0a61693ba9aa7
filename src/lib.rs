//! # REAM PG: cluster-wide named process groups
//!
//! Tracks which processes belong to which named group across a cluster of
//! REAM nodes, with optional metadata per membership. Each node runs a
//! [`GroupCoordinator`] that owns every mutation for the processes running
//! on it, watches those processes, and broadcasts changes so that every node
//! can answer membership queries from its own replica.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ream_pg::{GroupCoordinator, LocalCluster, PgConfig, Pid, ProcessTable};
//!
//! let cluster: Arc<LocalCluster<String, Pid, String>> = Arc::new(LocalCluster::new());
//! let processes: Arc<ProcessTable<Pid>> = Arc::new(ProcessTable::new());
//! let pg = GroupCoordinator::start(PgConfig::default(), processes.clone(), cluster).unwrap();
//!
//! let worker = Pid::spawn_on(pg.node_id());
//! processes.spawn(worker);
//! pg.join("workers".to_string(), worker, Some("shard-1".to_string())).unwrap();
//! assert_eq!(pg.get_members(&"workers".to_string()), vec![worker]);
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod liveness;
pub mod store;
pub mod telemetry;
pub mod transport;
pub mod types;

pub use config::PgConfig;
pub use coordinator::{GroupCoordinator, Inbox};
pub use error::{PgError, PgResult};
pub use liveness::{DownSink, Liveness, ProcessTable};
pub use store::{MemoryStore, Membership, MembershipStore};
pub use transport::{Call, Cast, LocalCluster, NodeEvent, Reply, Transport};
pub use types::{Down, ExitReason, GroupMeta, GroupName, MonitorRef, NodeId, Pid, ProcessId};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
