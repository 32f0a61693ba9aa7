//! REAM PG - run an in-process cluster and watch group membership converge

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use tracing::info;

use ream_pg::telemetry::init_tracing;
use ream_pg::{ExitReason, GroupCoordinator, LocalCluster, PgConfig, Pid, ProcessTable};

type Coordinator = GroupCoordinator<String, Pid, String>;

#[derive(Parser)]
#[command(
    name = "ream-pg",
    version,
    about = "REAM PG - cluster-wide named process groups",
    long_about = "Runs several group coordinators inside one process, joins worker \
                  processes to groups, crashes some of them and prints every node's \
                  view of the groups."
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a cluster
    Simulate {
        /// Number of nodes
        #[arg(short, long, default_value = "3")]
        nodes: usize,

        /// Worker processes per node
        #[arg(short, long, default_value = "2")]
        workers: usize,

        /// Workers to crash on the first node
        #[arg(long, default_value = "1")]
        crash: usize,
    },
}

struct SimNode {
    coordinator: Coordinator,
    processes: Arc<ProcessTable<Pid>>,
    workers: Vec<Pid>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PgConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PgConfig::default(),
    };

    let filter = if cli.debug { "ream_pg=debug" } else { config.log_filter.as_str() };
    init_tracing(filter)?;

    match cli.command {
        Commands::Simulate { nodes, workers, crash } => simulate(config, nodes, workers, crash),
    }
}

fn simulate(config: PgConfig, nodes: usize, workers: usize, crash: usize) -> anyhow::Result<()> {
    anyhow::ensure!(nodes > 0, "need at least one node");
    anyhow::ensure!(crash <= workers, "cannot crash more workers than a node runs");

    let cluster: Arc<LocalCluster<String, Pid, String>> = Arc::new(LocalCluster::new());
    let mut sim = Vec::with_capacity(nodes);

    for index in 0..nodes {
        let mut node_config = config.clone();
        if index > 0 {
            node_config.node_id = None;
        }
        let processes = Arc::new(ProcessTable::new());
        let coordinator = Coordinator::start(node_config, processes.clone(), cluster.clone())?;
        info!(node = %coordinator.node_id(), index, "node started");
        sim.push(SimNode { coordinator, processes, workers: Vec::new() });
    }

    let workers_group = "workers".to_string();
    for (index, node) in sim.iter_mut().enumerate() {
        for slot in 0..workers {
            let pid = Pid::spawn_on(node.coordinator.node_id());
            node.processes.spawn(pid);
            node.coordinator
                .join(workers_group.clone(), pid, Some(format!("node-{}/worker-{}", index, slot)))?;
            node.coordinator.join(format!("node-{}", index), pid, None)?;
            node.workers.push(pid);
        }
    }

    let expected = nodes * workers;
    converge(&sim, &workers_group, expected);
    print_views("after join", &sim);

    let first = &sim[0];
    for pid in first.workers.iter().take(crash) {
        first.processes.exit(pid, ExitReason::Error("simulated crash".to_string()));
    }
    converge(&sim, &workers_group, expected - crash);
    print_views("after crash", &sim);

    println!(
        "{} {} broadcasts, {} casts delivered",
        "cluster:".bold(),
        cluster.broadcast_count(),
        cluster.delivered_count()
    );

    for node in &sim {
        node.coordinator.stop()?;
    }
    Ok(())
}

/// Wait until every node sees `expected` members, or give up after two seconds
fn converge(sim: &[SimNode], group: &String, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if sim.iter().all(|node| node.coordinator.get_members(group).len() == expected) {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    println!("{}", "warning: replicas did not converge within 2s".yellow());
}

fn print_views(title: &str, sim: &[SimNode]) {
    println!("{}", format!("== {} ==", title).bold().green());
    for node in sim {
        let pg = &node.coordinator;
        println!("{} {}", "node".bold(), pg.node_id().short().cyan());
        for group in pg.which_groups() {
            let members: Vec<String> = pg
                .get_members_with_meta(&group)
                .into_iter()
                .map(|(pid, meta)| match meta {
                    Some(meta) => format!("{}({})", pid, meta),
                    None => pid.to_string(),
                })
                .collect();
            println!("  {:<10} {}", group, members.join(" "));
        }
    }
}
