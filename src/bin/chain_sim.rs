//! Single-process simulator for the edge chain protocol.
//!
//! Every partition of one space is led locally and shares one in-memory
//! store; the loopback transport drops requests or replies at a seeded rate.
//! After the inserts the transport is healed and the resume scanner runs until
//! no staged markers remain.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use sombra_chain::chain::memory::{InMemoryTerms, LoopbackClient};
use sombra_chain::chain::{
    ChainEnv, HashRouter, InsertEdgesRequest, NewEdge, PartitionRouter, RemoteHandler,
    ResumeScanner, ScanStats,
};
use sombra_chain::storage::keys::{edge_table, staged_table};
use sombra_chain::storage::{CounterMetrics, EdgeRef, MemStore, NoIndex, Phase};
use sombra_chain::types::{EdgeType, PartitionId, PropValue, SpaceId, VertexId, VidSpec};
use sombra_chain::ChainConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SPACE: SpaceId = SpaceId(1);

#[derive(Parser, Debug)]
#[command(
    name = "chain-sim",
    version,
    about = "Simulate chained edge writes over a lossy transport",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for the report"
    )]
    format: OutputFormat,

    #[arg(long, global = true, value_name = "FILE", help = "Chain settings file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Insert edges, then resume until every marker is resolved")]
    Run(RunCmd),
}

#[derive(Args, Debug)]
struct RunCmd {
    #[arg(long, default_value_t = 100, help = "Number of edges to insert")]
    edges: u32,

    #[arg(long, default_value_t = 4, help = "Partitions in the simulated space")]
    partitions: u32,

    #[arg(long, default_value_t = 64, help = "Distinct vertex ids to draw from")]
    vertices: i64,

    #[arg(
        long,
        default_value_t = 0.2,
        help = "Probability that a forward loses its request or reply"
    )]
    rpc_failure_rate: f64,

    #[arg(long, default_value_t = 7, help = "Seed for workload and faults")]
    seed: u64,

    #[arg(long, default_value_t = 16, help = "Scanner passes before giving up")]
    max_passes: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct SimReport {
    edges: u32,
    partitions: u32,
    rpc_failure_rate: f64,
    seed: u64,
    forwards: u64,
    inserted: u64,
    rejected: u64,
    committed: u64,
    deferred: u64,
    passes: u32,
    scan: ScanStats,
    staged_left: usize,
    edge_keys: usize,
    expected_edge_keys: usize,
    converged: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let cli = Cli::parse();
    let config = ChainConfig::load_or_default(cli.config.clone())?;
    config.validate()?;

    match cli.command {
        Command::Run(cmd) => {
            if !(0.0..=1.0).contains(&cmd.rpc_failure_rate) {
                return Err("--rpc-failure-rate must be within 0..=1".into());
            }
            if cmd.partitions == 0 || cmd.vertices <= 0 {
                return Err("--partitions and --vertices must be positive".into());
            }
            let report = run(&cmd, config).await?;
            emit(&cli.format, &report, print_report_text)?;
            if !report.converged {
                return Err("simulation did not converge".into());
            }
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

async fn run(cmd: &RunCmd, config: ChainConfig) -> Result<SimReport, Box<dyn Error>> {
    let store = Arc::new(MemStore::new());
    let terms = Arc::new(InMemoryTerms::new());
    let router = Arc::new(HashRouter::new().with_space(SPACE, VidSpec::int64(), cmd.partitions));
    let parts: Vec<(SpaceId, PartitionId)> = (1..=cmd.partitions)
        .map(|p| (SPACE, PartitionId(p)))
        .collect();
    for &(space, part) in &parts {
        store.add_part(space, part);
    }
    terms.lead_all(SPACE, cmd.partitions);

    let handler = RemoteHandler::new(
        store.clone(),
        terms.clone(),
        router.clone(),
        Arc::new(NoIndex),
    );
    let client =
        Arc::new(LoopbackClient::new(handler).with_failure_rate(cmd.rpc_failure_rate, cmd.seed));
    let metrics = Arc::new(CounterMetrics::default());
    let env = ChainEnv::new(store.clone(), terms, router.clone(), client.clone())
        .with_config(config)
        .with_metrics(metrics.clone());

    let mut rng = ChaCha8Rng::seed_from_u64(cmd.seed.wrapping_add(1));
    let mut inserted = 0u64;
    let mut rejected = 0u64;
    for rank in 0..cmd.edges {
        let src = VertexId::Int(rng.gen_range(1..=cmd.vertices));
        let dst = VertexId::Int(rng.gen_range(1..=cmd.vertices));
        let part = router.partition_for_vertex(SPACE, &src)?;
        let request = InsertEdgesRequest {
            space: SPACE,
            part,
            prop_names: vec!["weight".to_string()],
            edges: vec![NewEdge {
                edge: EdgeRef::new(src, EdgeType(1), i64::from(rank), dst),
                props: vec![PropValue::Int(rng.gen_range(0..100))],
            }],
            if_not_exists: false,
        };
        match env.insert_edges(request).await {
            Ok(()) => inserted += 1,
            Err(err) => {
                rejected += 1;
                warn!(rank, error = %err, "sim.insert.failed");
            }
        }
    }
    info!(inserted, rejected, "sim.inserts.done");

    client.heal();
    let scanner = ResumeScanner::new(env);
    let mut scan = ScanStats::default();
    let mut passes = 0;
    while staged_left(&store, &parts) > 0 && passes < cmd.max_passes {
        passes += 1;
        let stats = scanner.scan_once(&parts).await;
        info!(pass = passes, ?stats, "sim.scan.pass");
        scan.merge(&stats);
    }

    let left = staged_left(&store, &parts);
    let edge_keys = parts
        .iter()
        .map(|&(space, part)| store.count_prefix(space, part, &edge_table(part)))
        .sum();
    let expected_edge_keys = 2 * inserted as usize;
    Ok(SimReport {
        edges: cmd.edges,
        partitions: cmd.partitions,
        rpc_failure_rate: cmd.rpc_failure_rate,
        seed: cmd.seed,
        forwards: client.calls(),
        inserted,
        rejected,
        committed: CounterMetrics::get(&metrics.committed),
        deferred: CounterMetrics::get(&metrics.deferred),
        passes,
        scan,
        staged_left: left,
        edge_keys,
        expected_edge_keys,
        converged: left == 0 && edge_keys == expected_edge_keys,
    })
}

fn staged_left(store: &MemStore, parts: &[(SpaceId, PartitionId)]) -> usize {
    parts
        .iter()
        .flat_map(|&(space, part)| {
            [Phase::Prime, Phase::DoublePrime]
                .map(|phase| store.count_prefix(space, part, &staged_table(phase, part)))
        })
        .sum()
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(&T),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(value),
    }
    Ok(())
}

fn print_report_text(report: &SimReport) {
    println!(
        "Workload: edges={} partitions={} rpc_failure_rate={} seed={}",
        report.edges, report.partitions, report.rpc_failure_rate, report.seed
    );
    println!(
        "Inserts: ok={} rejected={} committed={} deferred={} forwards={}",
        report.inserted, report.rejected, report.committed, report.deferred, report.forwards
    );
    println!(
        "Resume: passes={} scanned={} committed={} upgraded={} aborted={} \
         pending={} skipped={} conflicts={} errors={}",
        report.passes,
        report.scan.scanned,
        report.scan.committed,
        report.scan.upgraded,
        report.scan.aborted,
        report.scan.pending,
        report.scan.skipped,
        report.scan.conflicts,
        report.scan.errors
    );
    println!(
        "Result: staged_left={} edge_keys={}/{} converged={}",
        report.staged_left, report.edge_keys, report.expected_edge_keys, report.converged
    );
}
