//! JW CLI: the command-line entry point for Jobwarden.
//!
//! # Usage
//!
//! ```text
//! jw simulate --manifests etl.yaml --rounds 5
//! jw simulate --manifests etl.yaml --teardown
//! jw fingerprint dGVzdA==
//! jw check-config jw.yaml
//! jw events events.jsonl
//! ```

mod manifest;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use jobwarden_core::controller::manager::{Manager, Stores};
use jobwarden_core::events::{load_events, EventRecorder, JsonlRecorder, MemoryRecorder};
use jobwarden_core::fingerprint::fingerprint;
use jobwarden_core::reconcile::Context;
use jobwarden_core::remote::mock::MockRemote;
use jobwarden_core::settings::{self, CONFIG_ENV};
use jobwarden_core::stats::MemoryStats;
use jobwarden_core::store::memory::MemoryStore;
use jobwarden_core::store::ResourceStore;
use jobwarden_core::types::Kind;

use manifest::World;

#[derive(Debug, Parser)]
#[command(name = "jw", about = "Desired-state reconciliation for remote compute resources")]
struct Cli {
    /// Settings file (YAML). Defaults apply when absent.
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile manifests against an in-memory remote service and print
    /// the resulting status of every resource.
    Simulate {
        #[arg(long, required = true, num_args = 1..)]
        manifests: Vec<PathBuf>,
        /// Synchronous reconcile rounds to run.
        #[arg(long, default_value_t = 5)]
        rounds: usize,
        /// Delete everything afterwards and report what is left.
        #[arg(long)]
        teardown: bool,
    },
    /// Print the content fingerprint of a base64 payload.
    Fingerprint { payload: String },
    /// Validate a settings file and print the effective settings.
    CheckConfig { path: Option<PathBuf> },
    /// Print the events stored in a JSON-lines event log.
    Events { path: PathBuf },
}


fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("jw: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::Simulate {
            manifests,
            rounds,
            teardown,
        } => simulate(cli.config.as_deref(), &manifests, rounds, teardown),
        Commands::Fingerprint { payload } => {
            let hash = fingerprint(&payload);
            if hash.is_empty() {
                return Err("payload is not valid base64".into());
            }
            println!("{}", hash);
            Ok(())
        }
        Commands::CheckConfig { path } => {
            let path = path.or(cli.config);
            let settings = settings::resolve(path.as_deref()).map_err(|e| e.to_string())?;
            let yaml = serde_yaml::to_string(&settings).map_err(|e| e.to_string())?;
            print!("{}", yaml);
            Ok(())
        }
        Commands::Events { path } => {
            let events = load_events(&path).map_err(|e| e.to_string())?;
            for e in events {
                println!(
                    "{} {:?} {} {}/{} {}: {}",
                    e.timestamp_ms, e.event_type, e.kind, e.namespace, e.name, e.reason, e.message
                );
            }
            Ok(())
        }
    }
}

fn simulate(config: Option<&Path>, files: &[PathBuf], rounds: usize, teardown: bool) -> Result<(), String> {
    let settings = settings::resolve(config).map_err(|e| e.to_string())?;

    let world = World::new();
    for file in files {
        world.apply(manifest::load(file)?)?;
    }

    let events: Arc<dyn EventRecorder> = match &settings.event_log {
        Some(path) => Arc::new(JsonlRecorder::new(path.clone())),
        None => Arc::new(MemoryRecorder::new()),
    };
    let stats = Arc::new(MemoryStats::new());
    let ctx = Context {
        remote: Arc::new(MockRemote::auto_advancing()),
        events,
        stats: stats.clone(),
        secrets: world.secrets.clone(),
        settings,
    };
    let manager = Manager::new(ctx, stores(&world));

    let passes = manager.converge(rounds);
    info!(rounds, passes, "simulation converged");
    print_status(&world);

    if teardown {
        world.delete_all()?;
        let passes = manager.converge(rounds);
        info!(rounds, passes, "teardown converged");
        println!("remaining after teardown: {}", world.remaining());
    }

    for (call, counter) in stats.call_summary() {
        println!(
            "{:<28} ok={} failed={} total_ms={}",
            call, counter.success, counter.failure, counter.total_ms
        );
    }
    Ok(())
}

fn stores(world: &World) -> Stores {
    Stores {
        clusters: world.clusters.clone(),
        jobs: world.jobs.clone(),
        runs: world.runs.clone(),
        blocks: world.blocks.clone(),
        workspace_items: world.workspace_items.clone(),
        secret_scopes: world.secret_scopes.clone(),
    }
}

fn print_status(world: &World) {
    print_kind(world.clusters.as_ref());
    print_kind(world.jobs.as_ref());
    print_kind(world.runs.as_ref());
    print_kind(world.blocks.as_ref());
    print_kind(world.workspace_items.as_ref());
    print_kind(world.secret_scopes.as_ref());
}

fn print_kind<K: Kind>(store: &MemoryStore<K>) {
    let all = match store.list(None) {
        Ok(all) => all,
        Err(e) => {
            eprintln!("jw: cannot list {}: {}", K::KIND, e);
            return;
        }
    };
    for r in all {
        let id = if r.status.remote_id.is_empty() { "-" } else { r.status.remote_id.as_str() };
        let state = if r.status.remote_state.is_empty() { "-" } else { r.status.remote_state.as_str() };
        match &r.status.last_error {
            Some(err) => println!("{:<15} {:<30} {:<20} {:<12} error: {}", K::KIND, r.identity, id, state, err),
            None => println!("{:<15} {:<30} {:<20} {}", K::KIND, r.identity, id, state),
        }
    }
}
