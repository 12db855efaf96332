use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use offline_sync::config;
use offline_sync::connectivity::{ConnectivityMonitor, ConnectivityState};
use offline_sync::db;
use offline_sync::executor::MutationExecutor;
use offline_sync::gateway::{MutationGateway, Outcome};
use offline_sync::model::Operation;
use offline_sync::remote::RestClient;
use offline_sync::sync::{PassOutcome, SyncEvent, SyncOrchestrator};

#[derive(Debug, Parser)]
#[command(author, version, about = "Offline-first mutation queue and sync engine")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit one write; with --offline it is queued instead of executed
    Submit {
        #[arg(long)]
        resource: String,
        /// create, update or delete
        #[arg(long)]
        op: Operation,
        /// JSON payload
        #[arg(long)]
        payload: String,
        #[arg(long)]
        offline: bool,
    },
    /// Print the queue in replay order, one JSON record per line
    List,
    /// Run one replay pass and print the result
    Sync,
    /// Remove one queued mutation
    Remove { id: String },
    /// Drop every queued mutation
    Clear,
    /// Follow reachability events from stdin: online, offline, sync, status,
    /// `submit <resource> <op> <json>`, quit
    Watch {
        /// Start in the offline state
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let remote = Arc::new(RestClient::from_config(&cfg)?);
    let executor = MutationExecutor::new(remote, cfg.remote.key_field.clone());

    match args.command {
        Command::Submit {
            resource,
            op,
            payload,
            offline,
        } => {
            let payload: Value = serde_json::from_str(&payload).context("--payload is not JSON")?;
            let monitor = Arc::new(ConnectivityMonitor::new(ConnectivityState::from_online(
                !offline,
            )));
            let gateway = MutationGateway::new(pool, monitor, executor);
            let outcome = gateway.submit(resource, op, payload).await?;
            println!("{}", outcome_json(&outcome));
        }
        Command::List => {
            for record in db::list_mutations(&pool).await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Command::Sync => {
            let orchestrator = SyncOrchestrator::new(pool, executor);
            print_pass(&orchestrator.run_pass().await);
        }
        Command::Remove { id } => {
            if db::remove_mutation(&pool, &id).await? {
                info!(%id, "mutation removed");
            } else {
                info!(%id, "no such mutation");
            }
        }
        Command::Clear => {
            let removed = db::clear_mutations(&pool).await?;
            warn!(removed, "mutation queue cleared");
        }
        Command::Watch { offline } => {
            watch(pool, executor, ConnectivityState::from_online(!offline), cfg.sync.on_startup)
                .await?;
        }
    }

    Ok(())
}

async fn watch(
    pool: db::Pool,
    executor: MutationExecutor,
    initial: ConnectivityState,
    sync_on_startup: bool,
) -> Result<()> {
    let monitor = Arc::new(ConnectivityMonitor::new(initial));
    let orchestrator = Arc::new(SyncOrchestrator::new(pool.clone(), executor.clone()));
    let gateway = MutationGateway::new(pool.clone(), monitor.clone(), executor);
    orchestrator.attach(&monitor);

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SyncEvent::NothingToDo) => info!("sync: nothing to do"),
                Ok(SyncEvent::Completed { succeeded, failed }) => {
                    info!(succeeded, failed, "sync complete")
                }
                Ok(SyncEvent::Aborted { error }) => error!(%error, "sync aborted"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "sync events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if sync_on_startup {
        orchestrator.start(&monitor).await;
    }

    info!(state = %monitor.current_state(), "watching stdin for reachability events");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(' ').map_or(line, |(cmd, _)| cmd) {
            "" => {}
            "online" => {
                monitor.report(ConnectivityState::Online);
            }
            "offline" => {
                monitor.report(ConnectivityState::Offline);
            }
            "sync" => {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    orchestrator.run_pass().await;
                });
            }
            "status" => {
                let pending = db::count_mutations(&pool).await?;
                println!(
                    "{}",
                    json!({
                        "connectivity": monitor.current_state(),
                        "syncing": orchestrator.is_syncing(),
                        "queued": pending,
                    })
                );
            }
            "submit" => match parse_submit(line) {
                Ok((resource, op, payload)) => match gateway.submit(resource, op, payload).await {
                    Ok(outcome) => println!("{}", outcome_json(&outcome)),
                    Err(err) if err.is_storage() => return Err(err.into_inner()),
                    Err(err) => error!(%err, "write rejected"),
                },
                Err(err) => warn!("{:#}", err),
            },
            "quit" | "exit" => break,
            other => warn!(command = other, "unknown command"),
        }
    }
    Ok(())
}

fn parse_submit(line: &str) -> Result<(String, Operation, Value)> {
    let mut parts = line.splitn(4, ' ').skip(1);
    let (Some(resource), Some(op), Some(payload)) = (parts.next(), parts.next(), parts.next())
    else {
        anyhow::bail!("usage: submit <resource> <create|update|delete> <json>");
    };
    let op: Operation = op.parse().map_err(anyhow::Error::msg)?;
    let payload = serde_json::from_str(payload).context("payload is not JSON")?;
    Ok((resource.to_string(), op, payload))
}

fn outcome_json(outcome: &Outcome) -> Value {
    match outcome {
        Outcome::Executed(row) => json!({ "executed": row }),
        Outcome::Queued(record) => json!({ "queued": record }),
    }
}

fn print_pass(outcome: &PassOutcome) {
    let out = match outcome {
        PassOutcome::Skipped => json!({ "skipped": true }),
        PassOutcome::NothingToDo => json!({ "nothing_to_do": true }),
        PassOutcome::Completed(report) => json!({ "completed": report }),
        PassOutcome::Aborted(error) => json!({ "aborted": error }),
    };
    println!("{out}");
}
