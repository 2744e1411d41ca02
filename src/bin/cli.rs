//! CLI driving an in-process worker pool

use anyhow::Context;
use clap::{Parser, Subcommand};
use distcoord::common::Config;
use distcoord::coordinator::ops::{Arity, OPERATIONS};
use distcoord::coordinator::{Key, Operand};
use distcoord::pool::Options;
use distcoord::{LocalPool, Session, Value, WorkerId, WorkerPool};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "distcoord")]
#[command(about = "Coordinate element-wise operations across a worker pool")]
#[command(version)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push an operand, apply an operation, print every worker's result
    Run {
        /// Pool size (overrides config)
        #[arg(long)]
        workers: Option<usize>,

        /// Session workers (comma-separated ids, whole pool if omitted)
        #[arg(long, value_delimiter = ',')]
        targets: Vec<u32>,

        /// Operation name, e.g. add or sqrt
        #[arg(long)]
        op: String,

        /// Operands as JSON; the first becomes a distributed handle
        #[arg(required = true)]
        operands: Vec<String>,

        /// Fail if keys are left behind at close
        #[arg(long)]
        strict: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the operation table
    Ops,

    /// Leave untracked keys on the workers and show that close reclaims them
    Leaks {
        /// Pool size (overrides config)
        #[arg(long)]
        workers: Option<usize>,

        /// Number of keys to leak
        #[arg(long, default_value = "1")]
        leaked: usize,

        /// Treat leftovers as fatal
        #[arg(long)]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("loading config")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    tracing::debug!("distcoord {}", distcoord::VERSION);

    match cli.command {
        Commands::Run {
            workers,
            targets,
            op,
            operands,
            strict,
            json,
        } => {
            if let Some(workers) = workers {
                config.pool.workers = workers;
            }
            if !targets.is_empty() {
                config.session.targets = Some(targets);
            }
            let strict = strict || config.session.strict_cleanup;

            let pool: Arc<dyn WorkerPool> = Arc::new(LocalPool::spawn(&config.pool)?);
            let mut session = Session::from_config(pool, &config.session).await?;

            let values = operands
                .iter()
                .map(|raw| {
                    serde_json::from_str::<Value>(raw)
                        .with_context(|| format!("operand {} is not valid JSON", raw))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;

            let mut values = values.into_iter();
            let mut args = Vec::new();
            if let Some(first) = values.next() {
                args.push(Operand::Handle(session.push(first).await?));
            }
            args.extend(values.map(Operand::Scalar));

            for (worker, rank) in session.rank_map().iter() {
                tracing::info!("{} has group rank {}", worker, rank);
            }
            let result = session.apply(&op, args, &Options::new()).await?;
            let pulled = session.pull(&result).await?;

            let by_worker: BTreeMap<String, Value> = session
                .worker_set()
                .iter()
                .map(WorkerId::to_string)
                .zip(pulled)
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&by_worker)?);
            } else {
                println!("{} on {} workers:", op, by_worker.len());
                for (worker, value) in &by_worker {
                    println!("  {}: {}", worker, value);
                }
            }

            let leaked = session.close(strict).await?;
            if leaked {
                println!("Leftover keys were found and purged");
            }
        }

        Commands::Ops => {
            println!("Operations:");
            for spec in OPERATIONS {
                let arity = match spec.arity {
                    Arity::Unary => "unary",
                    Arity::Binary => "binary",
                };
                println!("  {:<16} {}", spec.name, arity);
            }
        }

        Commands::Leaks {
            workers,
            leaked,
            strict,
        } => {
            if let Some(workers) = workers {
                config.pool.workers = workers;
            }
            let pool: Arc<dyn WorkerPool> = Arc::new(LocalPool::spawn(&config.pool)?);
            let session = Session::from_config(pool.clone(), &config.session).await?;

            // bypass the registry on purpose
            let batch: BTreeMap<String, Value> = (0..leaked)
                .map(|i| (Key::generate().to_string(), Value::Int(i as i64)))
                .collect();
            pool.store(&batch, session.worker_set()).await?;
            println!("Stored {} untracked keys", batch.len());

            match session.close(strict).await {
                Ok(found) => println!("Close finished, leftovers found: {}", found),
                Err(e) if e.is_fatal() => {
                    println!("Close failed: {}", e);
                    std::process::exit(2);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}
