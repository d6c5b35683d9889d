use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use qalink::config::EngineConfig;
use qalink::eval;
use qalink::manager::{self, SystemProfile};
use qalink::server::QaServer;
use qalink::QaDb;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(long, default_value = "127.0.0.1:9100")]
    addr: String,

    /// JSON engine configuration; unset fields keep their defaults.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Overrides `data_dir` from the configuration.
    #[clap(long)]
    data_dir: Option<PathBuf>,

    /// Run a precision/recall evaluation over a pre-embedded dataset and exit.
    #[clap(long)]
    eval: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,qalink=info")))
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("failed to load config {}: {}", path.display(), e);
                std::process::exit(2);
            }
        },
        None => EngineConfig::default(),
    };
    if let Some(dir) = args.data_dir.clone() {
        config.data_dir = dir;
    }

    if let Some(dataset) = &args.eval {
        match eval::load_dataset(dataset).and_then(|data| eval::evaluate(config.store, &data)) {
            Ok(report) => {
                println!("Evaluation results:");
                println!("Precision: {:.3}", report.precision);
                println!("Recall:    {:.3}", report.recall);
                println!("F1-score:  {:.3}", report.f1);
                println!("TP={}, FP={}, FN={}", report.true_positives, report.false_positives, report.false_negatives);
            }
            Err(e) => {
                error!("evaluation failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let profile = SystemProfile::detect();
    if !profile.strict_durability {
        config.strict_durability = false;
    }
    info!(
        cores = profile.logical_cores,
        workers = profile.worker_threads,
        fsync = config.strict_durability,
        "resource profile"
    );

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(profile.worker_threads)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async_main(args, config));
}

async fn async_main(args: Args, config: EngineConfig) {
    info!(data_dir = %config.data_dir.display(), "initializing record store");
    let snapshot_interval = config.snapshot_interval_secs;
    let db = match QaDb::open(config) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    if snapshot_interval > 0 {
        manager::start_snapshot_thread(db.clone(), Duration::from_secs(snapshot_interval));
    }

    let server = QaServer::new(db.clone());
    let addr = args.addr.clone();
    tokio::spawn(async move {
        if let Err(e) = server.run(&addr).await {
            error!("server stopped: {}", e);
            std::process::exit(1);
        }
    });
    info!("node is ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
    }

    let dir = db.config().snapshot_dir();
    if let Err(e) = db.export_snapshot(&dir) {
        error!("final snapshot failed: {}", e);
    }
    info!("shutting down");
}
