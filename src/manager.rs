use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::QaDb;

#[derive(Debug, Clone)]
pub struct SystemProfile {
    pub logical_cores: usize,
    pub worker_threads: usize,
    pub strict_durability: bool, // true = fsync, false = OS buffer (faster)
}

impl SystemProfile {
    pub fn detect() -> Self {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

        // Single core: one compute + one I/O worker, skip fsync
        if cores <= 1 {
            warn!(cores, "CPU constraint detected, disabling fsync on the record log");
            Self {
                logical_cores: cores,
                worker_threads: 2,
                strict_durability: false,
            }
        } else {
            Self {
                logical_cores: cores,
                worker_threads: cores,
                strict_durability: true,
            }
        }
    }
}

/// Starts the background snapshot thread. Every `interval` it exports the
/// JSON snapshot into the configured snapshot directory.
pub fn start_snapshot_thread(db: Arc<QaDb>, interval: Duration) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        info!(interval_secs = interval.as_secs(), "background snapshot thread started");
        loop {
            thread::sleep(interval);

            let dir = db.config().snapshot_dir();
            if let Err(e) = db.export_snapshot(&dir) {
                warn!("snapshot failed: {}", e);
            }
        }
    })
}
