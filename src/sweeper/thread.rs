use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use super::{RecoverySweeper, SweepResult};
use crate::publisher::Publisher;
use crate::store::OutboxStore;

/// Statistics from the sweeper thread.
#[derive(Debug, Default, Clone)]
pub struct SweeperStats {
    pub sweeps: usize,
    pub errors: usize,
    pub totals: SweepResult,
}

/// A background thread that runs [`RecoverySweeper::sweep_once`] every `interval`.
///
/// ```ignore
/// let sweeper = RecoverySweeper::from_config(service.clone(), &config);
/// let handle = SweeperThread::spawn(sweeper, config.sweep_interval);
///
/// // ... serve requests ...
///
/// let stats = handle.stop();
/// ```
pub struct SweeperThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<SweeperStats>>,
}

impl SweeperThread {
    pub fn spawn<S, P>(sweeper: RecoverySweeper<S, P>, interval: Duration) -> Self
    where
        S: OutboxStore + 'static,
        P: Publisher + 'static,
    {
        let (stop_tx, stop_rx) = channel::<()>();

        let handle = thread::spawn(move || {
            let mut stats = SweeperStats::default();
            info!(interval = ?interval, "Recovery sweeper started");

            loop {
                stats.sweeps += 1;
                match sweeper.sweep_once() {
                    Ok(result) => stats.totals.merge(&result),
                    Err(err) => {
                        // Store unreachable; try again next tick.
                        stats.errors += 1;
                        warn!(error = %err, "Recovery sweep failed");
                    }
                }

                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            info!(sweeps = stats.sweeps, published = stats.totals.published, "Recovery sweeper stopped");
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the sweeper to stop and wait for it to finish.
    pub fn stop(mut self) -> SweeperStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                warn!("Recovery sweeper thread panicked");
                SweeperStats::default()
            }),
            None => SweeperStats::default(),
        }
    }

    /// Signal the sweeper to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for SweeperThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
