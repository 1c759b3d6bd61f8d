//! Iteration driver: calls `iterate` on a timer for the lifetime of a handle.
//!
//! One tokio task per running driver. Each iterate runs on a blocking worker
//! and is awaited before the next tick; missed ticks are skipped, so calls
//! never overlap. `stop` takes effect before the next tick.

use std::sync::atomic::Ordering;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::handle::EngineHandle;

/// Period used when `start` is given no interval.
pub const DEFAULT_ITERATION_INTERVAL: Duration = Duration::from_millis(40);

/// Shortest period the driver runs at; shorter requests are raised to it.
const MIN_INTERVAL: Duration = Duration::from_millis(1);
/// Upper bound on engine-recommended intervals in adaptive mode.
const MAX_ADAPTIVE_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationMode {
    /// Fixed period.
    #[default]
    Fixed,
    /// Sleep for whatever `iteration_interval` reports after each iterate.
    Adaptive,
}

pub struct IterationDriver<E: Engine> {
    handle: EngineHandle<E>,
    mode: IterationMode,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl<E: Engine> IterationDriver<E> {
    pub fn new(handle: &EngineHandle<E>) -> Self {
        Self::with_mode(handle, IterationMode::Fixed)
    }

    pub fn with_mode(handle: &EngineHandle<E>, mode: IterationMode) -> Self {
        Self {
            handle: handle.share(),
            mode,
            stop: Mutex::new(None),
        }
    }

    /// Start iterating. No-op if a driver is already running on this handle.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, interval: Option<Duration>) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;
        if self.handle.is_closed() {
            return Err(Error::UseAfterClose);
        }
        if self
            .handle
            .running_flag()
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("iteration driver already running");
            return Ok(());
        }
        let period = interval
            .unwrap_or(DEFAULT_ITERATION_INTERVAL)
            .max(MIN_INTERVAL);
        let (tx, rx) = oneshot::channel();
        *self.stop.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        runtime.spawn(run(self.handle.share(), self.mode, period, rx));
        info!(mode = ?self.mode, ?period, "iteration driver started");
        Ok(())
    }

    /// Cancel the recurring iterate. No-op if this driver is not running.
    pub fn stop(&self) {
        let Some(tx) = self
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        let _ = tx.send(());
        self.handle.running_flag().store(false, Ordering::Release);
        info!("iteration driver stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }
}

impl<E: Engine> Drop for IterationDriver<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run<E: Engine>(
    handle: EngineHandle<E>,
    mode: IterationMode,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = match mode {
        IterationMode::Fixed => {
            let mut t = tokio::time::interval(period);
            t.set_missed_tick_behavior(MissedTickBehavior::Skip);
            Some(t)
        }
        IterationMode::Adaptive => None,
    };
    let mut next = period;
    loop {
        let wait = async {
            match ticker.as_mut() {
                Some(t) => {
                    t.tick().await;
                }
                None => tokio::time::sleep(next).await,
            }
        };
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = wait => {}
        }

        let h = handle.share();
        let step = tokio::task::spawn_blocking(move || {
            h.iterate()?;
            match mode {
                IterationMode::Fixed => Ok(None),
                IterationMode::Adaptive => h.iteration_interval().map(Some),
            }
        })
        .await;
        match step {
            Ok(Ok(Some(ms))) => {
                next = Duration::from_millis(u64::from(ms))
                    .clamp(MIN_INTERVAL, MAX_ADAPTIVE_INTERVAL);
            }
            Ok(Ok(None)) => {}
            Ok(Err(Error::UseAfterClose)) => {
                info!("engine destroyed; iteration driver exiting");
                handle.running_flag().store(false, Ordering::Release);
                break;
            }
            Ok(Err(e)) => warn!(error = %e, "iterate failed"),
            Err(e) => warn!(error = %e, "iterate worker failed"),
        }
    }
    debug!("iteration loop finished");
}
