//! Periodic background tasks
//!
//! Each task owns one thread that runs its job on a fixed tick, on demand
//! via [`PeriodicTask::trigger`], until the task is shut down or dropped.
//! A failing run is logged and the loop waits for the next tick.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use crossbeam::select;

use crate::error::Result;

/// Handle to a running periodic task
pub struct PeriodicTask {
    name: &'static str,

    /// Run-now requests, each carrying a completion sender
    trigger_tx: Sender<Sender<()>>,

    /// Dropping this disconnects the worker's shutdown channel
    shutdown_tx: Option<Sender<()>>,

    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn `job` to run every `interval`
    pub fn spawn<F>(name: &'static str, interval: Duration, mut job: F) -> Result<Self>
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        let (trigger_tx, trigger_rx) = channel::unbounded::<Sender<()>>();
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        let ticker = channel::tick(interval);

        let handle = thread::Builder::new()
            .name(format!("fragstore-{}", name))
            .spawn(move || loop {
                select! {
                    recv(shutdown_rx) -> _ => break,
                    recv(ticker) -> _ => run_once(name, &mut job),
                    recv(trigger_rx) -> request => {
                        run_once(name, &mut job);
                        if let Ok(done) = request {
                            let _ = done.send(());
                        }
                    }
                }
            })?;

        tracing::debug!(task = name, ?interval, "background task started");

        Ok(Self {
            name,
            trigger_tx,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Run the job now and wait for it to finish
    ///
    /// Returns false if the task is no longer running.
    pub fn trigger(&self) -> bool {
        let (done_tx, done_rx) = channel::bounded(1);
        if self.trigger_tx.send(done_tx).is_err() {
            return false;
        }
        done_rx.recv().is_ok()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the task and wait for its thread; a run in progress completes
    pub fn shutdown(&mut self) {
        drop(self.shutdown_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(task = self.name, "background task panicked");
            }
            tracing::debug!(task = self.name, "background task stopped");
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_once<F>(name: &'static str, job: &mut F)
where
    F: FnMut() -> Result<()>,
{
    if let Err(e) = job() {
        tracing::warn!(task = name, error = %e, "background task run failed");
    }
}
