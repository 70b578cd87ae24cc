//! Worker lifecycle: start, run loop, heartbeat, pause, shutdown.
//!
//! States: Initialized → Running ⇄ Paused → Stopping → Stopped. Paused is
//! advisory: a paused worker still heartbeats and consumes tick signals but
//! skips the pipeline body.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{HEARTBEAT_INTERVAL, PASS_INTERVAL, SHUTDOWN_DRAIN};
use crate::domains::control::WorkerStatusRow;

use super::error::WorkerError;
use super::{lock_ignore_poison, Worker};

impl Worker {
    /// Enter the Running state and drive the main loop until cancellation.
    ///
    /// Fails with `AlreadyRunning` if entered twice. The heartbeat publisher
    /// runs on an independent task for the loop's lifetime so a long pass
    /// never stalls it.
    pub async fn start(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), WorkerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyRunning);
        }

        info!(instance = %self.instance, "worker starting");

        // Pick up a pause flag persisted by a previous incarnation.
        match self.deps.control.instance_paused(&self.instance).await {
            Ok(paused) => self.paused.store(paused, Ordering::SeqCst),
            Err(e) => warn!(error = %e, "could not read persisted pause flag"),
        }

        self.set_activity("Started");
        self.write_status_row().await;

        let heartbeat = tokio::spawn(Self::heartbeat_loop(
            self.clone(),
            shutdown.clone(),
            self.cancel.clone(),
        ));

        self.run_loop(&shutdown).await;

        self.running.store(false, Ordering::SeqCst);
        self.set_activity("Stopped");
        self.write_status_row().await;

        heartbeat.abort();
        let _ = heartbeat.await;

        info!(instance = %self.instance, "worker stopped");
        Ok(())
    }

    async fn run_loop(&self, shutdown: &CancellationToken) {
        let Some(mut manual_rx) = lock_ignore_poison(&self.manual_rx).take() else {
            warn!("run loop already consumed, refusing to start again");
            return;
        };

        let mut ticker = tokio::time::interval(PASS_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_pass(shutdown).await;
                }
                Some(()) = manual_rx.recv() => {
                    debug!("manual trigger received");
                    self.run_pass(shutdown).await;
                }
            }
        }
    }

    async fn heartbeat_loop(
        worker: Arc<Worker>,
        shutdown: CancellationToken,
        internal: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        interval.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = internal.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = worker
                        .deps
                        .control
                        .heartbeat(&worker.instance, Utc::now())
                        .await
                    {
                        warn!(error = %e, "heartbeat update failed");
                    }
                }
            }
        }
    }

    /// Cancel the internal token, wait for the current pass to drain, clear
    /// transient state, and write a final status row.
    pub async fn shutdown(&self) {
        info!(instance = %self.instance, "worker shutting down");
        self.cancel.cancel();

        // Bounded drain; after this transient state is cleared regardless.
        tokio::time::sleep(SHUTDOWN_DRAIN).await;

        self.failures.clear();
        self.activity.clear();
        self.running.store(false, Ordering::SeqCst);
        self.set_activity("Stopped");
        self.write_status_row().await;
    }

    /// Best-effort request for one extra pass. A no-op when one is already
    /// pending; never blocks.
    pub fn trigger_manual_run(&self) {
        if self.manual_tx.try_send(()).is_err() {
            debug!("manual run already pending, ignoring trigger");
        }
    }

    /// Persist and mirror the instance pause flag.
    pub async fn pause(&self) -> Result<()> {
        self.deps
            .control
            .set_instance_paused(&self.instance, true)
            .await?;
        self.paused.store(true, Ordering::SeqCst);
        self.set_activity("Paused");
        self.write_status_row().await;
        info!(instance = %self.instance, "worker paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        self.deps
            .control
            .set_instance_paused(&self.instance, false)
            .await?;
        self.paused.store(false, Ordering::SeqCst);
        self.set_activity("Resumed");
        self.write_status_row().await;
        info!(instance = %self.instance, "worker resumed");
        Ok(())
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Write the full status row for this instance; failures are logged and
    /// swallowed so status reporting never takes a pass down.
    pub(crate) async fn write_status_row(&self) {
        let row = WorkerStatusRow {
            last_heartbeat: Some(Utc::now()),
            ..self.get_status()
        };
        if let Err(e) = self.deps.control.upsert_status(&row).await {
            error!(error = %e, "failed to write worker status row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmailSettings, WorkerSettings};
    use crate::kernel::test_dependencies::TestDeps;

    fn quick_settings() -> WorkerSettings {
        WorkerSettings {
            instance: "worker-test".into(),
            ..WorkerSettings::default()
        }
    }

    #[tokio::test]
    async fn second_start_fails_with_already_running() {
        let mocks = TestDeps::default();
        let worker = Arc::new(Worker::new(
            quick_settings(),
            EmailSettings::default(),
            mocks.deps(),
        ));

        let token = CancellationToken::new();
        let first = tokio::spawn(worker.clone().start(token.clone()));

        // Give the first start a moment to claim the running flag.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let second = worker.clone().start(token.clone()).await;
        assert!(matches!(second, Err(WorkerError::AlreadyRunning)));

        token.cancel();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn manual_trigger_is_nonblocking_and_coalesces() {
        let mocks = TestDeps::default();
        let worker = Worker::new(quick_settings(), EmailSettings::default(), mocks.deps());

        // Nothing is draining the channel; the second and third triggers
        // must still return immediately.
        worker.trigger_manual_run();
        worker.trigger_manual_run();
        worker.trigger_manual_run();
    }

    #[tokio::test]
    async fn start_writes_initial_status_and_stop_writes_final() {
        let mocks = TestDeps::default();
        let worker = Arc::new(Worker::new(
            quick_settings(),
            EmailSettings::default(),
            mocks.deps(),
        ));

        let token = CancellationToken::new();
        let handle = tokio::spawn(worker.clone().start(token.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let first = mocks.control.statuses.lock().unwrap().first().cloned();
        let first = first.expect("initial status row written");
        assert!(first.is_running);
        assert_eq!(first.worker_instance, "worker-test");

        token.cancel();
        handle.await.unwrap().unwrap();

        let last = mocks.control.latest_status().unwrap();
        assert!(!last.is_running);
        assert_eq!(last.current_activity, "Stopped");
    }

    #[tokio::test]
    async fn pause_persists_flag_and_resume_clears_it() {
        let mocks = TestDeps::default();
        let worker = Worker::new(quick_settings(), EmailSettings::default(), mocks.deps());

        worker.pause().await.unwrap();
        assert!(worker.is_paused());
        assert!(*mocks.control.instance_paused.lock().unwrap());

        worker.resume().await.unwrap();
        assert!(!worker.is_paused());
        assert!(!*mocks.control.instance_paused.lock().unwrap());
    }

    #[tokio::test]
    async fn shutdown_clears_failure_memory_and_activity() {
        let mocks = TestDeps::default();
        let worker = Worker::new(quick_settings(), EmailSettings::default(), mocks.deps());

        worker
            .failures
            .record_failure_at(uuid::Uuid::new_v4(), Utc::now());
        worker
            .activity
            .record(super::super::ActivityLevel::Info, "note", None, None);

        worker.shutdown().await;

        assert!(worker.failures.is_empty());
        assert_eq!(worker.activity.len(), 0);
        let last = mocks.control.latest_status().unwrap();
        assert!(!last.is_running);
    }
}
