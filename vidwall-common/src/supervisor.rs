//! The per-stream control loop.
//!
//! Each configured stream gets one [`StreamSupervisor`] task that cycles
//! through probing the source, playing it, and showing the placeholder while
//! it is down. Loops share nothing but the backend, the fallback presenter
//! and the current [`Layout`].

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::MediaBackend;
use crate::duration::format_duration;
use crate::error::{ErrorReporting, VidwallError};
use crate::fallback::FallbackPresenter;
use crate::freeze::FreezeDetector;
use crate::layout::{Assignment, Layout};
use crate::probe::Liveness;
use crate::region::Region;
use crate::session::{PlaybackSession, SessionEndReason};
use crate::stall::StallMonitor;
use crate::target::StreamTarget;

const FAILURE_REPORT_EVERY: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Probing,
    Playing(Region),
    FallbackShown,
    ShuttingDown,
}

pub struct StreamSupervisor<B> {
    target: Arc<StreamTarget>,
    backend: Arc<B>,
    presenter: Arc<FallbackPresenter<B>>,
    layout: watch::Receiver<Arc<Layout>>,
    cancel: CancellationToken,
    /// Region where this stream's placeholder is currently up.
    shown: Option<Region>,
    consecutive_failures: u32,
}

impl<B: MediaBackend> StreamSupervisor<B> {
    pub fn new(
        target: Arc<StreamTarget>,
        backend: Arc<B>,
        presenter: Arc<FallbackPresenter<B>>,
        layout: watch::Receiver<Arc<Layout>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            backend,
            presenter,
            layout,
            cancel,
            shown: None,
            consecutive_failures: 0,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until the cancellation token fires. Never returns early on error.
    pub async fn run(mut self) {
        log::info!("[{}] Supervising {}", self.target.id, self.target.display_url());

        let mut state = LoopState::Probing;
        loop {
            state = match state {
                LoopState::Probing => self.probe_step().await,
                LoopState::Playing(region) => self.play_step(region).await,
                LoopState::FallbackShown => self.fallback_step().await,
                LoopState::ShuttingDown => break,
            };
        }

        self.clear_shown().await;
        log::info!("[{}] Supervisor stopped", self.target.id);
    }

    async fn probe_step(&mut self) -> LoopState {
        if self.cancel.is_cancelled() {
            return LoopState::ShuttingDown;
        }

        let Some(assignment) = self.current_assignment() else {
            let layout = self.layout.borrow_and_update().clone();
            if let Some(conflict) = layout.conflict(&self.target.id) {
                log::warn!("[{}] {}", self.target.id, VidwallError::from(conflict).user_friendly_message());
            }
            self.clear_shown().await;
            return self.wait_for_layout_change().await;
        };
        self.relocate(assignment.region).await;

        let liveness = tokio::select! {
            () = self.cancel.cancelled() => return LoopState::ShuttingDown,
            liveness = self.backend.probe(&self.target.source_url, self.target.probe_timeout) => liveness,
        };

        match liveness {
            Liveness::Active => LoopState::Playing(assignment.region),
            Liveness::Inactive => {
                self.record_failure("source inactive");
                LoopState::FallbackShown
            }
        }
    }

    async fn play_step(&mut self, region: Region) -> LoopState {
        let id = self.target.id.clone();

        // The layout may have moved while the probe was running
        if self.current_assignment().map(|a| a.region) != Some(region) {
            return LoopState::Probing;
        }
        self.clear_shown().await;

        let mut session = match PlaybackSession::start(&*self.backend, Arc::clone(&self.target), region) {
            Ok(session) => session,
            Err(e) => {
                log::error!("[{}] {}", id, VidwallError::from(e).user_friendly_message());
                self.record_failure(&SessionEndReason::ProcessExited { code: None }.to_string());
                return LoopState::FallbackShown;
            }
        };
        self.consecutive_failures = 0;

        let handle = session.handle();
        let started_at = session.started_at();
        let detectors = self.cancel.child_token();
        let freeze = FreezeDetector::new(Arc::clone(&self.backend), handle.clone(), &self.target)
            .spawn(session.take_diagnostics(), detectors.clone());
        let stall = StallMonitor::new(handle.clone(), &self.target).spawn(detectors.clone());

        let wait = session.wait();
        tokio::pin!(wait);
        let mut shutdown_sent = false;

        let reason = loop {
            tokio::select! {
                reason = &mut wait => break reason,
                () = self.cancel.cancelled(), if !shutdown_sent => {
                    shutdown_sent = true;
                    handle.stop(SessionEndReason::ShutdownRequested);
                }
                () = layout_changed(&mut self.layout) => {
                    if self.current_assignment().map(|a| a.region) != Some(region) {
                        handle.stop(SessionEndReason::LayoutChanged);
                    }
                }
            }
        };

        detectors.cancel();
        for (name, task) in [("freeze detector", freeze), ("stall monitor", stall)] {
            if let Err(e) = task.await {
                log::error!("[{}] {} task failed: {}", id, name, e);
            }
        }

        let uptime = format_duration((Utc::now() - started_at).to_std().unwrap_or_default());
        if reason.is_failure() {
            log::warn!("[{}] Session ended after {}: {}", id, uptime, reason);
        } else {
            log::info!("[{}] Session ended after {}: {}", id, uptime, reason);
        }

        match reason {
            SessionEndReason::ShutdownRequested => LoopState::ShuttingDown,
            _ if self.cancel.is_cancelled() => LoopState::ShuttingDown,
            SessionEndReason::LayoutChanged => LoopState::Probing,
            reason => {
                if reason.is_failure() {
                    self.record_failure(&reason.to_string());
                }
                LoopState::FallbackShown
            }
        }
    }

    async fn fallback_step(&mut self) -> LoopState {
        let Some(assignment) = self.current_assignment() else {
            return LoopState::Probing;
        };
        self.relocate(assignment.region).await;

        match self.presenter.show(&assignment.placeholder, assignment.region).await {
            Ok(()) => self.shown = Some(assignment.region),
            Err(e) => log::error!("[{}] Cannot show placeholder: {}", self.target.id, e),
        }

        tokio::select! {
            () = self.cancel.cancelled() => LoopState::ShuttingDown,
            () = tokio::time::sleep(self.target.retry_delay) => LoopState::Probing,
            () = layout_changed(&mut self.layout) => LoopState::Probing,
        }
    }

    async fn wait_for_layout_change(&mut self) -> LoopState {
        tokio::select! {
            () = self.cancel.cancelled() => LoopState::ShuttingDown,
            () = layout_changed(&mut self.layout) => LoopState::Probing,
        }
    }

    fn current_assignment(&self) -> Option<Assignment> {
        self.layout.borrow().assignment(&self.target.id).cloned()
    }

    /// Takes the placeholder down if it is up anywhere other than `region`.
    async fn relocate(&mut self, region: Region) {
        if self.shown.is_some_and(|shown| shown != region) {
            self.clear_shown().await;
        }
    }

    async fn clear_shown(&mut self) {
        if let Some(region) = self.shown.take() {
            self.presenter.clear(region).await;
        }
    }

    fn record_failure(&mut self, what: &str) {
        self.consecutive_failures += 1;
        if self.consecutive_failures % FAILURE_REPORT_EVERY == 0 {
            log::warn!(
                "[{}] {} consecutive failed attempts, last: {}",
                self.target.id, self.consecutive_failures, what
            );
        } else {
            log::debug!(
                "[{}] Attempt failed ({}), retrying in {}",
                self.target.id,
                what,
                format_duration(self.target.retry_delay)
            );
        }
    }
}

/// Resolves on the next layout publication; never resolves once the sender
/// is gone.
async fn layout_changed(layout: &mut watch::Receiver<Arc<Layout>>) {
    if layout.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}
