//! One playback attempt: a single player process bound to one stream and one
//! region, ended exactly once.
//!
//! Termination is a claim on the end reason. Whoever records the first
//! [`SessionEndReason`] (a detector, the supervisor loop, or the natural exit
//! observed by [`PlaybackSession::wait`]) wins; every later claim is a no-op.
//! The winning `stop` is also the only place the player is signalled.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rustix::process::{Pid, Signal};
use tokio::process::{Child, ChildStderr};
use tokio_util::sync::CancellationToken;

use crate::backend::MediaBackend;
use crate::duration::format_duration;
use crate::error::ProcessError;
use crate::region::Region;
use crate::target::StreamTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// The player exited on its own, or failed to start (`code: None`).
    ProcessExited { code: Option<i32> },
    FreezeDetected,
    StallDetected,
    SourceInactive,
    /// The stream's region moved or disappeared.
    LayoutChanged,
    ShutdownRequested,
}

impl SessionEndReason {
    /// Ends that point at a broken feed or player rather than a clean stop.
    pub fn is_failure(&self) -> bool {
        match self {
            SessionEndReason::ProcessExited { code } => *code != Some(0),
            SessionEndReason::FreezeDetected
            | SessionEndReason::StallDetected
            | SessionEndReason::SourceInactive => true,
            SessionEndReason::LayoutChanged | SessionEndReason::ShutdownRequested => false,
        }
    }
}

impl fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEndReason::ProcessExited { code: Some(code) } => write!(f, "player exited with code {}", code),
            SessionEndReason::ProcessExited { code: None } => write!(f, "player exited"),
            SessionEndReason::FreezeDetected => write!(f, "freeze detected"),
            SessionEndReason::StallDetected => write!(f, "player stalled"),
            SessionEndReason::SourceInactive => write!(f, "source went inactive"),
            SessionEndReason::LayoutChanged => write!(f, "layout changed"),
            SessionEndReason::ShutdownRequested => write!(f, "shutdown requested"),
        }
    }
}

#[derive(Debug, Default)]
struct Termination {
    reason: Option<SessionEndReason>,
    reaped: bool,
}

#[derive(Debug)]
struct Shared {
    stream_id: String,
    pid: Option<u32>,
    termination: Mutex<Termination>,
    stop_requested: CancellationToken,
    ended: CancellationToken,
}

/// Shared, non-owning view of a session handed to the health detectors.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub fn stream_id(&self) -> &str {
        &self.shared.stream_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.pid
    }

    /// Records `reason` and signals the player to terminate, unless a reason
    /// was already recorded. Returns whether this call won.
    pub fn stop(&self, reason: SessionEndReason) -> bool {
        let mut termination = self.lock();
        if let Some(existing) = termination.reason {
            log::debug!(
                "[{}] session already ending ({}), ignoring {}",
                self.shared.stream_id, existing, reason
            );
            return false;
        }
        termination.reason = Some(reason);

        if !termination.reaped {
            if let Some(pid) = self.shared.pid {
                if let Err(e) = signal(pid, Signal::Term) {
                    log::warn!("[{}] {}", self.shared.stream_id, e);
                }
            }
        }
        drop(termination);

        self.shared.stop_requested.cancel();
        true
    }

    pub fn end_reason(&self) -> Option<SessionEndReason> {
        self.lock().reason
    }

    pub fn is_ended(&self) -> bool {
        self.shared.ended.is_cancelled()
    }

    /// Resolves once the player has been reaped.
    pub async fn ended(&self) {
        self.shared.ended.cancelled().await;
    }

    fn lock(&self) -> MutexGuard<'_, Termination> {
        self.shared
            .termination
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct PlaybackSession {
    target: Arc<StreamTarget>,
    started_at: DateTime<Utc>,
    child: Child,
    diagnostics: Option<ChildStderr>,
    handle: SessionHandle,
}

impl PlaybackSession {
    pub fn start<B: MediaBackend>(
        backend: &B,
        target: Arc<StreamTarget>,
        region: Region,
    ) -> Result<Self, ProcessError> {
        let mut child = backend.spawn_player(&target, &region)?;
        let diagnostics = child.stderr.take();
        let pid = child.id();

        log::info!(
            "[{}] Playing {} at {} (pid {})",
            target.id,
            target.display_url(),
            region,
            pid.map_or_else(|| "?".to_string(), |p| p.to_string())
        );

        let handle = SessionHandle {
            shared: Arc::new(Shared {
                stream_id: target.id.clone(),
                pid,
                termination: Mutex::new(Termination::default()),
                stop_requested: CancellationToken::new(),
                ended: CancellationToken::new(),
            }),
        };

        Ok(Self {
            target,
            started_at: Utc::now(),
            child,
            diagnostics,
            handle,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The player's stderr, for the freeze detector. Available once.
    pub fn take_diagnostics(&mut self) -> Option<ChildStderr> {
        self.diagnostics.take()
    }

    /// Blocks until the player is gone and returns the recorded end reason,
    /// `ProcessExited` unless something else claimed the session first.
    ///
    /// After a stop request the player gets `kill_grace` to exit before it
    /// is killed.
    pub async fn wait(mut self) -> SessionEndReason {
        let stream_id = self.target.id.clone();

        let status = tokio::select! {
            status = self.child.wait() => status,
            () = self.handle.shared.stop_requested.cancelled() => {
                match tokio::time::timeout(self.target.kill_grace, self.child.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        log::warn!(
                            "[{}] Player ignored SIGTERM for {}, killing",
                            stream_id,
                            format_duration(self.target.kill_grace)
                        );
                        if let Err(e) = self.child.start_kill() {
                            log::warn!("[{}] Failed to kill player: {}", stream_id, e);
                        }
                        self.child.wait().await
                    }
                }
            }
        };

        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                log::warn!("[{}] Failed to wait for player: {}", stream_id, e);
                None
            }
        };

        let reason = {
            let mut termination = self.handle.lock();
            termination.reaped = true;
            *termination
                .reason
                .get_or_insert(SessionEndReason::ProcessExited { code })
        };
        self.handle.shared.ended.cancel();
        reason
    }
}

fn signal(pid: u32, signal: Signal) -> Result<(), ProcessError> {
    let raw = i32::try_from(pid).map_err(|_| ProcessError::Signal {
        pid,
        message: "pid out of range".to_string(),
    })?;
    let pid_handle = Pid::from_raw(raw).ok_or_else(|| ProcessError::Signal {
        pid,
        message: "invalid pid".to_string(),
    })?;
    rustix::process::kill_process(pid_handle, signal).map_err(|errno| ProcessError::Signal {
        pid,
        message: errno.to_string(),
    })
}
