//! Freeze detection for a running session.
//!
//! The player is started with ffmpeg's `freezedetect` filter, which logs
//! `lavfi.freezedetect.freeze_start` once the picture has stayed within the
//! noise threshold for the minimum duration. Alongside that, the detector
//! re-probes the source periodically so a feed that disappears upstream
//! without freezing the decoder still ends the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backend::MediaBackend;
use crate::probe::Liveness;
use crate::session::{SessionEndReason, SessionHandle};
use crate::target::StreamTarget;

const FREEZE_START: &str = "lavfi.freezedetect.freeze_start";
const FREEZE_END: &str = "lavfi.freezedetect.freeze_end";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FreezeEvent {
    /// Stream time (seconds) at which the frozen run began.
    Start { at: f64 },
    End { at: f64 },
}

/// Parses one stderr line such as
/// `[freezedetect @ 0x55d0c8] lavfi.freezedetect.freeze_start: 12.345`.
pub fn parse_freeze_line(line: &str) -> Option<FreezeEvent> {
    let (key, constructor): (&str, fn(f64) -> FreezeEvent) = if line.contains(FREEZE_START) {
        (FREEZE_START, |at| FreezeEvent::Start { at })
    } else if line.contains(FREEZE_END) {
        (FREEZE_END, |at| FreezeEvent::End { at })
    } else {
        return None;
    };

    let value = line.split(key).nth(1)?.trim_start_matches(':').trim();
    value.parse().ok().map(constructor)
}

pub struct FreezeDetector<B> {
    backend: Arc<B>,
    handle: SessionHandle,
    source_url: String,
    probe_timeout: Duration,
    reprobe_interval: Duration,
}

impl<B: MediaBackend> FreezeDetector<B> {
    pub fn new(backend: Arc<B>, handle: SessionHandle, target: &StreamTarget) -> Self {
        Self {
            backend,
            handle,
            source_url: target.source_url.clone(),
            probe_timeout: target.probe_timeout,
            reprobe_interval: target.reprobe_interval,
        }
    }

    /// Runs until the session ends or `cancel` fires.
    pub fn spawn(self, diagnostics: Option<ChildStderr>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(diagnostics, cancel))
    }

    async fn run(self, diagnostics: Option<ChildStderr>, cancel: CancellationToken) {
        let stream_id = self.handle.stream_id().to_string();
        let mut diagnostics = diagnostics.map(BufReader::new);
        let mut line_buf = Vec::new();
        let mut reprobe = interval_at(Instant::now() + self.reprobe_interval, self.reprobe_interval);
        reprobe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.handle.ended() => break,
                line = next_line(&mut diagnostics, &mut line_buf) => match line {
                    Some(line) => self.on_line(&line),
                    None => {
                        log::debug!("[{}] Player diagnostics closed", stream_id);
                        diagnostics = None;
                    }
                },
                _ = reprobe.tick() => {
                    let liveness = tokio::select! {
                        () = cancel.cancelled() => break,
                        () = self.handle.ended() => break,
                        liveness = self.backend.probe(&self.source_url, self.probe_timeout) => liveness,
                    };
                    if liveness == Liveness::Inactive {
                        log::warn!("[{}] Source stopped answering probes during playback", stream_id);
                        self.handle.stop(SessionEndReason::SourceInactive);
                    }
                }
            }
        }

        log::debug!("[{}] Freeze detector finished", stream_id);
    }

    fn on_line(&self, line: &str) {
        match parse_freeze_line(line) {
            Some(FreezeEvent::Start { at }) => {
                log::warn!("[{}] Picture frozen since {:.1}s of stream time", self.handle.stream_id(), at);
                self.handle.stop(SessionEndReason::FreezeDetected);
            }
            Some(FreezeEvent::End { at }) => {
                log::info!("[{}] Picture moving again at {:.1}s", self.handle.stream_id(), at);
            }
            None => log::trace!("[{}] player: {}", self.handle.stream_id(), line),
        }
    }
}

/// Next stderr line, decoded lossily: stream metadata arrives in whatever
/// encoding the source uses. `None` once the pipe is closed.
///
/// Partial reads stay in `buf` when the future is dropped by `select!`, so the
/// next call picks up where it left off.
async fn next_line(reader: &mut Option<BufReader<ChildStderr>>, buf: &mut Vec<u8>) -> Option<String> {
    let Some(reader) = reader else {
        return std::future::pending().await;
    };

    match reader.read_until(b'\n', buf).await {
        Ok(0) if buf.is_empty() => None,
        Ok(_) => {
            let line = String::from_utf8_lossy(buf).trim_end().to_string();
            buf.clear();
            Some(line)
        }
        Err(e) => {
            log::debug!("Reading player diagnostics failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Liveness;
    use crate::region::Region;
    use crate::session::PlaybackSession;
    use crate::test_support::{test_target, ScriptedBackend};

    #[test]
    fn test_parse_freeze_lines() {
        assert_eq!(
            parse_freeze_line("[freezedetect @ 0x55d0c8a1b2c0] lavfi.freezedetect.freeze_start: 12.345"),
            Some(FreezeEvent::Start { at: 12.345 })
        );
        assert_eq!(
            parse_freeze_line("[freezedetect @ 0x55d0c8a1b2c0] lavfi.freezedetect.freeze_end: 20"),
            Some(FreezeEvent::End { at: 20.0 })
        );
        assert_eq!(
            parse_freeze_line("[freezedetect @ 0x55d0c8a1b2c0] lavfi.freezedetect.freeze_duration: 7.6"),
            None
        );
        assert_eq!(parse_freeze_line("Input #0, rtsp, from 'rtsp://cam/live':"), None);
    }

    #[tokio::test]
    async fn test_freeze_ends_session_while_player_keeps_running() {
        let backend = Arc::new(ScriptedBackend::new().with_player(
            "echo '[freezedetect @ 0x1] lavfi.freezedetect.freeze_start: 4.2' >&2; sleep 30",
        ));
        let target = test_target("door");
        let mut session = PlaybackSession::start(&*backend, Arc::new(target.clone()), Region::new(0, 0, 640, 360)).unwrap();
        let cancel = CancellationToken::new();
        let detector = FreezeDetector::new(Arc::clone(&backend), session.handle(), &target)
            .spawn(session.take_diagnostics(), cancel.clone());

        let reason = tokio::time::timeout(Duration::from_secs(10), session.wait()).await.unwrap();
        assert_eq!(reason, SessionEndReason::FreezeDetected);

        // Detector exits on its own once the session is over
        tokio::time::timeout(Duration::from_secs(5), detector).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_freeze_found_after_non_utf8_metadata() {
        let backend = Arc::new(ScriptedBackend::new().with_player(
            "printf 'title: Cam\\351ra\\n' >&2; \
             echo '[freezedetect @ 0x1] lavfi.freezedetect.freeze_start: 4.2' >&2; \
             sleep 30",
        ));
        let target = test_target("door");
        let mut session = PlaybackSession::start(&*backend, Arc::new(target.clone()), Region::new(0, 0, 640, 360)).unwrap();
        let detector = FreezeDetector::new(Arc::clone(&backend), session.handle(), &target)
            .spawn(session.take_diagnostics(), CancellationToken::new());

        let reason = tokio::time::timeout(Duration::from_secs(10), session.wait()).await.unwrap();
        assert_eq!(reason, SessionEndReason::FreezeDetected);
        detector.await.unwrap();
    }

    #[tokio::test]
    async fn test_source_dropping_ends_session() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_player("sleep 30")
                .with_probes(vec![Liveness::Active, Liveness::Inactive]),
        );
        let mut target = test_target("door");
        target.reprobe_interval = Duration::from_millis(100);
        let mut session = PlaybackSession::start(&*backend, Arc::new(target.clone()), Region::new(0, 0, 640, 360)).unwrap();
        let detector = FreezeDetector::new(Arc::clone(&backend), session.handle(), &target)
            .spawn(session.take_diagnostics(), CancellationToken::new());

        let reason = tokio::time::timeout(Duration::from_secs(10), session.wait()).await.unwrap();
        assert_eq!(reason, SessionEndReason::SourceInactive);
        detector.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_detector_without_touching_session() {
        let backend = Arc::new(ScriptedBackend::new().with_player("sleep 30"));
        let target = test_target("door");
        let mut session = PlaybackSession::start(&*backend, Arc::new(target.clone()), Region::new(0, 0, 640, 360)).unwrap();
        let handle = session.handle();
        let cancel = CancellationToken::new();
        let detector = FreezeDetector::new(Arc::clone(&backend), handle.clone(), &target)
            .spawn(session.take_diagnostics(), cancel.clone());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), detector).await.unwrap().unwrap();
        assert_eq!(handle.end_reason(), None);

        handle.stop(SessionEndReason::ShutdownRequested);
        assert_eq!(session.wait().await, SessionEndReason::ShutdownRequested);
    }
}
