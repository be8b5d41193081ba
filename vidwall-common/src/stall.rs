//! CPU heartbeat for a running player.
//!
//! A player blocked on a network read neither exits nor reports a freeze; it
//! just stops using the CPU. The monitor samples the process's CPU usage and
//! ends the session once it stays under the threshold for the configured
//! number of consecutive samples.

use std::sync::Once;
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::session::{SessionEndReason, SessionHandle};
use crate::target::StreamTarget;

static UNSUPPORTED_PLATFORM: Once = Once::new();

/// CPU usage of a single process between consecutive refreshes.
pub struct CpuSampler {
    system: System,
    pid: Pid,
}

impl CpuSampler {
    /// Takes the baseline sample. `None` if the process is not running.
    pub fn new(pid: u32) -> Option<Self> {
        let mut sampler = Self {
            system: System::new(),
            pid: Pid::from_u32(pid),
        };
        sampler.sample()?;
        Some(sampler)
    }

    /// Percent of one core used since the previous sample, or `None` once the
    /// process has exited.
    pub fn sample(&mut self) -> Option<f64> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu(),
        );
        let process = self.system.process(self.pid)?;
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return None;
        }
        Some(f64::from(process.cpu_usage()))
    }
}

pub struct StallMonitor {
    handle: SessionHandle,
    threshold: f64,
    interval: Duration,
    samples_required: u32,
}

impl StallMonitor {
    pub fn new(handle: SessionHandle, target: &StreamTarget) -> Self {
        Self {
            handle,
            threshold: target.stall_cpu_threshold,
            interval: target.stall_sample_interval,
            samples_required: target.stall_samples.max(1),
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        let stream_id = self.handle.stream_id().to_string();
        if self.threshold <= 0.0 {
            log::debug!("[{}] Stall monitor disabled", stream_id);
            return;
        }
        let Some(pid) = self.handle.pid() else {
            return;
        };

        if !sysinfo::IS_SUPPORTED_SYSTEM {
            UNSUPPORTED_PLATFORM.call_once(|| {
                log::warn!("Process CPU sampling not supported here, stall detection disabled");
            });
            return;
        }
        let Some(mut sampler) = CpuSampler::new(pid) else {
            log::debug!("[{}] Player {} not found, stall monitor not started", stream_id, pid);
            return;
        };

        let mut low_samples = 0;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.handle.ended() => break,
                () = tokio::time::sleep(self.interval) => {}
            }

            let Some(usage) = sampler.sample() else {
                // The player is gone; the session will notice on its own
                log::debug!("[{}] Player {} no longer running", stream_id, pid);
                break;
            };

            if usage < self.threshold {
                low_samples += 1;
                log::debug!(
                    "[{}] Player CPU {:.2}% below {:.2}% ({}/{})",
                    stream_id, usage, self.threshold, low_samples, self.samples_required
                );
                if low_samples >= self.samples_required {
                    log::warn!("[{}] Player idle at {:.2}% CPU, presumed stuck", stream_id, usage);
                    self.handle.stop(SessionEndReason::StallDetected);
                    break;
                }
            } else {
                low_samples = 0;
            }
        }

        log::debug!("[{}] Stall monitor finished", stream_id);
    }
}
