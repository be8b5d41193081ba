use std::time::Duration;

use serde::Serialize;

use crate::command_builder::CommandBuilder;
use crate::error::ProbeError;
use crate::target::redact_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Liveness {
    Active,
    Inactive,
}

/// Number of stream elements listed by `ffprobe -show_entries stream=codec_type`.
pub fn count_streams(stdout: &str) -> usize {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .count()
}

/// Runs the bounded header probe and reports how many streams it saw.
/// The probe process is killed if `timeout` elapses.
pub async fn inspect(builder: &CommandBuilder, url: &str, timeout: Duration) -> Result<usize, ProbeError> {
    let child = builder
        .build_probe_command(url)
        .spawn()
        .map_err(|source| ProbeError::Launch { url: redact_url(url), source })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => return Err(ProbeError::Launch { url: redact_url(url), source }),
        Err(_) => return Err(ProbeError::Timeout { url: redact_url(url), after: timeout }),
    };

    if !output.status.success() {
        return Err(ProbeError::NonZeroExit {
            url: redact_url(url),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    match count_streams(&String::from_utf8_lossy(&output.stdout)) {
        0 => Err(ProbeError::NoStreams { url: redact_url(url) }),
        streams => Ok(streams),
    }
}

/// Never fails: any inspection error means the feed is inactive.
pub async fn probe(builder: &CommandBuilder, url: &str, timeout: Duration) -> Liveness {
    match inspect(builder, url, timeout).await {
        Ok(streams) => {
            log::debug!("Probe of {} found {} stream(s)", redact_url(url), streams);
            Liveness::Active
        }
        Err(e) => {
            log::debug!("{}", e);
            Liveness::Inactive
        }
    }
}
