use std::path::PathBuf;

use serde::Serialize;

use crate::command_builder::CommandBuilder;
use crate::error::{DisplayError, VidwallError};
use crate::region::Region;
use crate::Result;

/// One physical output as reported by the display enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayOutput {
    pub name: String,
    pub connected: bool,
    pub primary: bool,
    /// `None` when connected but without an active mode.
    pub geometry: Option<Region>,
}

impl DisplayOutput {
    pub fn usable_geometry(&self) -> Option<Region> {
        if self.connected {
            self.geometry
        } else {
            None
        }
    }
}

pub struct DisplayEnumerator {
    program: PathBuf,
    command_builder: CommandBuilder,
}

impl DisplayEnumerator {
    pub fn new(command_builder: CommandBuilder) -> Result<Self> {
        let configured = command_builder.programs().display_enumerator.clone();
        let program = which::which(&configured).map_err(|_| {
            VidwallError::Display(DisplayError::EnumeratorNotFound {
                program: configured.display().to_string(),
            })
        })?;
        Ok(Self { program, command_builder })
    }

    pub async fn query(&self) -> Result<Vec<DisplayOutput>> {
        let mut cmd = self.command_builder.build_display_query();
        log::debug!("Executing display query: {:?}", self.program);

        let output = cmd.output().await.map_err(|_| {
            VidwallError::Display(DisplayError::EnumeratorNotFound {
                program: self.program.display().to_string(),
            })
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::error!("Display query failed - exit code: {:?}, stderr: {}", output.status.code(), stderr);
            return Err(VidwallError::Display(DisplayError::EnumeratorFailed {
                stderr: stderr.trim().to_string(),
            }));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let outputs = parse_xrandr(&stdout);
        if outputs.is_empty() {
            log::warn!("No outputs parsed from display query stdout: {}", stdout);
        }
        Ok(outputs)
    }
}

/// Parses `xrandr --query` output. Lines look like
/// `HDMI-1 connected primary 1920x1080+0+0 (normal left ...) 527mm x 296mm`
/// or `DP-1 disconnected (normal left ...)`.
pub fn parse_xrandr(stdout: &str) -> Vec<DisplayOutput> {
    let mut outputs = Vec::new();

    for line in stdout.lines() {
        // Mode lines are indented
        if line.starts_with(char::is_whitespace) {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let (Some(name), Some(state)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        let connected = match state {
            "connected" => true,
            "disconnected" => false,
            _ => continue,
        };

        let mut primary = false;
        let mut geometry = None;
        for token in tokens {
            if token == "primary" {
                primary = true;
            } else if token.starts_with('(') {
                break;
            } else if let Ok(region) = token.parse::<Region>() {
                geometry = Some(region);
                break;
            }
        }

        outputs.push(DisplayOutput {
            name: name.to_string(),
            connected,
            primary,
            geometry,
        });
    }

    outputs
}
