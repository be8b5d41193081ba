use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::region::Region;
use crate::target::StreamTarget;

/// External programs the supervisor drives, and their tunables.
#[derive(Debug, Clone)]
pub struct ProgramConfig {
    pub player: PathBuf,
    pub player_args: Vec<String>,
    /// Passed as `-hwaccel <value>` when set.
    pub hwaccel: Option<String>,
    pub probe: PathBuf,
    pub viewer: PathBuf,
    pub viewer_args: Vec<String>,
    pub display_enumerator: PathBuf,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            player: PathBuf::from("ffplay"),
            player_args: Vec::new(),
            hwaccel: None,
            probe: PathBuf::from("ffprobe"),
            viewer: PathBuf::from("feh"),
            viewer_args: Vec::new(),
            display_enumerator: PathBuf::from("xrandr"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandBuilder {
    programs: ProgramConfig,
}

impl CommandBuilder {
    pub fn new(programs: ProgramConfig) -> Self {
        Self { programs }
    }

    pub fn programs(&self) -> &ProgramConfig {
        &self.programs
    }

    /// Names of configured programs that can't be found.
    pub fn missing_programs(&self) -> Vec<String> {
        [
            &self.programs.player,
            &self.programs.probe,
            &self.programs.viewer,
            &self.programs.display_enumerator,
        ]
        .into_iter()
        .filter(|program| which::which(program).is_err())
        .map(|program| program.display().to_string())
        .collect()
    }

    /// Muted, borderless player pinned to `region`, with freezedetect
    /// reporting on stderr.
    pub fn build_player_command(&self, target: &StreamTarget, region: &Region) -> Command {
        let mut cmd = Command::new(&self.programs.player);
        cmd.args(["-hide_banner", "-nostats", "-loglevel", "info"]);
        cmd.args(["-an", "-noborder"]);
        cmd.args(["-left", &region.x.to_string(), "-top", &region.y.to_string()]);
        cmd.args(["-x", &region.width.to_string(), "-y", &region.height.to_string()]);
        cmd.args(["-fflags", "nobuffer", "-flags", "low_delay", "-framedrop"]);
        if let Some(hwaccel) = &self.programs.hwaccel {
            cmd.args(["-hwaccel", hwaccel]);
        }
        cmd.args(["-vf", &freeze_filter(target)]);
        cmd.args(&self.programs.player_args);
        cmd.arg(&target.source_url);

        apply_display_env(&mut cmd);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Header-only inspection listing one codec type per stream.
    pub fn build_probe_command(&self, url: &str) -> Command {
        let mut cmd = Command::new(&self.programs.probe);
        cmd.args(["-v", "error", "-show_entries", "stream=codec_type", "-of", "csv=p=0"]);
        cmd.arg(url);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    pub fn build_viewer_command(&self, image_path: &Path, region: &Region) -> Command {
        let mut cmd = Command::new(&self.programs.viewer);
        cmd.args(["--borderless", "--geometry", &region.to_string()]);
        cmd.args(["--zoom", "fill", "--image-bg", "black"]);
        cmd.args(&self.programs.viewer_args);
        cmd.arg(image_path);

        apply_display_env(&mut cmd);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    pub fn build_display_query(&self) -> Command {
        let mut cmd = Command::new(&self.programs.display_enumerator);
        cmd.arg("--query");
        apply_display_env(&mut cmd);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }
}

/// `freezedetect` arguments for the target's thresholds.
pub fn freeze_filter(target: &StreamTarget) -> String {
    format!(
        "freezedetect=n={}:d={:.3}",
        target.freeze_threshold,
        target.freeze_min_duration.as_secs_f64()
    )
}

// Set environment variables from current session, with fallbacks
fn apply_display_env(cmd: &mut Command) {
    if std::env::var_os("DISPLAY").is_none() {
        cmd.env("DISPLAY", ":0");
    }

    if std::env::var_os("XDG_RUNTIME_DIR").is_none() {
        let uid = rustix::process::getuid();
        cmd.env("XDG_RUNTIME_DIR", format!("/run/user/{}", uid.as_raw()));
    }
}
