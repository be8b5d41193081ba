//! The seam between the supervision engine and the external programs it
//! drives. Production code uses [`CommandBackend`]; tests script their own.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio::process::Child;

use crate::command_builder::CommandBuilder;
use crate::error::ProcessError;
use crate::probe::{self, Liveness};
use crate::region::Region;
use crate::target::StreamTarget;

pub trait MediaBackend: Send + Sync + 'static {
    /// Bounded liveness check. Must not fail: errors report `Inactive`.
    fn probe(&self, url: &str, timeout: Duration) -> impl Future<Output = Liveness> + Send;

    /// Starts the player for `target` inside `region`. The child's stderr
    /// must be piped; it carries freeze events.
    fn spawn_player(&self, target: &StreamTarget, region: &Region) -> Result<Child, ProcessError>;

    /// Starts the placeholder viewer for `region`.
    fn spawn_viewer(&self, image: &Path, region: &Region) -> Result<Child, ProcessError>;
}

#[derive(Debug, Clone)]
pub struct CommandBackend {
    command_builder: CommandBuilder,
}

impl CommandBackend {
    pub fn new(command_builder: CommandBuilder) -> Self {
        Self { command_builder }
    }
}

impl MediaBackend for CommandBackend {
    async fn probe(&self, url: &str, timeout: Duration) -> Liveness {
        probe::probe(&self.command_builder, url, timeout).await
    }

    fn spawn_player(&self, target: &StreamTarget, region: &Region) -> Result<Child, ProcessError> {
        let mut cmd = self.command_builder.build_player_command(target, region);
        log::debug!("Starting player for '{}' at {}", target.id, region);
        cmd.spawn().map_err(|source| ProcessError::Launch {
            program: self.command_builder.programs().player.display().to_string(),
            source,
        })
    }

    fn spawn_viewer(&self, image: &Path, region: &Region) -> Result<Child, ProcessError> {
        let mut cmd = self.command_builder.build_viewer_command(image, region);
        log::debug!("Starting placeholder viewer for {:?} at {}", image, region);
        cmd.spawn().map_err(|source| ProcessError::Launch {
            program: self.command_builder.programs().viewer.display().to_string(),
            source,
        })
    }
}
