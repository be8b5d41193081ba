//! Scripted backend for engine tests: players and viewers are `sh -c`
//! snippets and probe results come from a queue.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::backend::MediaBackend;
use crate::error::ProcessError;
use crate::probe::Liveness;
use crate::region::Region;
use crate::target::StreamTarget;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Probe,
    Player(Region),
    Viewer(PathBuf, Region),
}

#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    player: Option<String>,
    viewer: String,
    /// The last entry repeats once the queue is down to one.
    probes: Arc<Mutex<VecDeque<Liveness>>>,
    events: Arc<Mutex<Vec<Event>>>,
    player_pids: Arc<Mutex<Vec<u32>>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            player: Some("sleep 30".to_string()),
            viewer: "sleep 30".to_string(),
            probes: Arc::new(Mutex::new(VecDeque::from([Liveness::Active]))),
            events: Arc::new(Mutex::new(Vec::new())),
            player_pids: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_player(mut self, script: &str) -> Self {
        self.player = Some(script.to_string());
        self
    }

    pub fn failing_player(mut self) -> Self {
        self.player = None;
        self
    }

    pub fn with_viewer(mut self, script: &str) -> Self {
        self.viewer = script.to_string();
        self
    }

    pub fn with_probes(self, probes: Vec<Liveness>) -> Self {
        assert!(!probes.is_empty());
        *self.probes.lock().unwrap() = probes.into();
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| matches(e)).count()
    }

    /// Pids of every player started so far, oldest first.
    pub fn player_pids(&self) -> Vec<u32> {
        self.player_pids.lock().unwrap().clone()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn run(script: &str) -> Result<Child, ProcessError> {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Launch { program: "sh".to_string(), source })
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for ScriptedBackend {
    async fn probe(&self, _url: &str, _timeout: Duration) -> Liveness {
        self.record(Event::Probe);
        let mut probes = self.probes.lock().unwrap();
        if probes.len() > 1 {
            probes.pop_front().unwrap()
        } else {
            probes[0]
        }
    }

    fn spawn_player(&self, _target: &StreamTarget, region: &Region) -> Result<Child, ProcessError> {
        self.record(Event::Player(*region));
        match &self.player {
            Some(script) => {
                let child = Self::run(script)?;
                self.player_pids.lock().unwrap().extend(child.id());
                Ok(child)
            }
            None => Err(ProcessError::Launch {
                program: "player".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no player"),
            }),
        }
    }

    fn spawn_viewer(&self, image: &Path, region: &Region) -> Result<Child, ProcessError> {
        self.record(Event::Viewer(image.to_path_buf(), *region));
        Self::run(&self.viewer)
    }
}

/// A target with timings short enough for tests. Stall sampling is off.
pub fn test_target(id: &str) -> StreamTarget {
    let mut target = StreamTarget::new(id, "rtsp://cam.test/live", PathBuf::from("/tmp/placeholder.png"));
    target.probe_timeout = Duration::from_millis(500);
    target.stall_cpu_threshold = 0.0;
    target.stall_sample_interval = Duration::from_millis(200);
    target.reprobe_interval = Duration::from_secs(60);
    target.retry_delay = Duration::from_millis(50);
    target.kill_grace = Duration::from_secs(1);
    target
}
