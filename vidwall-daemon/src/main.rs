use anyhow::Context;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use vidwall_common::image::validate_image;
use vidwall_common::{
    format_duration, resolve, CommandBackend, CommandBuilder, DisplayEnumerator, DisplayOutput,
    ErrorReporting, FallbackPresenter, Layout, StreamSupervisor, StreamTarget,
};
use vidwall_config::Config;

#[derive(Parser, Debug)]
#[command(name = "vidwall-daemon")]
#[command(about = "Keeps live camera feeds on screen, with a placeholder while they are down")]
#[command(version)]
struct Args {
    /// Configuration file (default: $XDG_CONFIG_HOME/vidwall/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Append log output to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {:?}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn describe_outputs(outputs: &[DisplayOutput]) -> String {
    let connected: Vec<String> = outputs
        .iter()
        .filter(|o| o.connected)
        .map(|o| match o.geometry {
            Some(geometry) => format!("{} {}", o.name, geometry),
            None => format!("{} (no mode)", o.name),
        })
        .collect();

    if connected.is_empty() {
        "none".to_string()
    } else {
        connected.join(", ")
    }
}

fn log_layout(layout: &Layout) {
    for (id, assignment) in &layout.assignments {
        match &assignment.output {
            Some(output) => log::info!("[{}] Assigned {} on {}", id, assignment.region, output),
            None => log::info!("[{}] Assigned {}", id, assignment.region),
        }
    }
    for (id, reason) in &layout.unassigned {
        log::info!("[{}] Not placed: {}", id, reason);
    }
}

/// Replaces the published layout if it differs. Returns whether it did.
fn publish_layout(layout_tx: &watch::Sender<Arc<Layout>>, layout: Layout) -> bool {
    layout_tx.send_if_modified(|current| {
        if **current == layout {
            false
        } else {
            *current = Arc::new(layout);
            true
        }
    })
}

/// Re-resolves the layout whenever the connected outputs change.
async fn watch_displays(
    enumerator: DisplayEnumerator,
    targets: Vec<StreamTarget>,
    mut outputs: Vec<DisplayOutput>,
    layout_tx: watch::Sender<Arc<Layout>>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let current = match enumerator.query().await {
            Ok(current) => current,
            Err(e) => {
                log::warn!("Display query failed, keeping current layout: {}", e.user_friendly_message());
                continue;
            }
        };
        if current == outputs {
            continue;
        }

        log::info!("Display outputs changed: {}", describe_outputs(&current));
        outputs = current;

        let layout = resolve(&outputs, &targets);
        log_layout(&layout);
        if publish_layout(&layout_tx, layout) {
            log::debug!("Published new layout");
        }
    }

    log::debug!("Display watcher stopped");
}

/// Awaits a background task and logs it if it panicked. Returns whether it
/// finished cleanly.
async fn join_task(name: &str, task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            log::error!("{} task failed: {}", name, e);
            false
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => log::info!("Received SIGINT"),
                _ = sigterm.recv() => log::info!("Received SIGTERM"),
            }
        }
        Err(e) => {
            log::warn!("Failed to register SIGTERM handler, using ctrl-c only: {}", e);
            if let Err(e) = ctrl_c.await {
                log::error!("ctrl-c handler failed: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_deref())?;

    log::info!("Starting vidwall daemon...");

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .map_err(|e| {
        log::error!("Configuration error: {}", e.user_friendly_message());
        anyhow::anyhow!("Configuration error: {}", e.user_friendly_message())
    })?;

    let targets = config
        .stream_targets()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e.user_friendly_message()))?;

    log::info!("Configuration loaded: {} stream(s)", targets.len());

    // Missing programs are not fatal; loops keep retrying and show what they can
    let command_builder = CommandBuilder::new(config.program_config());
    for program in command_builder.missing_programs() {
        log::error!("Required program not found in PATH: {}", program);
    }
    for target in &targets {
        if let Err(e) = validate_image(&target.placeholder) {
            log::warn!("[{}] {}", target.id, e.user_friendly_message());
        }
    }

    let enumerator = match DisplayEnumerator::new(command_builder.clone()) {
        Ok(enumerator) => Some(enumerator),
        Err(e) => {
            log::error!("{}", e.user_friendly_message());
            None
        }
    };

    let outputs = match &enumerator {
        Some(enumerator) => enumerator.query().await.unwrap_or_else(|e| {
            log::error!("Initial display query failed: {}", e.user_friendly_message());
            Vec::new()
        }),
        None => Vec::new(),
    };
    log::info!("Connected outputs: {}", describe_outputs(&outputs));

    let layout = resolve(&outputs, &targets);
    log_layout(&layout);
    let (layout_tx, layout_rx) = watch::channel(Arc::new(layout));

    let backend = Arc::new(CommandBackend::new(command_builder));
    let presenter = Arc::new(FallbackPresenter::new(Arc::clone(&backend)));
    let shutdown = CancellationToken::new();

    let watcher = enumerator.map(|enumerator| {
        tokio::spawn(watch_displays(
            enumerator,
            targets.clone(),
            outputs,
            layout_tx,
            config.global.display_poll_interval,
            shutdown.child_token(),
        ))
    });

    let supervisors: Vec<_> = targets
        .into_iter()
        .map(|target| {
            let id = target.id.clone();
            let task = StreamSupervisor::new(
                Arc::new(target),
                Arc::clone(&backend),
                Arc::clone(&presenter),
                layout_rx.clone(),
                shutdown.child_token(),
            )
            .spawn();
            (id, task)
        })
        .collect();

    log::info!("vidwall daemon running with {} stream(s)", supervisors.len());

    shutdown_signal().await;
    log::info!("Shutting down...");
    shutdown.cancel();

    let shutdown_timeout = config.global.shutdown_timeout;
    let joined = tokio::time::timeout(shutdown_timeout, async {
        for (id, task) in supervisors {
            join_task(&format!("[{}] Supervisor", id), task).await;
        }
        if let Some(watcher) = watcher {
            join_task("Display watcher", watcher).await;
        }
    })
    .await;

    if joined.is_err() {
        log::warn!("Streams did not stop within {}, exiting anyway", format_duration(shutdown_timeout));
    }

    presenter.clear_all().await;
    log::info!("vidwall daemon stopped");
    Ok(())
}
