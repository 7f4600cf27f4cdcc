//! Debounced filesystem watcher over the scenario root (§4.7). Coalesces
//! bursts of filesystem events behind a debounce window and invokes the
//! reload callback once the window expires; the concrete notification
//! mechanism is an external collaborator (`notify`/`notify-debouncer-full`),
//! the core only owns the debounce-then-reload policy and the lifecycle
//! cancellation around it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_full::notify::RecursiveMode;
use notify_debouncer_full::new_debouncer;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Spawns the watcher on its own OS thread (the underlying `notify` channel
/// is synchronous) and calls `reload` once per debounced batch of events.
/// Newly created subdirectories under `root` are picked up automatically by
/// `RecursiveMode::Recursive`. Returns the thread handle so the caller can
/// join it during an orderly shutdown; the watcher stops once `cancel` fires.
pub fn spawn(
    root: PathBuf,
    debounce: Duration,
    cancel: CancellationToken,
    reload: impl Fn() + Send + 'static,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || run(&root, debounce, cancel, reload))
}

fn run(root: &Path, debounce: Duration, cancel: CancellationToken, reload: impl Fn()) {
    let (tx, rx) = std::sync::mpsc::channel();

    let mut debouncer = match new_debouncer(debounce, None, tx) {
        Ok(d) => d,
        Err(err) => {
            error!(%err, "failed to initialise scenario watcher");
            return;
        }
    };

    if let Err(err) = debouncer.watcher().watch(root, RecursiveMode::Recursive) {
        error!(%err, root = %root.display(), "failed to watch scenario root");
        return;
    }

    info!(root = %root.display(), debounce_ms = %debounce.as_millis(), "watching scenario root for changes");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Ok(events)) if !events.is_empty() => {
                info!(count = events.len(), "scenario change detected, reloading");
                reload();
            }
            Ok(Ok(_)) => {}
            Ok(Err(errors)) => {
                warn!(?errors, "scenario watcher reported errors");
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("scenario watcher stopped");
}
