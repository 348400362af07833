use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use eyre::{Context, ContextCompat, Result};
use flume::{Receiver, Sender};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval, sleep_until},
};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchMode {
    /// File-system notifications from the OS
    #[default]
    Event,
    /// Compare the modification time on a timer
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    pub mode: WatchMode,
    pub debounce: Duration,
    pub poll_interval: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            mode: WatchMode::Event,
            debounce: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FileChanged {
    pub at: Instant,
}

impl FileChanged {
    pub fn now() -> Self {
        Self { at: Instant::now() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Fire,
    /// Suppressed; fire at the deadline unless something fires first
    Defer(Instant),
}

/// Leading-edge debouncer with a trailing fire for suppressed bursts
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_fire: Option<Instant>,
    pending: bool,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fire: None,
            pending: false,
        }
    }

    pub fn on_event(&mut self, now: Instant) -> Decision {
        match self.last_fire {
            Some(last) if now.saturating_duration_since(last) < self.window => {
                self.pending = true;
                Decision::Defer(last + self.window)
            }
            _ => {
                self.fire(now);
                Decision::Fire
            }
        }
    }

    pub fn on_deadline(&mut self, now: Instant) -> bool {
        let elapsed = self
            .last_fire
            .is_none_or(|last| now.saturating_duration_since(last) >= self.window);
        if self.pending && elapsed {
            self.fire(now);
            return true;
        }
        false
    }

    pub fn deadline(&self) -> Option<Instant> {
        if !self.pending {
            return None;
        }
        self.last_fire.map(|last| last + self.window)
    }

    /// Clears a suppressed event, returning whether there was one
    pub fn take_pending(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    fn fire(&mut self, now: Instant) {
        self.last_fire = Some(now);
        self.pending = false;
    }
}

/// Remembers the last seen modification time of a file
#[derive(Debug)]
pub struct ModificationTracker {
    path: PathBuf,
    last: Option<SystemTime>,
}

impl ModificationTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last = modified(&path).ok();
        Self { path, last }
    }

    /// True when the modification time differs from the last call. A file
    /// that cannot be inspected counts as unchanged.
    pub fn changed(&mut self) -> bool {
        match modified(&self.path) {
            Ok(time) if self.last != Some(time) => {
                self.last = Some(time);
                true
            }
            Ok(_) => false,
            Err(err) => {
                warn!("Could not stat {}: {err}", self.path.display());
                false
            }
        }
    }
}

fn modified(path: &Path) -> std::io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

/// The watched file, absolute and, when it exists, canonical
#[derive(Debug, Clone)]
struct Target {
    path: PathBuf,
    canonical: Option<PathBuf>,
}

impl Target {
    fn new(path: &Path) -> Result<Self> {
        let path = std::path::absolute(path)
            .wrap_err_with(|| format!("Resolve {}", path.display()))?;
        let canonical = path.canonicalize().ok();
        Ok(Self { path, canonical })
    }

    fn matches(&self, candidate: &Path) -> bool {
        if candidate == self.path {
            return true;
        }
        self.canonical.as_deref().is_some_and(|canonical| {
            candidate == canonical || candidate.canonicalize().is_ok_and(|c| c == canonical)
        })
    }

    fn is_relevant(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
            && event.paths.iter().any(|p| self.matches(p))
    }
}

enum Inner {
    Event { _watcher: RecommendedWatcher },
    Poll(JoinHandle<()>),
}

/// Sends a [`FileChanged`] for each change to one file. Watching stops when
/// this is dropped.
pub struct FileWatcher {
    inner: Inner,
}

impl FileWatcher {
    /// Starts watching `path`. Poll mode spawns a task on the current runtime.
    pub fn spawn(path: &Path, settings: &WatchSettings, tx: Sender<FileChanged>) -> Result<Self> {
        let target = Target::new(path)?;
        let inner = match settings.mode {
            WatchMode::Event => Inner::Event {
                _watcher: event_watcher(target, tx)?,
            },
            WatchMode::Poll => Inner::Poll(poll_watcher(target.path, settings.poll_interval, tx)),
        };
        Ok(Self { inner })
    }

    pub fn mode(&self) -> WatchMode {
        match self.inner {
            Inner::Event { .. } => WatchMode::Event,
            Inner::Poll(_) => WatchMode::Poll,
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        if let Inner::Poll(handle) = &self.inner {
            handle.abort();
        }
    }
}

fn event_watcher(target: Target, tx: Sender<FileChanged>) -> Result<RecommendedWatcher> {
    let dir = target
        .path
        .parent()
        .context("Watched file has no parent directory")?
        .to_path_buf();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if target.is_relevant(&event) => {
            trace!("Change event {:?}", event.kind);
            _ = tx.send(FileChanged::now());
        }
        Ok(_) => {}
        Err(err) => warn!("Watch error: {err}"),
    })?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .wrap_err_with(|| format!("Watch {}", dir.display()))?;
    debug!("Watching {} for events", dir.display());
    Ok(watcher)
}

fn poll_watcher(path: PathBuf, every: Duration, tx: Sender<FileChanged>) -> JoinHandle<()> {
    let mut tracker = ModificationTracker::new(&path);
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        debug!("Polling {} every {every:?}", path.display());
        loop {
            ticker.tick().await;
            if tracker.changed() && tx.send_async(FileChanged::now()).await.is_err() {
                break;
            }
        }
    })
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Runs `on_change` for every debounced change received on `rx` until
/// `shutdown` resolves or every sender is gone. A failing `on_change` is
/// logged and watching continues.
pub async fn watch<Shutdown, OnChange, Fut>(
    rx: Receiver<FileChanged>,
    debounce: Duration,
    shutdown: Shutdown,
    mut on_change: OnChange,
) where
    Shutdown: Future<Output = ()>,
    OnChange: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut debouncer = Debouncer::new(debounce);
    tokio::pin!(shutdown);

    loop {
        let mut closed = false;
        let fire = tokio::select! {
            _ = &mut shutdown => {
                debug!("Shutdown requested");
                break;
            }
            change = rx.recv_async() => match change {
                Ok(FileChanged { at }) => match debouncer.on_event(at) {
                    Decision::Fire => true,
                    Decision::Defer(deadline) => {
                        trace!("Change debounced until {deadline:?}");
                        false
                    }
                },
                Err(_) => {
                    debug!("Change channel closed");
                    closed = true;
                    debouncer.take_pending()
                }
            },
            _ = sleep_until_some(debouncer.deadline()) => debouncer.on_deadline(Instant::now()),
        };
        if fire {
            // An update in progress must not hold up shutdown
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Shutdown requested during update");
                    break;
                }
                _ = run(&mut on_change) => {}
            }
        }
        if closed {
            break;
        }
    }
}

async fn run<OnChange, Fut>(on_change: &mut OnChange)
where
    OnChange: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    info!("File changed; updating plots");
    if let Err(err) = on_change().await {
        error!("Update failed: {err:#}");
    }
}

/// Watches `path` with `settings` and runs the debounced loop
pub async fn watch_file<Shutdown, OnChange, Fut>(
    path: &Path,
    settings: &WatchSettings,
    shutdown: Shutdown,
    on_change: OnChange,
) -> Result<()>
where
    Shutdown: Future<Output = ()>,
    OnChange: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let (tx, rx) = flume::unbounded();
    let watcher = FileWatcher::spawn(path, settings, tx)?;
    info!(
        "Monitoring {} for changes ({:?} mode). Press Ctrl+C to exit.",
        path.display(),
        watcher.mode()
    );
    watch(rx, settings.debounce, shutdown, on_change).await;
    Ok(())
}
