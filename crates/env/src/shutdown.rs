//! Process shutdown hooks.
//!
//! Hooks are callbacks run once when the process receives a termination
//! signal. Each hook carries an "already handled" flag that both firing and
//! deregistration claim atomically, so whichever happens first wins and the
//! other becomes a no-op.

use futures::future::{join_all, BoxFuture};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

type HookAction = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct HookEntry {
    name: String,
    handled: AtomicBool,
    action: Mutex<Option<HookAction>>,
}

impl HookEntry {
    fn claim(&self) -> bool {
        self.handled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Counters describing what happened to registered hooks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookStats {
    /// Hooks registered so far
    pub registered: usize,
    /// Hooks deregistered before firing
    pub removed: usize,
    /// Hooks fired by a shutdown
    pub fired: usize,
}

/// Registry of hooks to run on process shutdown.
#[derive(Default)]
pub struct ShutdownHooks {
    next_id: AtomicU64,
    hooks: Mutex<HashMap<u64, Arc<HookEntry>>>,
    registered: AtomicUsize,
    removed: AtomicUsize,
    fired: AtomicUsize,
}

impl ShutdownHooks {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a hook. It stays registered until the returned guard is
    /// removed or dropped, or until the hooks run.
    pub fn register<F>(self: &Arc<Self>, name: impl Into<String>, action: F) -> ShutdownHook
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(HookEntry {
            name: name.into(),
            handled: AtomicBool::new(false),
            action: Mutex::new(Some(Box::new(action))),
        });

        self.lock().insert(id, entry.clone());
        self.registered.fetch_add(1, Ordering::Relaxed);
        debug!("Registered shutdown hook {} ({})", id, entry.name);

        ShutdownHook {
            registry: self.clone(),
            id,
            entry,
            released: false,
        }
    }

    /// Run every registered hook and wait for all of them.
    pub async fn run_all(&self) {
        let entries: Vec<(u64, Arc<HookEntry>)> = self.lock().drain().collect();
        if entries.is_empty() {
            return;
        }
        info!("Running {} shutdown hook(s)", entries.len());

        let mut pending = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            if !entry.claim() {
                continue;
            }
            let action = entry.action.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(action) = action {
                debug!("Firing shutdown hook {} ({})", id, entry.name);
                self.fired.fetch_add(1, Ordering::Relaxed);
                pending.push(action());
            }
        }

        join_all(pending).await;
    }

    /// Number of hooks currently registered.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no hook is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Registration counters.
    pub fn stats(&self) -> HookStats {
        HookStats {
            registered: self.registered.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            fired: self.fired.load(Ordering::Relaxed),
        }
    }

    fn deregister(&self, id: u64, entry: &HookEntry) {
        self.lock().remove(&id);
        if entry.claim() {
            entry.action.lock().unwrap_or_else(|e| e.into_inner()).take();
            self.removed.fetch_add(1, Ordering::Relaxed);
            debug!("Removed shutdown hook {} ({})", id, entry.name);
        } else {
            debug!("Shutdown hook {} ({}) already fired", id, entry.name);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<HookEntry>>> {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Registration guard returned by [`ShutdownHooks::register`].
///
/// Dropping the guard deregisters the hook.
pub struct ShutdownHook {
    registry: Arc<ShutdownHooks>,
    id: u64,
    entry: Arc<HookEntry>,
    released: bool,
}

impl ShutdownHook {
    /// Deregister the hook. A no-op if it already fired.
    pub fn remove(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.deregister(self.id, &self.entry);
        }
    }
}

impl Drop for ShutdownHook {
    fn drop(&mut self) {
        self.release();
    }
}

/// Wait for SIGINT or SIGTERM and return the signal's name.
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    info!("Received {}, running shutdown hooks", name);
    Ok(name)
}

/// Wait for Ctrl-C and return the signal's name.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, running shutdown hooks");
    Ok("CTRL-C")
}

/// Run `hooks` once `wait_for_signal` resolves. Returns the signal's name.
pub async fn run_hooks_on_signal(hooks: Arc<ShutdownHooks>) -> std::io::Result<&'static str> {
    let name = wait_for_signal().await.map_err(|e| {
        warn!("Failed to install signal handler: {}", e);
        e
    })?;
    hooks.run_all().await;
    Ok(name)
}
