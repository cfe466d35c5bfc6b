//! Runtime snapshot providers and the notify-based directory watcher.
//!
//! The reloader never talks to the filesystem directly; it sees a `Runtime`
//! that yields point-in-time snapshots of named configuration blobs and
//! signals an edge on every change.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Point-in-time view of the runtime's configuration blobs.
#[derive(Debug, Clone, Default)]
pub struct RuntimeSnapshot {
    entries: BTreeMap<String, String>,
}

impl RuntimeSnapshot {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

/// Source of configuration blobs plus change notifications.
pub trait Runtime: Send + Sync + 'static {
    fn snapshot(&self) -> RuntimeSnapshot;

    /// Register a channel that receives an edge on every runtime change.
    /// Edges carry no payload; receivers re-snapshot on each one.
    fn add_update_callback(&self, tx: mpsc::UnboundedSender<()>);
}

type CallbackList = Arc<Mutex<Vec<mpsc::UnboundedSender<()>>>>;

/// Runtime backed by a directory of configuration files.
///
/// Every regular file directly under the directory is one runtime key; the
/// key is the file name, the value the raw file contents.
pub struct DirectoryRuntime {
    path: PathBuf,
    callbacks: CallbackList,
    // Dropping the watcher stops event delivery.
    _watcher: Mutex<RecommendedWatcher>,
}

impl DirectoryRuntime {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, notify::Error> {
        let path = path.into();
        let callbacks: CallbackList = Arc::default();

        let watcher_callbacks = Arc::clone(&callbacks);
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) if is_content_change(&event) => {
                    debug!(kind = ?event.kind, "runtime change detected");
                    let mut senders = watcher_callbacks.lock().unwrap();
                    senders.retain(|tx| tx.send(()).is_ok());
                }
                Ok(_) => {}
                Err(e) => error!("error watching runtime directory: {}", e),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        info!("watching runtime directory: {}", path.display());

        Ok(Self {
            path,
            callbacks,
            _watcher: Mutex::new(watcher),
        })
    }
}

fn is_content_change(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

impl Runtime for DirectoryRuntime {
    fn snapshot(&self) -> RuntimeSnapshot {
        let mut entries = BTreeMap::new();
        let dir = match std::fs::read_dir(&self.path) {
            Ok(dir) => dir,
            Err(e) => {
                error!("failed to read runtime directory {}: {}", self.path.display(), e);
                return RuntimeSnapshot::default();
            }
        };
        for file in dir.flatten() {
            let path = file.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match std::fs::read_to_string(&path) {
                Ok(body) => {
                    entries.insert(name.to_string(), body);
                }
                Err(e) => error!("failed to read runtime file {}: {}", path.display(), e),
            }
        }
        RuntimeSnapshot::new(entries)
    }

    fn add_update_callback(&self, tx: mpsc::UnboundedSender<()>) {
        self.callbacks.lock().unwrap().push(tx);
    }
}

/// In-memory runtime with manually triggered updates, for tests and
/// embedding.
#[derive(Default)]
pub struct StaticRuntime {
    entries: Mutex<BTreeMap<String, String>>,
    callbacks: Mutex<Vec<mpsc::UnboundedSender<()>>>,
}

impl StaticRuntime {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self {
            entries: Mutex::new(entries),
            callbacks: Mutex::default(),
        }
    }

    /// Replace one blob and signal an update edge.
    pub fn set(&self, key: impl Into<String>, body: impl Into<String>) {
        self.entries.lock().unwrap().insert(key.into(), body.into());
        self.fire();
    }

    /// Remove one blob and signal an update edge.
    pub fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
        self.fire();
    }

    fn fire(&self) {
        let mut senders = self.callbacks.lock().unwrap();
        senders.retain(|tx| tx.send(()).is_ok());
    }
}

impl Runtime for StaticRuntime {
    fn snapshot(&self) -> RuntimeSnapshot {
        RuntimeSnapshot::new(self.entries.lock().unwrap().clone())
    }

    fn add_update_callback(&self, tx: mpsc::UnboundedSender<()>) {
        self.callbacks.lock().unwrap().push(tx);
    }
}
