use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU8, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use tracing::debug;

use crate::utils::MutexUtils;

#[derive(Debug)]
struct Entry {
    value: Arc<AtomicU8>,
    holders: usize,
}

/// Progress of the running jobs, keyed by video identifier.
///
/// Jobs own a [`ProgressHandle`] for as long as they run, readers look the
/// value up by key. A key nobody holds reads as 0.
#[derive(Debug, Clone, Default)]
pub struct ProgressRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    watchers: Arc<AtomicUsize>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking the progress of a job.
    ///
    /// Concurrent jobs for the same video share the entry,
    /// which is removed when the last handle is dropped.
    pub fn register(&self, key: &str) -> ProgressHandle {
        let value = self.entries.with_lock(|mut entries| {
            let entry = entries.entry(key.to_owned()).or_insert_with(|| Entry {
                value: Arc::new(AtomicU8::new(0)),
                holders: 0,
            });
            entry.holders += 1;
            entry.value.clone()
        });

        ProgressHandle {
            key: key.to_owned(),
            value,
            registry: self.clone(),
        }
    }

    /// Last known progress of the video, 0 if unknown
    pub fn current(&self, key: &str) -> u8 {
        self.entries.with_lock(|entries| {
            entries
                .get(key)
                .map_or(0, |entry| entry.value.load(Ordering::Relaxed))
        })
    }

    /// Number of videos currently tracked
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.with_lock(|entries| entries.len())
    }

    /// Mark a reader as listening to a key until the returned guard is dropped
    pub fn watch(&self, key: &str) -> ProgressWatch {
        self.watchers.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Progress stream for '{key}' opened, {} listening",
            self.watchers()
        );

        ProgressWatch {
            key: key.to_owned(),
            registry: self.clone(),
        }
    }

    /// Number of readers currently listening
    pub fn watchers(&self) -> usize {
        self.watchers.load(Ordering::Relaxed)
    }

    fn release(&self, key: &str) {
        self.entries.with_lock(|mut entries| {
            if let Some(entry) = entries.get_mut(key) {
                entry.holders -= 1;
                if entry.holders == 0 {
                    entries.remove(key);
                }
            }
        });
    }
}

/// Write side of a job progress, released on drop
#[derive(Debug)]
pub struct ProgressHandle {
    key: String,
    value: Arc<AtomicU8>,
    registry: ProgressRegistry,
}

impl ProgressHandle {
    /// Raise the progress to `percent`, clamped to 100.
    /// Progress never goes backwards.
    pub fn set(&self, percent: u8) {
        self.value.fetch_max(percent.min(100), Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn get(&self) -> u8 {
        self.value.load(Ordering::Relaxed)
    }

    /// Report a stage-local percentage into the `[from, to]` range of the job
    pub fn set_scaled(&self, local: f64, from: u8, to: u8) {
        let local = local.clamp(0.0, 100.0);
        let span = f64::from(to.saturating_sub(from));
        self.set(from + (span * local / 100.0) as u8);
    }
}

impl Drop for ProgressHandle {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

/// Read side marker of a progress stream
#[derive(Debug)]
pub struct ProgressWatch {
    key: String,
    registry: ProgressRegistry,
}

impl ProgressWatch {
    pub fn current(&self) -> u8 {
        self.registry.current(&self.key)
    }
}

impl Drop for ProgressWatch {
    fn drop(&mut self) {
        self.registry.watchers.fetch_sub(1, Ordering::Relaxed);
        debug!("Progress stream for '{}' closed", self.key);
    }
}
