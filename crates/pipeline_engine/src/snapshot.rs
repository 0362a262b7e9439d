use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use pipeline_core::QueueSnapshot;
use pipeline_logging::{pipeline_debug, pipeline_warn};

use crate::persist::AtomicFileWriter;

/// Queue snapshot on disk. Failures are logged and swallowed: a broken
/// snapshot must never stop the queue from running.
#[derive(Debug, Clone)]
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Option<QueueSnapshot> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                pipeline_warn!("Failed to read queue snapshot {}: {}", self.path.display(), err);
                return None;
            }
        };
        match ron::from_str::<QueueSnapshot>(&text) {
            Ok(snapshot) => {
                pipeline_debug!(
                    "Loaded queue snapshot: {} queued, {} in history, active={}",
                    snapshot.queue.len(),
                    snapshot.history.len(),
                    snapshot.active.is_some()
                );
                Some(snapshot)
            }
            Err(err) => {
                pipeline_warn!("Failed to parse queue snapshot {}: {}", self.path.display(), err);
                None
            }
        }
    }

    pub fn save(&self, snapshot: &QueueSnapshot) {
        let text = match ron::ser::to_string_pretty(snapshot, ron::ser::PrettyConfig::default()) {
            Ok(text) => text,
            Err(err) => {
                pipeline_warn!("Failed to serialize queue snapshot: {}", err);
                return;
            }
        };
        let (Some(dir), Some(name)) = (
            self.path.parent(),
            self.path.file_name().and_then(|n| n.to_str()),
        ) else {
            pipeline_warn!("Invalid snapshot path {}", self.path.display());
            return;
        };
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };
        if let Err(err) = AtomicFileWriter::new(dir.to_path_buf()).write_str(name, &text) {
            pipeline_warn!("Failed to write queue snapshot {}: {}", self.path.display(), err);
        }
    }
}

/// Saves numbered snapshots from any thread. A snapshot older than the one
/// already on disk is dropped, so writes finishing out of order never roll
/// the file back.
#[derive(Debug)]
pub(crate) struct SnapshotWriter {
    store: QueueStore,
    written: Mutex<u64>,
}

impl SnapshotWriter {
    pub(crate) fn new(store: QueueStore) -> Self {
        Self {
            store,
            written: Mutex::new(0),
        }
    }

    pub(crate) fn store(&self) -> &QueueStore {
        &self.store
    }

    /// Returns `false` if a newer snapshot was already written.
    pub(crate) fn write(&self, version: u64, snapshot: &QueueSnapshot) -> bool {
        let mut written = self
            .written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if version <= *written {
            pipeline_debug!("Skipping queue snapshot {} (have {})", version, *written);
            return false;
        }
        self.store.save(snapshot);
        *written = version;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::{ChapterRef, Job, JobStatus, MangaRef};

    fn job(chapter_url: &str, status: JobStatus) -> Job {
        let mut job = Job::new(
            MangaRef {
                source_id: 1,
                url: "/m".to_string(),
                title: "M".to_string(),
            },
            ChapterRef {
                url: chapter_url.to_string(),
                name: "C".to_string(),
            },
        );
        job.status = status;
        job
    }

    #[test]
    fn saved_snapshot_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("nested").join("queue.ron"));
        assert!(store.load().is_none());

        let mut failed = job("/c", JobStatus::Error);
        failed.error = Some("http status 500".to_string());
        let snapshot = QueueSnapshot {
            history: vec![failed],
            ..QueueSnapshot::default()
        };
        store.save(&snapshot);

        assert_eq!(store.load(), Some(snapshot));
    }

    #[test]
    fn corrupt_snapshot_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.ron");
        fs::write(&path, "not ron at all (").unwrap();
        assert!(QueueStore::new(path).load().is_none());
    }

    #[test]
    fn stale_snapshot_never_overwrites_a_newer_one() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(QueueStore::new(dir.path().join("queue.ron")));
        let newer = QueueSnapshot {
            history: vec![job("/c/1", JobStatus::Completed)],
            ..QueueSnapshot::default()
        };
        let older = QueueSnapshot {
            queue: vec![job("/c/1", JobStatus::Queued)],
            ..QueueSnapshot::default()
        };

        assert!(writer.write(2, &newer));
        assert!(!writer.write(1, &older));
        assert_eq!(writer.store().load(), Some(newer));
    }
}
