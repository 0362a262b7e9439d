use std::fmt;

use serde::{Deserialize, Serialize};

/// Attempts a chapter gets before it is marked `Error`.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MangaRef {
    pub source_id: i64,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChapterRef {
    pub url: String,
    pub name: String,
}

/// Identity of a job: the manga it belongs to plus the chapter URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub manga_url: String,
    pub chapter_url: String,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} :: {}", self.manga_url, self.chapter_url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Downloading,
    /// Waiting for (or running) attempt `attempt + 1` after `attempt` failures.
    Retrying { attempt: u32, max: u32 },
    Paused,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// Downloading, or its transient Retrying sub-state.
    pub fn is_running(self) -> bool {
        matches!(self, JobStatus::Downloading | JobStatus::Retrying { .. })
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "Queued"),
            JobStatus::Downloading => write!(f, "Downloading"),
            JobStatus::Retrying { attempt, max } => write!(f, "Retrying ({attempt}/{max})"),
            JobStatus::Paused => write!(f, "Paused"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Error => write!(f, "Error"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub manga: MangaRef,
    pub chapter: ChapterRef,
    pub status: JobStatus,
    pub progress: u8,
    pub retry_count: u32,
    #[serde(default)]
    pub error: Option<String>,
}

impl Job {
    pub fn new(manga: MangaRef, chapter: ChapterRef) -> Self {
        Self {
            manga,
            chapter,
            status: JobStatus::Queued,
            progress: 0,
            retry_count: 0,
            error: None,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey {
            manga_url: self.manga.url.clone(),
            chapter_url: self.chapter.url.clone(),
        }
    }

    pub fn has_key(&self, key: &JobKey) -> bool {
        self.manga.url == key.manga_url && self.chapter.url == key.chapter_url
    }

    /// Back to a claimable state. Attempts already spent still count.
    pub(crate) fn requeue(&mut self, paused: bool) {
        self.status = if paused {
            JobStatus::Paused
        } else {
            JobStatus::Queued
        };
        self.error = None;
    }
}
