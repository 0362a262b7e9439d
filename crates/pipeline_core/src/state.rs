use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{Job, JobKey, JobStatus, MAX_ATTEMPTS};

/// On-disk form of the queue. Cancellation handles are never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub queue: Vec<Job>,
    #[serde(default)]
    pub history: Vec<Job>,
    #[serde(default)]
    pub active: Option<Job>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueState {
    pub(crate) queue: VecDeque<Job>,
    pub(crate) history: Vec<Job>,
    pub(crate) active: Option<Job>,
    pub(crate) paused: bool,
    pub(crate) max_attempts: u32,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            history: Vec::new(),
            active: None,
            paused: false,
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn active(&self) -> Option<&Job> {
        self.active.as_ref()
    }

    pub fn queued(&self) -> impl Iterator<Item = &Job> {
        self.queue.iter()
    }

    pub fn history(&self) -> &[Job] {
        &self.history
    }

    /// Queued or active under this key.
    pub fn is_pending(&self, key: &JobKey) -> bool {
        self.active.as_ref().is_some_and(|job| job.has_key(key))
            || self.queue.iter().any(|job| job.has_key(key))
    }

    /// Whether a `ClaimNext` would launch a job right now.
    pub fn can_claim(&self) -> bool {
        !self.paused && self.active.is_none() && !self.queue.is_empty()
    }

    pub fn find(&self, key: &JobKey) -> Option<&Job> {
        self.active
            .iter()
            .chain(self.queue.iter())
            .chain(self.history.iter().rev())
            .find(|job| job.has_key(key))
    }

    /// Copy of every job: history, then the active job, then the queue.
    pub fn jobs(&self) -> Vec<Job> {
        self.history
            .iter()
            .chain(self.active.iter())
            .chain(self.queue.iter())
            .cloned()
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.jobs()
            .iter()
            .filter(|job| job.status.is_running())
            .count()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            queue: self.queue.iter().cloned().collect(),
            history: self.history.clone(),
            active: self.active.clone(),
        }
    }

    pub(crate) fn active_mut(&mut self, key: &JobKey) -> Option<&mut Job> {
        self.active.as_mut().filter(|job| job.has_key(key))
    }

    pub(crate) fn pending_status(&self) -> JobStatus {
        if self.paused {
            JobStatus::Paused
        } else {
            JobStatus::Queued
        }
    }
}
