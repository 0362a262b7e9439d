use crate::{Job, JobKey, JobStatus};

/// Work the engine performs after a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Write the queue snapshot to disk.
    Persist,
    /// Start executing a freshly claimed job.
    Launch(Job),
    /// Wait `attempt * base_delay`, then attempt the active job again.
    Retry { key: JobKey, attempt: u32 },
    /// Cancel the job's current handle.
    CancelHandle(JobKey),
    /// Install a fresh, non-cancelled handle for the job.
    RenewHandle(JobKey),
    /// The job will never be claimed again; forget its handle.
    DropHandle(JobKey),
    /// Tell the library collaborator a chapter finished downloading.
    ChapterDownloaded(Job),
    /// Try to claim the next job.
    ProcessNext,
    Notify(QueueEvent),
}

/// Change notifications for whoever owns presentation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    StatusChanged { key: JobKey, status: JobStatus },
    Progress { key: JobKey, progress: u8 },
    QueueChanged,
    DownloadingChanged(bool),
}
