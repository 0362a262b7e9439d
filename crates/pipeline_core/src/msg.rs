use crate::{ChapterRef, JobKey, MangaRef, QueueSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Caller asked for a chapter download.
    Enqueue {
        manga: MangaRef,
        chapter: ChapterRef,
    },
    /// Claim the next queued job, if idle and not paused.
    ClaimNext,
    /// Page-level progress of the active job.
    Progress {
        key: JobKey,
        completed: usize,
        total: usize,
    },
    /// One download attempt of the active job ended.
    AttemptFinished {
        key: JobKey,
        outcome: AttemptOutcome,
    },
    /// Execution of the active job is over, whatever the outcome.
    Finalize { key: JobKey },
    Pause,
    Resume,
    Cancel { key: JobKey },
    /// Drop every terminal job from history.
    ClearHistory,
    /// Replace the state with a snapshot loaded from disk.
    Restore(QueueSnapshot),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    /// `permanent` failures skip the remaining attempts.
    Failed { message: String, permanent: bool },
    /// The job's handle was cancelled (pause or cancel).
    Interrupted,
}
