//! Pipeline core: job model and the pure download-queue state machine.
mod effect;
mod job;
mod listing;
mod msg;
mod state;
mod update;

pub use effect::{Effect, QueueEvent};
pub use job::{ChapterRef, Job, JobKey, JobStatus, MangaRef, MAX_ATTEMPTS};
pub use listing::{Chapter, Manga, MangaListing};
pub use msg::{AttemptOutcome, Msg};
pub use state::{QueueSnapshot, QueueState};
pub use update::update;
