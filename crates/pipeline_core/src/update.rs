use crate::{
    AttemptOutcome, ChapterRef, Effect, Job, JobKey, JobStatus, MangaRef, Msg, QueueEvent,
    QueueSnapshot, QueueState,
};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: QueueState, msg: Msg) -> (QueueState, Vec<Effect>) {
    let effects = match msg {
        Msg::Enqueue { manga, chapter } => enqueue(&mut state, manga, chapter),
        Msg::ClaimNext => claim_next(&mut state),
        Msg::Progress {
            key,
            completed,
            total,
        } => match state.active_mut(&key) {
            Some(job) if job.status.is_running() && total > 0 => {
                let progress = (completed.min(total) * 100 / total) as u8;
                job.progress = progress;
                vec![Effect::Notify(QueueEvent::Progress { key, progress })]
            }
            _ => Vec::new(),
        },
        Msg::AttemptFinished { key, outcome } => attempt_finished(&mut state, key, outcome),
        Msg::Finalize { key } => finalize(&mut state, key),
        Msg::Pause => pause(&mut state),
        Msg::Resume => resume(&mut state),
        Msg::Cancel { key } => cancel(&mut state, key),
        Msg::ClearHistory => {
            state.history.retain(|job| !job.status.is_terminal());
            vec![Effect::Notify(QueueEvent::QueueChanged), Effect::Persist]
        }
        Msg::Restore(snapshot) => restore(&mut state, snapshot),
    };

    (state, effects)
}

fn enqueue(state: &mut QueueState, manga: MangaRef, chapter: ChapterRef) -> Vec<Effect> {
    let mut job = Job::new(manga, chapter);
    let key = job.key();
    if state.is_pending(&key) {
        return Vec::new();
    }
    job.status = state.pending_status();
    state.queue.push_back(job);
    vec![
        Effect::RenewHandle(key),
        Effect::Persist,
        Effect::Notify(QueueEvent::QueueChanged),
        Effect::ProcessNext,
    ]
}

fn claim_next(state: &mut QueueState) -> Vec<Effect> {
    if !state.can_claim() {
        return Vec::new();
    }
    let Some(mut job) = state.queue.pop_front() else {
        return Vec::new();
    };
    job.status = JobStatus::Downloading;
    job.error = None;
    let key = job.key();
    state.active = Some(job.clone());
    vec![
        Effect::Persist,
        Effect::Notify(QueueEvent::DownloadingChanged(true)),
        Effect::Notify(QueueEvent::StatusChanged {
            key,
            status: JobStatus::Downloading,
        }),
        Effect::Launch(job),
    ]
}

fn attempt_finished(state: &mut QueueState, key: JobKey, outcome: AttemptOutcome) -> Vec<Effect> {
    let max_attempts = state.max_attempts;
    let Some(job) = state.active_mut(&key) else {
        return Vec::new();
    };
    // Pause and cancel already set the status before the handle fired.
    if !job.status.is_running() {
        return Vec::new();
    }

    match outcome {
        AttemptOutcome::Succeeded => {
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.error = None;
            vec![
                Effect::Notify(QueueEvent::StatusChanged {
                    key,
                    status: JobStatus::Completed,
                }),
                Effect::ChapterDownloaded(job.clone()),
            ]
        }
        AttemptOutcome::Interrupted => {
            job.status = JobStatus::Cancelled;
            vec![Effect::Notify(QueueEvent::StatusChanged {
                key,
                status: JobStatus::Cancelled,
            })]
        }
        AttemptOutcome::Failed { message, permanent } => {
            job.retry_count += 1;
            if !permanent && job.retry_count < max_attempts {
                let status = JobStatus::Retrying {
                    attempt: job.retry_count,
                    max: max_attempts,
                };
                job.status = status;
                job.error = Some(message);
                vec![
                    Effect::Notify(QueueEvent::StatusChanged {
                        key: key.clone(),
                        status,
                    }),
                    Effect::Retry {
                        key,
                        attempt: job.retry_count,
                    },
                ]
            } else {
                job.status = JobStatus::Error;
                job.error = Some(message);
                vec![Effect::Notify(QueueEvent::StatusChanged {
                    key,
                    status: JobStatus::Error,
                })]
            }
        }
    }
}

fn finalize(state: &mut QueueState, key: JobKey) -> Vec<Effect> {
    if state.active_mut(&key).is_none() {
        return Vec::new();
    }
    let Some(mut job) = state.active.take() else {
        return Vec::new();
    };

    let mut effects = Vec::new();
    if job.status.is_terminal() {
        state.history.push(job);
        effects.push(Effect::DropHandle(key));
    } else {
        // Paused, or an execution that ended without reaching a verdict.
        job.requeue(state.paused);
        let status = job.status;
        state.queue.push_front(job);
        effects.push(Effect::RenewHandle(key.clone()));
        effects.push(Effect::Notify(QueueEvent::StatusChanged { key, status }));
    }
    effects.extend([
        Effect::Notify(QueueEvent::QueueChanged),
        Effect::Notify(QueueEvent::DownloadingChanged(false)),
        Effect::Persist,
        Effect::ProcessNext,
    ]);
    effects
}

fn pause(state: &mut QueueState) -> Vec<Effect> {
    state.paused = true;
    let mut effects = Vec::new();
    if let Some(job) = state.active.as_mut() {
        if job.status.is_running() {
            job.status = JobStatus::Paused;
            let key = job.key();
            effects.push(Effect::CancelHandle(key.clone()));
            effects.push(Effect::Notify(QueueEvent::StatusChanged {
                key,
                status: JobStatus::Paused,
            }));
        }
    }
    for job in state.queue.iter_mut() {
        if job.status == JobStatus::Queued {
            job.status = JobStatus::Paused;
            effects.push(Effect::Notify(QueueEvent::StatusChanged {
                key: job.key(),
                status: JobStatus::Paused,
            }));
        }
    }
    effects.push(Effect::Persist);
    effects
}

fn resume(state: &mut QueueState) -> Vec<Effect> {
    state.paused = false;
    let mut effects = Vec::new();
    for job in state.queue.iter_mut() {
        if job.status == JobStatus::Paused {
            job.status = JobStatus::Queued;
            effects.push(Effect::Notify(QueueEvent::StatusChanged {
                key: job.key(),
                status: JobStatus::Queued,
            }));
        }
    }
    effects.push(Effect::Persist);
    effects.push(Effect::ProcessNext);
    effects
}

fn cancel(state: &mut QueueState, key: JobKey) -> Vec<Effect> {
    if let Some(job) = state.active_mut(&key) {
        if job.status.is_terminal() {
            return Vec::new();
        }
        // Finalize moves it to history once the execution task observes the handle.
        job.status = JobStatus::Cancelled;
        return vec![
            Effect::CancelHandle(key.clone()),
            Effect::Notify(QueueEvent::StatusChanged {
                key,
                status: JobStatus::Cancelled,
            }),
            Effect::Persist,
        ];
    }

    if let Some(position) = state.queue.iter().position(|job| job.has_key(&key)) {
        let Some(mut job) = state.queue.remove(position) else {
            return Vec::new();
        };
        job.status = JobStatus::Cancelled;
        state.history.push(job);
        return vec![
            Effect::CancelHandle(key.clone()),
            Effect::DropHandle(key.clone()),
            Effect::Notify(QueueEvent::StatusChanged {
                key,
                status: JobStatus::Cancelled,
            }),
            Effect::Notify(QueueEvent::QueueChanged),
            Effect::Persist,
        ];
    }

    if let Some(position) = state.history.iter().rposition(|job| job.has_key(&key)) {
        state.history.remove(position);
        return vec![Effect::Notify(QueueEvent::QueueChanged), Effect::Persist];
    }

    Vec::new()
}

fn restore(state: &mut QueueState, snapshot: QueueSnapshot) -> Vec<Effect> {
    let QueueSnapshot {
        queue,
        history,
        active,
    } = snapshot;

    state.queue.clear();
    state.history = history;
    state.active = None;

    // An interrupted active job goes back to the head of the queue.
    for mut job in active.into_iter().chain(queue) {
        if job.status.is_terminal() {
            state.history.push(job);
            continue;
        }
        if state.is_pending(&job.key()) {
            continue;
        }
        job.requeue(state.paused);
        // A restart starts the attempt chain over.
        job.retry_count = 0;
        state.queue.push_back(job);
    }

    let mut effects: Vec<Effect> = state
        .queue
        .iter()
        .map(|job| Effect::RenewHandle(job.key()))
        .collect();
    effects.extend([
        Effect::Notify(QueueEvent::QueueChanged),
        Effect::Persist,
        Effect::ProcessNext,
    ]);
    effects
}
