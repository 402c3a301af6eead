use std::sync::Arc;

use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::engine::autosave::{AutosaveEngine, SaveStatus};
use crate::engine::draft::{unix_now, DraftStore, LocalDraft};
use crate::engine::env::{Clock, DeterrenceHooks, DynClock, EnvEvent};
use crate::engine::loader::ProgressiveLoader;
use crate::engine::queue::{QueueEntry, QueueKind, QueueStore};
use crate::engine::security::{SecurityAction, SecurityMonitor};
use crate::engine::timer::{AttemptTimer, TimeWarning};
use crate::engine::transport::{
    Attempt, AttemptApi, AttemptStatus, AutosavePush, StartRequest, SubmitPush, SyncError,
    TerminalError,
};
use crate::engine::{AnswerMap, EngineConfig};

const LOCAL_PREFIX: &str = "local-";
const PRACTICE_PREFIX: &str = "practice-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Starting,
    Active,
    Paused,
    Submitting,
    Submitted,
}

/// Signals surfaced to the host UI from a tick or environment event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Warning(TimeWarning),
    AutoSubmitted,
    ViolationRaised { warnings: u32 },
    ViolationCleared,
    /// A queued submission reached the server.
    SubmissionConfirmed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The server accepted and graded the attempt. The record is absent only
    /// when delivery was confirmed indirectly (already-submitted response).
    Completed(Option<Box<Attempt>>),
    /// Captured in the offline queue; delivery happens on reconnect.
    Queued,
}

/// One exam-taking session, driven by the host: `on_second` once per
/// wall-clock second, `handle_env` for browser signals, `record_answer` on
/// input. All composition is single-writer; at most one server write is in
/// flight at a time.
pub struct AttemptSession {
    config: EngineConfig,
    api: Arc<dyn AttemptApi>,
    drafts: Arc<dyn DraftStore>,
    queue: Arc<dyn QueueStore>,
    clock: DynClock,
    security: SecurityMonitor,
    timer: AttemptTimer,
    loader: ProgressiveLoader,
    autosave: AutosaveEngine,
    phase: Phase,
    attempt: Option<Attempt>,
    start_request: Option<StartRequest>,
    answers: AnswerMap,
    time_spent: i32,
    online: bool,
    dirty_since: Option<OffsetDateTime>,
    seconds_since_remote: u64,
    unversioned_push: bool,
    auto_submitted: bool,
    awaiting_delivery: bool,
    confirmed: Option<Attempt>,
}

impl AttemptSession {
    pub fn new(
        api: Arc<dyn AttemptApi>,
        drafts: Arc<dyn DraftStore>,
        queue: Arc<dyn QueueStore>,
        clock: DynClock,
        deterrence: Arc<dyn DeterrenceHooks>,
        config: EngineConfig,
    ) -> Self {
        Self {
            loader: ProgressiveLoader::new(&config),
            autosave: AutosaveEngine::new(&config),
            security: SecurityMonitor::new(deterrence),
            timer: AttemptTimer::new(0),
            config,
            api,
            drafts,
            queue,
            clock,
            phase: Phase::Uninitialized,
            attempt: None,
            start_request: None,
            answers: AnswerMap::new(),
            time_spent: 0,
            online: true,
            dirty_since: None,
            seconds_since_remote: 0,
            unversioned_push: false,
            auto_submitted: false,
            awaiting_delivery: false,
            confirmed: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn answers(&self) -> &AnswerMap {
        &self.answers
    }

    pub fn time_left(&self) -> u32 {
        self.timer.remaining()
    }

    pub fn security_warnings(&self) -> u32 {
        self.security.warnings()
    }

    pub fn save_status(&self) -> &SaveStatus {
        self.autosave.status()
    }

    pub fn loader(&self) -> &ProgressiveLoader {
        &self.loader
    }

    pub fn attempt(&self) -> Option<&Attempt> {
        self.attempt.as_ref()
    }

    /// True when a submission is acknowledged locally but not yet delivered.
    pub fn awaiting_delivery(&self) -> bool {
        self.awaiting_delivery
    }

    /// Final server record, once a submission has been confirmed.
    pub fn result(&self) -> Option<&Attempt> {
        self.confirmed.as_ref()
    }

    fn attempt_id(&self) -> Option<&str> {
        self.attempt.as_ref().map(|a| a.id.as_str())
    }

    fn is_local_attempt(&self) -> bool {
        self.attempt_id().is_some_and(|id| id.starts_with(LOCAL_PREFIX))
    }

    /// Starts or resumes an attempt. Fails closed: on error no attempt is
    /// assumed to exist and the session stays uninitialized. The one
    /// exception is an unreachable server for a practice exam, which runs
    /// locally and is materialized on reconnect.
    pub async fn start(&mut self, request: StartRequest) -> Result<(), SyncError> {
        if self.phase != Phase::Uninitialized {
            return Err(SyncError::Terminal(TerminalError::InvalidState));
        }
        self.phase = Phase::Starting;

        let attempt = match self.api.start(&request).await {
            Ok(attempt) => attempt,
            Err(SyncError::Retryable(reason))
                if request.exam_id.starts_with(PRACTICE_PREFIX) =>
            {
                warn!(%reason, "starting practice attempt locally");
                self.online = false;
                synthesize_local_attempt(&request)
            }
            Err(err) => {
                self.phase = Phase::Uninitialized;
                return Err(err);
            }
        };

        self.install(attempt);
        self.start_request = Some(request);
        self.security.engage();
        self.phase = Phase::Active;

        if self.online && !self.is_local_attempt() && self.loader.loaded_count() == 0 {
            if let Some(id) = self.attempt_id().map(str::to_string) {
                if let Err(err) = self.loader.fetch_next(self.api.as_ref(), &id).await {
                    warn!(error = %err, "initial question batch unavailable");
                }
            }
        }
        self.save_draft();
        Ok(())
    }

    fn install(&mut self, attempt: Attempt) {
        self.answers = attempt.answers.clone();
        self.time_spent = attempt.time_spent_seconds;
        self.autosave.set_save_version(attempt.save_version);

        let served = duration_seconds(&attempt).saturating_sub(attempt.time_spent_seconds.max(0) as u32);
        let draft = match self.drafts.load(&attempt.id) {
            Ok(draft) => draft,
            Err(err) => {
                warn!(error = %err, "draft load failed; using server state");
                None
            }
        };
        match draft {
            Some(draft) => {
                self.answers = draft.answers;
                let restored = if draft.time_left_seconds > 0 {
                    draft.time_left_seconds.min(u32::MAX as u64) as u32
                } else {
                    served
                };
                self.timer = AttemptTimer::new(restored);
                self.loader.hydrate(draft.loaded_questions, draft.has_more_questions);
            }
            None => {
                self.timer = AttemptTimer::new(served);
            }
        }
        self.attempt = Some(attempt);
    }

    /// Records an answer. Input is blocked outside the active phase.
    pub fn record_answer(&mut self, question_id: &str, value: &str) {
        if self.phase != Phase::Active {
            return;
        }
        self.answers.insert(question_id.to_string(), value.to_string());
        self.dirty_since = Some(self.clock.now());
    }

    /// Prefetches the next batch when navigation approaches the loaded
    /// frontier.
    pub async fn ensure_questions(&mut self, index: usize) {
        if !self.online || self.is_local_attempt() || !self.loader.needs_fetch(index) {
            return;
        }
        if let Some(id) = self.attempt_id().map(str::to_string) {
            if let Err(err) = self.loader.fetch_next(self.api.as_ref(), &id).await {
                warn!(error = %err, "question batch fetch failed");
            }
        }
    }

    /// One wall-clock second. Drives the countdown, the local debounce
    /// flush, and the remote autosave cadence.
    pub async fn on_second(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if !matches!(self.phase, Phase::Active | Phase::Paused) {
            return events;
        }

        if self.phase == Phase::Active {
            self.time_spent += 1;
        }
        let tick = self.timer.tick();
        if let Some(warning) = tick.warning {
            events.push(SessionEvent::Warning(warning));
        }

        // Time-up overrides pause.
        if self.timer.remaining() == 0 && !self.auto_submitted {
            match self.do_submit().await {
                Ok(_) => {
                    self.auto_submitted = true;
                    events.push(SessionEvent::AutoSubmitted);
                }
                Err(err) if err.is_retryable() => {
                    // The next tick attempts the submission again.
                    warn!(error = %err, "auto-submit failed");
                }
                Err(err) => {
                    self.auto_submitted = true;
                    warn!(error = %err, "auto-submit rejected");
                }
            }
            return events;
        }

        // Both save cadences run only while active.
        if self.phase != Phase::Active {
            return events;
        }
        let now = self.clock.now();
        if let Some(since) = self.dirty_since {
            if now - since >= self.config.local_debounce {
                self.save_draft();
                self.dirty_since = None;
            }
        }

        self.seconds_since_remote += 1;
        if self.seconds_since_remote >= self.config.remote_interval.as_secs() {
            self.seconds_since_remote = 0;
            // Offline ticks skip silently; the local draft already holds the
            // state and the next online tick pushes the latest snapshot.
            if self.online
                && !self.is_local_attempt()
                && self.autosave.should_push(&self.answers, now, true)
            {
                self.push_autosave(now).await;
            }
        }
        events
    }

    async fn push_autosave(&mut self, now: OffsetDateTime) {
        let Some(id) = self.attempt_id().map(str::to_string) else {
            return;
        };
        self.autosave.begin();
        let snapshot = self.answers.clone();
        let push = AutosavePush {
            answers: snapshot.clone(),
            time_spent_seconds: self.time_spent,
            save_version: if self.unversioned_push {
                None
            } else {
                Some(self.autosave.save_version())
            },
        };
        match self.api.autosave(&id, &push).await {
            Ok(attempt) => {
                self.autosave.record_success(&snapshot, now, attempt.save_version);
                self.unversioned_push = false;
            }
            Err(SyncError::Retryable(reason)) => {
                self.autosave.record_failure(reason, now);
            }
            Err(SyncError::Terminal(TerminalError::VersionConflict { .. })) => {
                // Another writer advanced the counter. Single-tab sessions
                // never hit this; the next push overwrites unconditionally.
                warn!(attempt_id = %id, "autosave version conflict");
                self.unversioned_push = true;
                self.autosave.record_failure("version conflict".to_string(), now);
            }
            Err(SyncError::Terminal(TerminalError::AlreadySubmitted { .. })) => {
                self.adopt_submitted(None);
            }
            Err(err) => {
                self.autosave.record_failure(err.to_string(), now);
            }
        }
    }

    /// Explicit submission, also used by the violation modal's force-submit.
    /// Idempotent once submitted.
    pub async fn submit(&mut self) -> Result<SubmitOutcome, SyncError> {
        match self.phase {
            Phase::Submitted => Ok(match &self.confirmed {
                Some(attempt) => SubmitOutcome::Completed(Some(Box::new(attempt.clone()))),
                None if self.awaiting_delivery => SubmitOutcome::Queued,
                None => SubmitOutcome::Completed(None),
            }),
            Phase::Active | Phase::Paused => self.do_submit().await,
            _ => Err(SyncError::Terminal(TerminalError::InvalidState)),
        }
    }

    async fn do_submit(&mut self) -> Result<SubmitOutcome, SyncError> {
        let Some(id) = self.attempt_id().map(str::to_string) else {
            return Err(SyncError::Terminal(TerminalError::InvalidState));
        };
        let prior = self.phase;
        self.phase = Phase::Submitting;
        self.save_draft();

        if self.online && !self.is_local_attempt() {
            let push = SubmitPush {
                answers: self.answers.clone(),
                time_spent_seconds: self.time_spent,
            };
            match self.api.submit(&id, &push).await {
                Ok(attempt) => {
                    self.adopt_submitted(Some(attempt.clone()));
                    self.delete_draft(&id);
                    self.drop_queued(&id);
                    return Ok(SubmitOutcome::Completed(Some(Box::new(attempt))));
                }
                Err(SyncError::Terminal(TerminalError::AlreadySubmitted { .. })) => {
                    // Delivered by an earlier request; fetch the record if
                    // the server will share it.
                    let attempt = match self.api.results(&id).await {
                        Ok(results) => Some(results.attempt),
                        Err(err) => {
                            warn!(error = %err, "results unavailable after submit");
                            None
                        }
                    };
                    self.adopt_submitted(attempt.clone());
                    self.delete_draft(&id);
                    self.drop_queued(&id);
                    return Ok(SubmitOutcome::Completed(attempt.map(Box::new)));
                }
                Err(SyncError::Retryable(reason)) => {
                    warn!(%reason, "submit deferred to the offline queue");
                }
                Err(err) => {
                    self.phase = prior;
                    return Err(err);
                }
            }
        }

        // Offline, local, or transiently failing: capture durably and
        // acknowledge. The draft survives until delivery is confirmed.
        if let Err(err) = self.enqueue_submit(&id) {
            // Nothing was captured; the session must stay submittable.
            self.phase = prior;
            return Err(err);
        }
        self.awaiting_delivery = true;
        self.adopt_submitted(None);
        Ok(SubmitOutcome::Queued)
    }

    fn enqueue_submit(&mut self, attempt_id: &str) -> Result<(), SyncError> {
        match self.queue.list() {
            Ok(entries) => {
                for entry in entries
                    .iter()
                    .filter(|e| e.kind == QueueKind::Submit && e.attempt_id == attempt_id)
                {
                    if let Err(err) = self.queue.remove(&entry.id) {
                        warn!(error = %err, "duplicate submit entry not removed");
                    }
                }
            }
            Err(err) => warn!(error = %err, "queue list failed"),
        }
        let entry = QueueEntry::new(
            QueueKind::Submit,
            attempt_id,
            self.answers.clone(),
            self.time_spent,
        );
        self.queue
            .append(&entry)
            .map_err(|err| SyncError::Retryable(format!("offline queue unavailable: {err}")))
    }

    fn adopt_submitted(&mut self, attempt: Option<Attempt>) {
        if let Some(attempt) = attempt {
            self.confirmed = Some(attempt);
            self.awaiting_delivery = false;
        }
        self.phase = Phase::Submitted;
        self.security.release();
    }

    /// Browser-level signal. `Online` triggers queue replay; proctoring
    /// signals drive the pause overlay and the countdown pause.
    pub async fn handle_env(&mut self, event: EnvEvent) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        match event {
            EnvEvent::Offline => self.online = false,
            EnvEvent::Online => {
                self.online = true;
                events.extend(self.replay_queue().await);
            }
            _ => {
                if let Some(action) = self.security.observe(event) {
                    match action {
                        SecurityAction::Violation { warnings } => {
                            if self.phase == Phase::Active {
                                self.phase = Phase::Paused;
                                self.timer.pause();
                            }
                            events.push(SessionEvent::ViolationRaised { warnings });
                        }
                        SecurityAction::ClearedForResume => {
                            if self.phase == Phase::Paused {
                                self.phase = Phase::Active;
                                self.timer.resume();
                            }
                            events.push(SessionEvent::ViolationCleared);
                        }
                    }
                }
            }
        }
        events
    }

    /// Drains the offline queue in order. A retryable failure stops the
    /// drain with the entry intact; an already-submitted response counts as
    /// delivery.
    pub async fn replay_queue(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        let entries = match self.queue.list() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "queue replay skipped");
                return events;
            }
        };

        for entry in entries {
            let target = match self.resolve_attempt_id(&entry.attempt_id).await {
                Ok(Some(id)) => id,
                Ok(None) => return events,
                Err(()) => {
                    // The attempt can never materialize; its writes are
                    // undeliverable.
                    self.remove_entry(&entry.id);
                    continue;
                }
            };

            let outcome = match entry.kind {
                QueueKind::Autosave => {
                    let push = AutosavePush {
                        answers: entry.answers.clone(),
                        time_spent_seconds: entry.time_spent_seconds,
                        save_version: None,
                    };
                    self.api.autosave(&target, &push).await.map(|_| ())
                }
                QueueKind::Submit => {
                    let push = SubmitPush {
                        answers: entry.answers.clone(),
                        time_spent_seconds: entry.time_spent_seconds,
                    };
                    match self.api.submit(&target, &push).await {
                        Ok(attempt) => {
                            self.confirm_delivery(&target, Some(attempt));
                            events.push(SessionEvent::SubmissionConfirmed);
                            Ok(())
                        }
                        Err(SyncError::Terminal(TerminalError::AlreadySubmitted { .. })) => {
                            self.confirm_delivery(&target, None);
                            events.push(SessionEvent::SubmissionConfirmed);
                            Ok(())
                        }
                        Err(err) => Err(err),
                    }
                }
            };

            match outcome {
                Ok(()) => self.remove_entry(&entry.id),
                Err(SyncError::Terminal(TerminalError::AlreadySubmitted { .. })) => {
                    self.remove_entry(&entry.id);
                }
                Err(SyncError::Retryable(reason)) => {
                    warn!(%reason, "queue replay paused");
                    return events;
                }
                Err(err) => {
                    warn!(error = %err, "queued write rejected");
                    self.remove_entry(&entry.id);
                }
            }
        }
        events
    }

    /// Maps a locally synthesized attempt id to a server one, starting the
    /// attempt on first use. `Ok(None)` means try again later.
    async fn resolve_attempt_id(&mut self, entry_attempt_id: &str) -> Result<Option<String>, ()> {
        if !entry_attempt_id.starts_with(LOCAL_PREFIX) {
            return Ok(Some(entry_attempt_id.to_string()));
        }
        if self.attempt_id() != Some(entry_attempt_id) {
            // A leftover from a session whose start request is gone.
            return Err(());
        }
        if !self.is_local_attempt() {
            return Ok(self.attempt_id().map(str::to_string));
        }
        let Some(request) = self.start_request.clone() else {
            return Err(());
        };
        match self.api.start(&request).await {
            Ok(mut attempt) => {
                let id = attempt.id.clone();
                attempt.answers = self.answers.clone();
                let timer_left = self.timer.remaining();
                self.delete_draft(entry_attempt_id);
                self.attempt = Some(attempt);
                self.timer = AttemptTimer::new(timer_left);
                Ok(Some(id))
            }
            Err(SyncError::Terminal(TerminalError::AlreadyActive {
                attempt_id: Some(id),
            })) => {
                if let Some(attempt) = self.attempt.as_mut() {
                    attempt.id = id.clone();
                }
                Ok(Some(id))
            }
            Err(SyncError::Retryable(reason)) => {
                warn!(%reason, "local attempt not materialized yet");
                Ok(None)
            }
            Err(err) => {
                warn!(error = %err, "local attempt rejected by the server");
                Err(())
            }
        }
    }

    fn confirm_delivery(&mut self, attempt_id: &str, attempt: Option<Attempt>) {
        if self.attempt_id() == Some(attempt_id)
            || self.attempt_id().is_none()
            || self.awaiting_delivery
        {
            if let Some(attempt) = attempt {
                self.confirmed = Some(attempt);
            }
            self.awaiting_delivery = false;
            self.phase = Phase::Submitted;
            self.security.release();
        }
        self.delete_draft(attempt_id);
    }

    fn remove_entry(&self, entry_id: &str) {
        if let Err(err) = self.queue.remove(entry_id) {
            warn!(error = %err, "queue entry not removed");
        }
    }

    fn save_draft(&mut self) {
        let Some(id) = self.attempt_id().map(str::to_string) else {
            return;
        };
        let draft = LocalDraft {
            answers: self.answers.clone(),
            time_left_seconds: self.timer.remaining() as u64,
            loaded_questions: self.loader.questions().to_vec(),
            has_more_questions: self.loader.has_more(),
            updated_at: unix_now(),
        };
        if let Err(err) = self.drafts.save(&id, &draft) {
            warn!(error = %err, "draft save failed");
        }
    }

    fn delete_draft(&self, attempt_id: &str) {
        if let Err(err) = self.drafts.delete(attempt_id) {
            warn!(error = %err, "draft delete failed");
        }
    }

    fn drop_queued(&self, attempt_id: &str) {
        match self.queue.list() {
            Ok(entries) => {
                for entry in entries.iter().filter(|e| e.attempt_id == attempt_id) {
                    self.remove_entry(&entry.id);
                }
            }
            Err(err) => warn!(error = %err, "queue list failed"),
        }
    }
}

fn duration_seconds(attempt: &Attempt) -> u32 {
    (attempt.duration_minutes.max(0) as u32) * 60
}

/// Practice attempt run entirely on this machine until the server is
/// reachable. Durations mirror the server's sizing for each exam type.
fn synthesize_local_attempt(request: &StartRequest) -> Attempt {
    let exam_type = request
        .exam_id
        .strip_prefix(PRACTICE_PREFIX)
        .unwrap_or_default();
    let duration_minutes = match exam_type {
        "jamb" => 120,
        "waec" | "neco" => 90,
        _ => 60,
    };
    Attempt {
        id: format!("{LOCAL_PREFIX}{}", Uuid::new_v4()),
        exam_id: request.exam_id.clone(),
        student_id: format!("{LOCAL_PREFIX}candidate"),
        status: AttemptStatus::InProgress,
        answers: AnswerMap::new(),
        subjects: request.subjects.clone(),
        duration_minutes,
        started_at: None,
        submitted_at: None,
        last_saved_at: None,
        time_spent_seconds: 0,
        score: None,
        total_questions: None,
        percentage: None,
        passed: None,
        save_version: 0,
    }
}
