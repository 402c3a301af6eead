use std::time::Duration;

use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::engine::{AnswerMap, EngineConfig};

/// Hex digest of the serialized answer map. `AnswerMap` iterates in key
/// order, so equal maps always hash equal.
pub fn answers_signature(answers: &AnswerMap) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in answers {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved,
    Error(String),
}

/// Decides when the answer map is pushed to the server. Pure policy: the
/// session owns the transport call and reports the outcome back here.
///
/// A push is due when the signature changed since the last confirmed save,
/// or when the heartbeat interval elapsed without one. Failures open a
/// backoff window that doubles up to a cap and resets on success.
pub struct AutosaveEngine {
    last_saved_signature: Option<String>,
    last_push_at: Option<OffsetDateTime>,
    next_allowed_at: Option<OffsetDateTime>,
    retry_pending: bool,
    current_backoff: Duration,
    backoff_base: Duration,
    backoff_cap: Duration,
    heartbeat: Duration,
    status: SaveStatus,
    save_version: i32,
}

impl AutosaveEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            last_saved_signature: None,
            last_push_at: None,
            next_allowed_at: None,
            retry_pending: false,
            current_backoff: config.backoff_base,
            backoff_base: config.backoff_base,
            backoff_cap: config.backoff_cap,
            heartbeat: config.heartbeat,
            status: SaveStatus::Idle,
            save_version: 0,
        }
    }

    pub fn status(&self) -> &SaveStatus {
        &self.status
    }

    /// Server-confirmed save counter, sent as `expected_version` on the next
    /// push so stale writers are rejected.
    pub fn save_version(&self) -> i32 {
        self.save_version
    }

    pub fn set_save_version(&mut self, version: i32) {
        self.save_version = version;
    }

    pub fn should_push(&self, answers: &AnswerMap, now: OffsetDateTime, online: bool) -> bool {
        if !online || self.status == SaveStatus::Saving {
            return false;
        }
        if let Some(next_allowed) = self.next_allowed_at {
            if now < next_allowed {
                return false;
            }
        }
        // A failed push left state the server never confirmed; retry as soon
        // as the backoff window closes.
        if self.retry_pending {
            return true;
        }
        let signature = answers_signature(answers);
        if self.last_saved_signature.as_deref() != Some(signature.as_str()) {
            return true;
        }
        match self.last_push_at {
            Some(last) => now - last >= self.heartbeat,
            None => true,
        }
    }

    pub fn begin(&mut self) {
        self.status = SaveStatus::Saving;
    }

    pub fn record_success(&mut self, answers: &AnswerMap, now: OffsetDateTime, save_version: i32) {
        self.last_saved_signature = Some(answers_signature(answers));
        self.last_push_at = Some(now);
        self.next_allowed_at = None;
        self.retry_pending = false;
        self.current_backoff = self.backoff_base;
        self.save_version = save_version;
        self.status = SaveStatus::Saved;
    }

    pub fn record_failure(&mut self, error: String, now: OffsetDateTime) {
        self.retry_pending = true;
        self.next_allowed_at = Some(now + self.current_backoff);
        self.current_backoff = (self.current_backoff * 2).min(self.backoff_cap);
        self.status = SaveStatus::Error(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn answers(pairs: &[(&str, &str)]) -> AnswerMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn engine() -> AutosaveEngine {
        AutosaveEngine::new(&EngineConfig::default())
    }

    const T0: OffsetDateTime = datetime!(2026-03-02 09:00 UTC);

    #[test]
    fn signature_tracks_content_not_insertion_order() {
        let a = answers(&[("q1", "A"), ("q2", "B")]);
        let b = answers(&[("q2", "B"), ("q1", "A")]);
        assert_eq!(answers_signature(&a), answers_signature(&b));
        assert_ne!(answers_signature(&a), answers_signature(&answers(&[("q1", "C")])));
    }

    #[test]
    fn unchanged_answers_are_not_repushed_until_heartbeat() {
        let mut engine = engine();
        let map = answers(&[("q1", "A")]);

        assert!(engine.should_push(&map, T0, true));
        engine.begin();
        engine.record_success(&map, T0, 1);

        // Same content on the next cycles stays quiet.
        assert!(!engine.should_push(&map, T0 + Duration::from_secs(30), true));
        assert!(!engine.should_push(&map, T0 + Duration::from_secs(90), true));

        // The heartbeat forces a liveness push even without changes.
        assert!(engine.should_push(&map, T0 + Duration::from_secs(120), true));
    }

    #[test]
    fn changed_answers_push_immediately() {
        let mut engine = engine();
        let map = answers(&[("q1", "A")]);
        engine.record_success(&map, T0, 1);

        let changed = answers(&[("q1", "A"), ("q2", "D")]);
        assert!(engine.should_push(&changed, T0 + Duration::from_secs(1), true));
    }

    #[test]
    fn offline_or_in_flight_blocks_pushes() {
        let mut engine = engine();
        let map = answers(&[("q1", "A")]);
        assert!(!engine.should_push(&map, T0, false));

        engine.begin();
        assert!(!engine.should_push(&map, T0, true));
    }

    #[test]
    fn failed_push_stays_due_until_it_succeeds() {
        let mut engine = engine();
        let map = answers(&[("q1", "A")]);
        engine.record_success(&map, T0, 1);

        // A heartbeat push fails; the same unchanged state is still owed to
        // the server once the backoff window closes.
        engine.record_failure("timeout".to_string(), T0 + Duration::from_secs(120));
        assert!(!engine.should_push(&map, T0 + Duration::from_secs(124), true));
        assert!(engine.should_push(&map, T0 + Duration::from_secs(125), true));

        engine.record_success(&map, T0 + Duration::from_secs(125), 2);
        assert!(!engine.should_push(&map, T0 + Duration::from_secs(126), true));
    }

    #[test]
    fn backoff_doubles_to_the_cap_and_resets_on_success() {
        let mut engine = engine();
        let map = answers(&[("q1", "A")]);

        // 5s, 10s, 20s, 40s, 80s, then pinned at 120s.
        let mut now = T0;
        for expected in [5u64, 10, 20, 40, 80, 120, 120] {
            engine.record_failure("502".to_string(), now);
            assert!(!engine.should_push(&map, now + Duration::from_secs(expected - 1), true));
            now += Duration::from_secs(expected);
            assert!(engine.should_push(&map, now, true));
        }
        assert_eq!(engine.status(), &SaveStatus::Error("502".to_string()));

        engine.record_success(&map, now, 3);
        assert_eq!(engine.status(), &SaveStatus::Saved);
        assert_eq!(engine.save_version(), 3);

        // The window restarts from the base after a success.
        engine.record_failure("502".to_string(), now);
        assert!(!engine.should_push(&map, now + Duration::from_secs(4), true));
        assert!(engine.should_push(&map, now + Duration::from_secs(5), true));
    }
}
