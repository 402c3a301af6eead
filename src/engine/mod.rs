//! Client-side exam session engine.
//!
//! Everything here runs on the candidate's machine: the attempt state
//! machine, countdown timer, proctoring signals, progressive question
//! loading, and the local-draft + remote autosave protocol with offline
//! queuing. The server is reached only through the [`transport::AttemptApi`]
//! trait, so hosts and tests can substitute their own wiring.

pub mod autosave;
pub mod draft;
pub mod env;
pub mod loader;
pub mod machine;
pub mod queue;
pub mod security;
pub mod timer;
pub mod transport;

use std::collections::BTreeMap;
use std::time::Duration;

/// Answers keyed by question position or id, value is the chosen option or
/// free text. Ordered keys keep change signatures stable.
pub type AnswerMap = BTreeMap<String, String>;

/// Cadence and sizing knobs for one exam session.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between an answer change and the local draft write.
    pub local_debounce: Duration,
    /// Fixed interval between remote autosave checks.
    pub remote_interval: Duration,
    /// Push even without changes once this much time passed since the last
    /// successful save.
    pub heartbeat: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub question_batch_size: u32,
    pub lookahead: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            local_debounce: Duration::from_secs(2),
            remote_interval: Duration::from_secs(30),
            heartbeat: Duration::from_secs(120),
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(120),
            question_batch_size: 20,
            lookahead: 5,
        }
    }
}
