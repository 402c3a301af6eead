use crate::engine::transport::{AttemptApi, Question, SyncError};
use crate::engine::EngineConfig;

/// Fetches the attempt's questions in batches so the first render does not
/// wait on the whole paper. The next batch is requested when navigation gets
/// within `lookahead` questions of the loaded frontier.
pub struct ProgressiveLoader {
    loaded: Vec<Question>,
    total: Option<i64>,
    has_more: bool,
    batch_size: u32,
    lookahead: usize,
    loading: bool,
}

impl ProgressiveLoader {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            loaded: Vec::new(),
            total: None,
            has_more: true,
            batch_size: config.question_batch_size,
            lookahead: config.lookahead as usize,
            loading: false,
        }
    }

    /// Restores loader state from a persisted draft.
    pub fn hydrate(&mut self, questions: Vec<Question>, has_more: bool) {
        self.loaded = questions;
        self.has_more = has_more;
        self.total = None;
    }

    pub fn questions(&self) -> &[Question] {
        &self.loaded
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Total paper size as last reported by the server, if a batch has
    /// arrived yet.
    pub fn total(&self) -> Option<i64> {
        self.total
    }

    /// True when navigating to `index` should trigger a background fetch.
    pub fn needs_fetch(&self, index: usize) -> bool {
        self.has_more && !self.loading && index + self.lookahead >= self.loaded.len()
    }

    /// Client-side subject filter for multi-subject papers.
    pub fn for_subject<'a>(&'a self, subject: &'a str) -> impl Iterator<Item = &'a Question> {
        self.loaded.iter().filter(move |q| q.subject == subject)
    }

    /// Fetches the next batch. Returns how many questions are loaded after
    /// the call.
    pub async fn fetch_next(
        &mut self,
        api: &dyn AttemptApi,
        attempt_id: &str,
    ) -> Result<usize, SyncError> {
        if !self.has_more || self.loading {
            return Ok(self.loaded.len());
        }
        self.loading = true;
        let offset = self.loaded.len() as u32;
        let result = api.questions(attempt_id, offset, self.batch_size).await;
        self.loading = false;

        let batch = result?;
        self.total = Some(batch.total);
        self.loaded.extend(batch.questions);
        self.has_more = (self.loaded.len() as i64) < batch.total;
        Ok(self.loaded.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::transport::{
        Attempt, AttemptResults, AutosavePush, QuestionBatch, StartRequest, SubmitPush,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn question(number: i32, subject: &str) -> Question {
        Question {
            id: format!("q{number}"),
            question_number: number,
            text: format!("Question {number}"),
            options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            image_url: None,
            subject: subject.to_string(),
            paper_type: "obj".to_string(),
            marks: 1,
        }
    }

    struct BankApi {
        bank: Vec<Question>,
        calls: AtomicU32,
    }

    impl BankApi {
        fn with_size(total: usize) -> Self {
            Self {
                bank: (1..=total as i32).map(|n| question(n, "mathematics")).collect(),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl AttemptApi for BankApi {
        async fn start(&self, _request: &StartRequest) -> Result<Attempt, SyncError> {
            Err(SyncError::Retryable("not under test".into()))
        }

        async fn questions(
            &self,
            _attempt_id: &str,
            offset: u32,
            limit: u32,
        ) -> Result<QuestionBatch, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let start = offset as usize;
            let end = (start + limit as usize).min(self.bank.len());
            Ok(QuestionBatch {
                questions: self.bank[start..end].to_vec(),
                total: self.bank.len() as i64,
                offset,
            })
        }

        async fn autosave(
            &self,
            _attempt_id: &str,
            _push: &AutosavePush,
        ) -> Result<Attempt, SyncError> {
            Err(SyncError::Retryable("not under test".into()))
        }

        async fn submit(&self, _attempt_id: &str, _push: &SubmitPush) -> Result<Attempt, SyncError> {
            Err(SyncError::Retryable("not under test".into()))
        }

        async fn results(&self, _attempt_id: &str) -> Result<AttemptResults, SyncError> {
            Err(SyncError::Retryable("not under test".into()))
        }
    }

    fn loader() -> ProgressiveLoader {
        ProgressiveLoader::new(&EngineConfig::default())
    }

    #[tokio::test]
    async fn lookahead_triggers_the_next_batch() {
        let api = BankApi::with_size(45);
        let mut loader = loader();
        loader.fetch_next(&api, "a-1").await.unwrap();
        assert_eq!(loader.loaded_count(), 20);

        // Deep inside the loaded window nothing more is needed.
        assert!(!loader.needs_fetch(10));
        assert!(!loader.needs_fetch(14));

        // Within five questions of the frontier the next batch is due.
        assert!(loader.needs_fetch(16));
        loader.fetch_next(&api, "a-1").await.unwrap();
        assert_eq!(loader.loaded_count(), 40);
        assert!(loader.has_more());
    }

    #[tokio::test]
    async fn final_batch_clears_has_more() {
        let api = BankApi::with_size(45);
        let mut loader = loader();
        for _ in 0..3 {
            loader.fetch_next(&api, "a-1").await.unwrap();
        }
        assert_eq!(loader.loaded_count(), 45);
        assert!(!loader.has_more());
        assert_eq!(loader.total(), Some(45));
        assert!(!loader.needs_fetch(44));

        // Further calls are no-ops.
        loader.fetch_next(&api, "a-1").await.unwrap();
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn small_paper_loads_in_one_batch() {
        let api = BankApi::with_size(12);
        let mut loader = loader();
        loader.fetch_next(&api, "a-1").await.unwrap();
        assert_eq!(loader.loaded_count(), 12);
        assert!(!loader.has_more());
    }

    #[test]
    fn subject_filter_is_client_side() {
        let mut loader = loader();
        let mut bank = vec![question(1, "physics"), question(2, "chemistry")];
        bank.push(question(3, "physics"));
        loader.hydrate(bank, false);

        let physics: Vec<_> = loader.for_subject("physics").collect();
        assert_eq!(physics.len(), 2);
        assert_eq!(physics[1].question_number, 3);
    }
}
