use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::AnswerMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
}

/// Attempt record as the server reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: String,
    pub exam_id: String,
    pub student_id: String,
    pub status: AttemptStatus,
    #[serde(default)]
    pub answers: AnswerMap,
    #[serde(default)]
    pub subjects: Vec<String>,
    pub duration_minutes: i32,
    pub started_at: Option<String>,
    pub submitted_at: Option<String>,
    pub last_saved_at: Option<String>,
    #[serde(default)]
    pub time_spent_seconds: i32,
    pub score: Option<i32>,
    pub total_questions: Option<i32>,
    pub percentage: Option<i32>,
    pub passed: Option<bool>,
    #[serde(default)]
    pub save_version: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub question_number: i32,
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub image_url: Option<String>,
    pub subject: String,
    pub paper_type: String,
    #[serde(default = "default_marks")]
    pub marks: i32,
}

fn default_marks() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBatch {
    pub questions: Vec<Question>,
    pub total: i64,
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub score: i32,
    pub total_questions: i32,
    pub percentage: i32,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewQuestion {
    pub id: String,
    pub question_number: i32,
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub correct_answer: String,
    pub explanation: Option<String>,
    pub chosen: Option<String>,
    pub correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptResults {
    pub attempt: Attempt,
    pub summary: ResultSummary,
    #[serde(default)]
    pub questions: Vec<ReviewQuestion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartRequest {
    pub exam_id: String,
    #[serde(default)]
    pub subjects: Vec<String>,
    pub year: Option<String>,
    pub paper_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutosavePush {
    pub answers: AnswerMap,
    pub time_spent_seconds: i32,
    pub save_version: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitPush {
    pub answers: AnswerMap,
    pub time_spent_seconds: i32,
}

/// Failures the caller must not retry. Each one needs a user-facing path
/// (back to the exam list, view results, refresh state) instead of another
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminalError {
    #[error("access denied")]
    AccessDenied,
    #[error("not found")]
    NotFound,
    #[error("an attempt is already active")]
    AlreadyActive { attempt_id: Option<String> },
    #[error("attempt already submitted")]
    AlreadySubmitted { attempt_id: Option<String> },
    #[error("attempt is not in a state that allows this operation")]
    InvalidState,
    #[error("stale write rejected at version {current:?}")]
    VersionConflict { current: Option<i32> },
    #[error("{0}")]
    Validation(String),
}

/// Tagged failure type for every server interaction. Retryable failures are
/// recovered internally (backoff, offline queue); terminal ones are not.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("retryable: {0}")]
    Retryable(String),
    #[error(transparent)]
    Terminal(TerminalError),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Retryable(_))
    }
}

#[async_trait]
pub trait AttemptApi: Send + Sync {
    async fn start(&self, request: &StartRequest) -> Result<Attempt, SyncError>;
    async fn questions(
        &self,
        attempt_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<QuestionBatch, SyncError>;
    async fn autosave(&self, attempt_id: &str, push: &AutosavePush) -> Result<Attempt, SyncError>;
    async fn submit(&self, attempt_id: &str, push: &SubmitPush) -> Result<Attempt, SyncError>;
    async fn results(&self, attempt_id: &str) -> Result<AttemptResults, SyncError>;
}

/// Production transport talking to the attempt endpoints over HTTP.
pub struct HttpAttemptApi {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
    guest_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: String,
    code: Option<String>,
    attempt_id: Option<String>,
}

impl HttpAttemptApi {
    /// `base_url` includes the API prefix, e.g. `https://host/api/cbt`.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
            guest_id: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Stable guest id for unauthenticated practice sessions.
    pub fn with_guest_id(mut self, guest_id: impl Into<String>) -> Self {
        self.guest_id = Some(guest_id.into());
        self
    }

    fn decorate(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };
        match &self.guest_id {
            Some(guest_id) => builder.header("x-guest-id", guest_id),
            None => builder,
        }
    }

    async fn read<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SyncError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|err| SyncError::Retryable(format!("malformed response: {err}")));
        }

        let body = response.json::<ErrorBody>().await.unwrap_or(ErrorBody {
            detail: status.to_string(),
            code: None,
            attempt_id: None,
        });
        Err(classify_failure(status, body))
    }
}

fn classify_failure(status: StatusCode, body: ErrorBody) -> SyncError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SyncError::Terminal(TerminalError::AccessDenied)
        }
        StatusCode::NOT_FOUND => SyncError::Terminal(TerminalError::NotFound),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            SyncError::Terminal(TerminalError::Validation(body.detail))
        }
        StatusCode::CONFLICT => match body.code.as_deref() {
            Some("already_active") => SyncError::Terminal(TerminalError::AlreadyActive {
                attempt_id: body.attempt_id,
            }),
            Some("already_submitted") => SyncError::Terminal(TerminalError::AlreadySubmitted {
                attempt_id: body.attempt_id,
            }),
            Some("version_conflict") => {
                SyncError::Terminal(TerminalError::VersionConflict { current: None })
            }
            _ => SyncError::Terminal(TerminalError::InvalidState),
        },
        _ => SyncError::Retryable(format!("server error {status}: {}", body.detail)),
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Retryable(err.to_string())
    }
}

#[async_trait]
impl AttemptApi for HttpAttemptApi {
    async fn start(&self, request: &StartRequest) -> Result<Attempt, SyncError> {
        let url = format!("{}/attempts", self.base_url);
        let response = self.decorate(self.client.post(url)).json(request).send().await?;
        Self::read(response).await
    }

    async fn questions(
        &self,
        attempt_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<QuestionBatch, SyncError> {
        let url = format!(
            "{}/attempts/{attempt_id}/questions?offset={offset}&limit={limit}",
            self.base_url
        );
        let response = self.decorate(self.client.get(url)).send().await?;
        Self::read(response).await
    }

    async fn autosave(&self, attempt_id: &str, push: &AutosavePush) -> Result<Attempt, SyncError> {
        let url = format!("{}/attempts/{attempt_id}/autosave", self.base_url);
        let response = self.decorate(self.client.post(url)).json(push).send().await?;
        Self::read(response).await
    }

    async fn submit(&self, attempt_id: &str, push: &SubmitPush) -> Result<Attempt, SyncError> {
        let url = format!("{}/attempts/{attempt_id}/submit", self.base_url);
        let response = self.decorate(self.client.post(url)).json(push).send().await?;
        Self::read(response).await
    }

    async fn results(&self, attempt_id: &str) -> Result<AttemptResults, SyncError> {
        let url = format!("{}/attempts/{attempt_id}/results", self.base_url);
        let response = self.decorate(self.client.get(url)).send().await?;
        Self::read(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: Option<&str>) -> ErrorBody {
        ErrorBody {
            detail: "detail".to_string(),
            code: code.map(str::to_string),
            attempt_id: Some("a-1".to_string()),
        }
    }

    #[test]
    fn conflict_codes_map_to_terminal_variants() {
        assert_eq!(
            classify_failure(StatusCode::CONFLICT, body(Some("already_submitted"))),
            SyncError::Terminal(TerminalError::AlreadySubmitted {
                attempt_id: Some("a-1".to_string())
            })
        );
        assert_eq!(
            classify_failure(StatusCode::CONFLICT, body(Some("already_active"))),
            SyncError::Terminal(TerminalError::AlreadyActive {
                attempt_id: Some("a-1".to_string())
            })
        );
        assert!(matches!(
            classify_failure(StatusCode::CONFLICT, body(Some("version_conflict"))),
            SyncError::Terminal(TerminalError::VersionConflict { .. })
        ));
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(classify_failure(StatusCode::INTERNAL_SERVER_ERROR, body(None)).is_retryable());
        assert!(classify_failure(StatusCode::BAD_GATEWAY, body(None)).is_retryable());
    }

    #[test]
    fn access_errors_are_terminal() {
        assert!(!classify_failure(StatusCode::FORBIDDEN, body(None)).is_retryable());
        assert!(!classify_failure(StatusCode::NOT_FOUND, body(None)).is_retryable());
    }
}
