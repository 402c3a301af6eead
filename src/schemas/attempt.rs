use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::services::answers::AnswerMap;
use crate::store::AttemptRecord;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct StartAttemptRequest {
    #[validate(length(min = 1, message = "exam_id must not be empty"))]
    pub(crate) exam_id: String,
    #[serde(default)]
    pub(crate) subjects: Vec<String>,
    pub(crate) year: Option<String>,
    pub(crate) paper_type: Option<String>,
}

/// Autosave body. `answers`, when present, replaces the stored map wholesale;
/// the client always pushes its full current answer set.
#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AutosaveAttemptRequest {
    pub(crate) answers: Option<AnswerMap>,
    #[validate(range(min = 0, message = "time_spent_seconds must not be negative"))]
    pub(crate) time_spent_seconds: Option<i32>,
    pub(crate) save_version: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SubmitAttemptRequest {
    pub(crate) answers: AnswerMap,
    #[validate(range(min = 0, message = "time_spent_seconds must not be negative"))]
    pub(crate) time_spent_seconds: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListAttemptsQuery {
    pub(crate) student_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QuestionBatchQuery {
    #[serde(default)]
    pub(crate) offset: u32,
    pub(crate) limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptListResponse {
    pub(crate) attempts: Vec<AttemptRecord>,
    pub(crate) total: usize,
}
