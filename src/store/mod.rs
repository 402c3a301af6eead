pub(crate) mod memory;
pub(crate) mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::core::time::format_primitive;
use crate::db::models::{Exam, ExamAttempt, Question};
use crate::db::types::{AttemptStatus, PaperType};
use crate::services::answers::{AnswerCodec, AnswerError, AnswerMap};
use crate::services::scoring::ScoreSummary;

/// Authoritative attempt record keeper. The HTTP layer and tests talk to this
/// trait; production wires the Postgres implementation, tests the in-memory
/// one.
#[async_trait]
pub(crate) trait AttemptStore: Send + Sync {
    /// Backend liveness probe for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn exam_overview(
        &self,
        identity: &Identity,
        exam_id: &str,
        practice: &PracticeQuery,
    ) -> Result<ExamOverview, StoreError>;

    async fn start_attempt(
        &self,
        identity: &Identity,
        request: StartAttempt,
    ) -> Result<AttemptRecord, StoreError>;

    /// Window of the attempt's paper, in paper order, with grading fields
    /// withheld.
    async fn attempt_questions(
        &self,
        identity: &Identity,
        attempt_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<QuestionBatch, StoreError>;

    async fn autosave(
        &self,
        identity: &Identity,
        attempt_id: &str,
        request: AutosaveRequest,
    ) -> Result<AttemptRecord, StoreError>;

    async fn submit(
        &self,
        identity: &Identity,
        attempt_id: &str,
        request: SubmitRequest,
    ) -> Result<AttemptRecord, StoreError>;

    async fn results(
        &self,
        identity: &Identity,
        attempt_id: &str,
    ) -> Result<AttemptResults, StoreError>;

    async fn list_attempts(
        &self,
        identity: &Identity,
        student_id: Option<&str>,
    ) -> Result<Vec<AttemptRecord>, StoreError>;
}

pub(crate) type DynAttemptStore = Arc<dyn AttemptStore>;

/// Caller identity as established by the request guard. Guests may only run
/// practice sessions; staff identities read any attempt but own none.
#[derive(Debug, Clone)]
pub(crate) enum Identity {
    Student { id: String },
    Staff { id: String },
    Guest { id: String },
}

impl Identity {
    pub(crate) fn storage_id(&self) -> &str {
        match self {
            Identity::Student { id } | Identity::Staff { id } | Identity::Guest { id } => id,
        }
    }

    pub(crate) fn is_staff(&self) -> bool {
        matches!(self, Identity::Staff { .. })
    }

    pub(crate) fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest { .. })
    }

    pub(crate) fn owns(&self, student_id: &str) -> bool {
        self.storage_id() == student_id
    }

    pub(crate) fn may_view(&self, student_id: &str) -> bool {
        self.is_staff() || self.owns(student_id)
    }
}

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("exam not found")]
    ExamNotFound,
    #[error("attempt not found")]
    AttemptNotFound,
    #[error("you do not have access to this exam")]
    AccessDenied,
    #[error("an attempt for this exam is already in progress")]
    AlreadyActive { attempt_id: String },
    #[error("this attempt has already been submitted")]
    AlreadySubmitted { attempt_id: String },
    #[error("attempt belongs to another student")]
    NotOwner,
    #[error("attempt is not in progress")]
    NotInProgress,
    #[error("attempt is still in progress")]
    StillInProgress,
    #[error("stale write rejected, attempt is at version {current}")]
    VersionConflict { current: i32 },
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Answers(#[from] AnswerError),
    #[error("failed to serialize answer payload")]
    Serialization(#[from] serde_json::Error),
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PracticeQuery {
    pub(crate) subjects: Vec<String>,
    pub(crate) year: Option<String>,
    pub(crate) paper_type: Option<PaperType>,
}

#[derive(Debug, Clone)]
pub(crate) struct StartAttempt {
    pub(crate) exam_id: String,
    pub(crate) subjects: Vec<String>,
    pub(crate) year: Option<String>,
    pub(crate) paper_type: Option<PaperType>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct AutosaveRequest {
    pub(crate) answers: Option<AnswerMap>,
    pub(crate) time_spent_seconds: Option<i32>,
    /// Optimistic concurrency token. When set, a mismatch with the stored
    /// `save_version` rejects the write instead of overwriting a newer one.
    pub(crate) expected_version: Option<i32>,
}

#[derive(Debug, Clone)]
pub(crate) struct SubmitRequest {
    pub(crate) answers: AnswerMap,
    pub(crate) time_spent_seconds: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AttemptRecord {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) answers: AnswerMap,
    pub(crate) subjects: Vec<String>,
    pub(crate) duration_minutes: i32,
    pub(crate) started_at: String,
    pub(crate) submitted_at: Option<String>,
    pub(crate) last_saved_at: Option<String>,
    pub(crate) time_spent_seconds: i32,
    pub(crate) score: Option<i32>,
    pub(crate) total_questions: Option<i32>,
    pub(crate) percentage: Option<i32>,
    pub(crate) passed: Option<bool>,
    pub(crate) save_version: i32,
}

impl AttemptRecord {
    pub(crate) fn from_row(
        row: &ExamAttempt,
        codec: &AnswerCodec,
        duration_minutes: i32,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.id.clone(),
            exam_id: row.exam_id.clone(),
            student_id: row.student_id.clone(),
            status: row.status,
            answers: codec.decode(&row.answers.0)?,
            subjects: row.subjects.0.clone(),
            duration_minutes,
            started_at: format_primitive(row.started_at),
            submitted_at: row.submitted_at.map(format_primitive),
            last_saved_at: row.last_saved_at.map(format_primitive),
            time_spent_seconds: row.time_spent_seconds,
            score: row.score,
            total_questions: row.total_questions,
            percentage: row.percentage,
            passed: row.passed,
            save_version: row.save_version,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ExamOverview {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) exam_type: String,
    pub(crate) subject: String,
    pub(crate) year: Option<String>,
    pub(crate) duration_minutes: i32,
    pub(crate) question_count: i64,
    pub(crate) practice: bool,
}

impl ExamOverview {
    pub(crate) fn from_exam(exam: &Exam, question_count: i64, practice: bool) -> Self {
        Self {
            id: exam.id.clone(),
            title: exam.title.clone(),
            exam_type: exam.exam_type.clone(),
            subject: exam.subject.clone(),
            year: exam.year.clone(),
            duration_minutes: exam.duration_minutes,
            question_count,
            practice,
        }
    }
}

/// A question as delivered mid-attempt. Grading fields never leave the
/// server while the attempt is in progress.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct QuestionView {
    pub(crate) id: String,
    pub(crate) question_number: i32,
    pub(crate) text: String,
    pub(crate) options: Vec<String>,
    pub(crate) image_url: Option<String>,
    pub(crate) subject: String,
    pub(crate) paper_type: PaperType,
    pub(crate) marks: i32,
}

impl QuestionView {
    pub(crate) fn from_question(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            question_number: question.question_number,
            text: question.text.clone(),
            options: question.options.0.clone(),
            image_url: question.image_url.clone(),
            subject: question.subject.clone(),
            paper_type: question.paper_type,
            marks: question.marks,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct QuestionBatch {
    pub(crate) questions: Vec<QuestionView>,
    pub(crate) total: i64,
    pub(crate) offset: u32,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReviewQuestion {
    pub(crate) id: String,
    pub(crate) question_number: i32,
    pub(crate) text: String,
    pub(crate) options: Vec<String>,
    pub(crate) correct_answer: String,
    pub(crate) explanation: Option<String>,
    pub(crate) chosen: Option<String>,
    pub(crate) correct: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AttemptResults {
    pub(crate) attempt: AttemptRecord,
    pub(crate) summary: ScoreSummary,
    pub(crate) questions: Vec<ReviewQuestion>,
}

/// Review rows pair each paper question with the answer the candidate gave,
/// looked up the same way scoring does.
pub(crate) fn review_questions(paper: &[Question], answers: &AnswerMap) -> Vec<ReviewQuestion> {
    paper
        .iter()
        .enumerate()
        .map(|(index, question)| {
            let chosen = answers
                .get(&index.to_string())
                .or_else(|| answers.get(&question.id))
                .cloned();
            let correct = chosen.as_deref() == Some(question.correct_answer.as_str());
            ReviewQuestion {
                id: question.id.clone(),
                question_number: question.question_number,
                text: question.text.clone(),
                options: question.options.0.clone(),
                correct_answer: question.correct_answer.clone(),
                explanation: question.explanation.clone(),
                chosen,
                correct,
            }
        })
        .collect()
}
