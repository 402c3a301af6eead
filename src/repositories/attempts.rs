use sqlx::types::Json;
use sqlx::PgExecutor;
use time::PrimitiveDateTime;

use crate::db::models::ExamAttempt;

const COLUMNS: &str = "id, exam_id, student_id, status, answers, subjects, started_at, \
                       submitted_at, last_saved_at, time_spent_seconds, score, total_questions, \
                       percentage, passed, save_version, created_at, updated_at";

pub(crate) struct CreateAttempt {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) answers: serde_json::Value,
    pub(crate) subjects: Vec<String>,
    pub(crate) total_questions: Option<i32>,
    pub(crate) started_at: PrimitiveDateTime,
}

/// Insert a new in-progress attempt. Returns `None` when the partial unique
/// index already holds an active row for this (student, exam), in which case
/// the caller re-reads the winner.
pub(crate) async fn create<'e>(
    executor: impl PgExecutor<'e>,
    attempt: &CreateAttempt,
) -> Result<Option<ExamAttempt>, sqlx::Error> {
    let query = format!(
        "INSERT INTO exam_attempts \
             (id, exam_id, student_id, status, answers, subjects, started_at, \
              total_questions, created_at, updated_at) \
         VALUES ($1, $2, $3, 'in_progress', $4, $5, $6, $7, $6, $6) \
         ON CONFLICT (student_id, exam_id) WHERE status = 'in_progress' DO NOTHING \
         RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, ExamAttempt>(&query)
        .bind(&attempt.id)
        .bind(&attempt.exam_id)
        .bind(&attempt.student_id)
        .bind(Json(&attempt.answers))
        .bind(Json(&attempt.subjects))
        .bind(attempt.started_at)
        .bind(attempt.total_questions)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn find_by_id<'e>(
    executor: impl PgExecutor<'e>,
    attempt_id: &str,
) -> Result<Option<ExamAttempt>, sqlx::Error> {
    let query = format!("SELECT {COLUMNS} FROM exam_attempts WHERE id = $1");
    sqlx::query_as::<_, ExamAttempt>(&query)
        .bind(attempt_id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn find_active<'e>(
    executor: impl PgExecutor<'e>,
    student_id: &str,
    exam_id: &str,
) -> Result<Option<ExamAttempt>, sqlx::Error> {
    let query = format!(
        "SELECT {COLUMNS} FROM exam_attempts \
         WHERE student_id = $1 AND exam_id = $2 AND status = 'in_progress'"
    );
    sqlx::query_as::<_, ExamAttempt>(&query)
        .bind(student_id)
        .bind(exam_id)
        .fetch_optional(executor)
        .await
}

/// Persist a periodic save. The `status = 'in_progress'` guard makes a save
/// that races submission a no-op instead of a resurrection, and the
/// `save_version` predicate rejects a stale writer in the same statement so
/// two concurrent saves cannot both pass a read-then-write check.
pub(crate) async fn update_auto_save<'e>(
    executor: impl PgExecutor<'e>,
    attempt_id: &str,
    answers: &serde_json::Value,
    time_spent_seconds: i32,
    expected_version: Option<i32>,
    now: PrimitiveDateTime,
) -> Result<Option<ExamAttempt>, sqlx::Error> {
    let query = format!(
        "UPDATE exam_attempts \
         SET answers = $2, time_spent_seconds = $3, last_saved_at = $4, \
             save_version = save_version + 1, updated_at = $4 \
         WHERE id = $1 AND status = 'in_progress' \
           AND ($5::integer IS NULL OR save_version = $5) \
         RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, ExamAttempt>(&query)
        .bind(attempt_id)
        .bind(Json(answers))
        .bind(time_spent_seconds)
        .bind(now)
        .bind(expected_version)
        .fetch_optional(executor)
        .await
}

pub(crate) struct SubmitAttempt<'a> {
    pub(crate) answers: &'a serde_json::Value,
    pub(crate) time_spent_seconds: i32,
    pub(crate) score: i32,
    pub(crate) total_questions: i32,
    pub(crate) percentage: i32,
    pub(crate) passed: bool,
    pub(crate) submitted_at: PrimitiveDateTime,
}

pub(crate) async fn submit<'e>(
    executor: impl PgExecutor<'e>,
    attempt_id: &str,
    update: &SubmitAttempt<'_>,
) -> Result<Option<ExamAttempt>, sqlx::Error> {
    let query = format!(
        "UPDATE exam_attempts \
         SET status = 'completed', answers = $2, time_spent_seconds = $3, score = $4, \
             total_questions = $5, percentage = $6, passed = $7, submitted_at = $8, \
             updated_at = $8 \
         WHERE id = $1 AND status = 'in_progress' \
         RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, ExamAttempt>(&query)
        .bind(attempt_id)
        .bind(Json(update.answers))
        .bind(update.time_spent_seconds)
        .bind(update.score)
        .bind(update.total_questions)
        .bind(update.percentage)
        .bind(update.passed)
        .bind(update.submitted_at)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn list_for_student<'e>(
    executor: impl PgExecutor<'e>,
    student_id: &str,
) -> Result<Vec<ExamAttempt>, sqlx::Error> {
    let query = format!(
        "SELECT {COLUMNS} FROM exam_attempts WHERE student_id = $1 ORDER BY created_at DESC"
    );
    sqlx::query_as::<_, ExamAttempt>(&query)
        .bind(student_id)
        .fetch_all(executor)
        .await
}
