use sqlx::PgExecutor;

use crate::db::models::Question;
use crate::db::types::PaperType;

const COLUMNS: &str = "id, exam_id, question_number, text, options, correct_answer, explanation, \
                       image_url, answer_url, subject, exam_type, year, paper_type, marks, created_at";

pub(crate) async fn count_for_exam<'e>(
    executor: impl PgExecutor<'e>,
    exam_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM questions WHERE exam_id = $1")
        .bind(exam_id)
        .fetch_one(executor)
        .await
}

/// Questions for one exam in paper order, windowed for progressive delivery.
pub(crate) async fn list_for_exam<'e>(
    executor: impl PgExecutor<'e>,
    exam_id: &str,
    offset: i64,
    limit: i64,
) -> Result<Vec<Question>, sqlx::Error> {
    let query = format!(
        "SELECT {COLUMNS} FROM questions WHERE exam_id = $1 \
         ORDER BY question_number, id OFFSET $2 LIMIT $3"
    );
    sqlx::query_as::<_, Question>(&query)
        .bind(exam_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(executor)
        .await
}

pub(crate) async fn list_all_for_exam<'e>(
    executor: impl PgExecutor<'e>,
    exam_id: &str,
) -> Result<Vec<Question>, sqlx::Error> {
    let query = format!(
        "SELECT {COLUMNS} FROM questions WHERE exam_id = $1 ORDER BY question_number, id"
    );
    sqlx::query_as::<_, Question>(&query)
        .bind(exam_id)
        .fetch_all(executor)
        .await
}

/// Bank questions for practice synthesis. Sampling happens in the service
/// layer so the same RNG path covers the in-memory store.
pub(crate) async fn list_bank<'e>(
    executor: impl PgExecutor<'e>,
    exam_type: &str,
    subject: &str,
    paper_type: PaperType,
) -> Result<Vec<Question>, sqlx::Error> {
    let query = format!(
        "SELECT {COLUMNS} FROM questions \
         WHERE exam_type = $1 AND subject = $2 AND paper_type = $3"
    );
    sqlx::query_as::<_, Question>(&query)
        .bind(exam_type)
        .bind(subject)
        .bind(paper_type)
        .fetch_all(executor)
        .await
}
