use sqlx::PgExecutor;

use crate::db::models::Question;

const QUESTION_COLUMNS: &str =
    "q.id, q.exam_id, q.question_number, q.text, q.options, q.correct_answer, q.explanation, \
     q.image_url, q.answer_url, q.subject, q.exam_type, q.year, q.paper_type, q.marks, q.created_at";

/// Record the sampled paper for a practice attempt, positions in serve order.
pub(crate) async fn insert<'e>(
    executor: impl PgExecutor<'e>,
    attempt_id: &str,
    question_ids: &[String],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO attempt_papers (attempt_id, position, question_id) \
         SELECT $1, t.ordinality - 1, t.id \
         FROM UNNEST($2::text[]) WITH ORDINALITY AS t(id, ordinality)",
    )
    .bind(attempt_id)
    .bind(question_ids)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn count<'e>(
    executor: impl PgExecutor<'e>,
    attempt_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM attempt_papers WHERE attempt_id = $1")
        .bind(attempt_id)
        .fetch_one(executor)
        .await
}

pub(crate) async fn list_questions<'e>(
    executor: impl PgExecutor<'e>,
    attempt_id: &str,
    offset: i64,
    limit: i64,
) -> Result<Vec<Question>, sqlx::Error> {
    let query = format!(
        "SELECT {QUESTION_COLUMNS} FROM attempt_papers ap \
         JOIN questions q ON q.id = ap.question_id \
         WHERE ap.attempt_id = $1 ORDER BY ap.position OFFSET $2 LIMIT $3"
    );
    sqlx::query_as::<_, Question>(&query)
        .bind(attempt_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(executor)
        .await
}
