use sqlx::PgExecutor;

use crate::db::models::Exam;

const COLUMNS: &str =
    "id, title, exam_type, subject, year, duration_minutes, created_by, created_at, updated_at";

pub(crate) async fn find_by_id<'e>(
    executor: impl PgExecutor<'e>,
    exam_id: &str,
) -> Result<Option<Exam>, sqlx::Error> {
    let query = format!("SELECT {COLUMNS} FROM exams WHERE id = $1");
    sqlx::query_as::<_, Exam>(&query)
        .bind(exam_id)
        .fetch_optional(executor)
        .await
}
