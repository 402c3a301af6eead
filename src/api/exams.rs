use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::api::errors::ApiError;
use crate::api::guards::AttemptIdentity;
use crate::core::state::AppState;
use crate::schemas::exam::{parse_paper_type, PracticeExamQuery};
use crate::store::{ExamOverview, PracticeQuery};

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/:id", get(exam_overview))
}

async fn exam_overview(
    State(state): State<AppState>,
    AttemptIdentity(identity): AttemptIdentity,
    Path(exam_id): Path<String>,
    Query(query): Query<PracticeExamQuery>,
) -> Result<Json<ExamOverview>, ApiError> {
    let paper_type = parse_paper_type(query.paper_type.as_deref())
        .map_err(ApiError::BadRequest)?;
    let practice = PracticeQuery {
        subjects: query.subject_list(),
        year: query.year.clone(),
        paper_type,
    };
    let overview = state.store().exam_overview(&identity, &exam_id, &practice).await?;
    Ok(Json(overview))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use tower::ServiceExt;

    use crate::core::security::Role;
    use crate::test_support;

    #[tokio::test]
    async fn assigned_student_sees_exam_overview() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_assigned_exam(&ctx.store, "exam-1", "student-1");
        let token = test_support::bearer_token("student-1", Role::Student, ctx.state.settings());

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::GET,
                "/api/cbt/exams/exam-1",
                Some(&token),
                None,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let overview = test_support::read_json(response).await;
        assert_eq!(overview["question_count"], 3);
        assert_eq!(overview["duration_minutes"], 90);
        assert_eq!(overview["practice"], false);
    }

    #[tokio::test]
    async fn unassigned_student_cannot_see_exam() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_assigned_exam(&ctx.store, "exam-1", "student-1");
        let token = test_support::bearer_token("student-2", Role::Student, ctx.state.settings());

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::GET,
                "/api/cbt/exams/exam-1",
                Some(&token),
                None,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn practice_overview_sizes_the_paper() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_practice_bank(&ctx.store, "jamb", "english", 40);
        test_support::seed_practice_bank(&ctx.store, "jamb", "physics", 7);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::guest_json_request(
                Method::GET,
                "/api/cbt/exams/practice-jamb?subjects=english,physics",
                "g-1",
                None,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let overview = test_support::read_json(response).await;
        // 12 from the large bank, the whole 7-question bank otherwise.
        assert_eq!(overview["question_count"], 19);
        assert_eq!(overview["duration_minutes"], 120);
        assert_eq!(overview["practice"], true);
        assert_eq!(overview["id"], "practice-jamb");
    }

    #[tokio::test]
    async fn practice_overview_requires_subjects() {
        let ctx = test_support::setup_test_context().await;

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::guest_json_request(
                Method::GET,
                "/api/cbt/exams/practice-waec",
                "g-1",
                None,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
