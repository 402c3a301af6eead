use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{AttemptIdentity, CurrentIdentity};
use crate::core::state::AppState;
use crate::schemas::attempt::{
    AttemptListResponse, AutosaveAttemptRequest, ListAttemptsQuery, QuestionBatchQuery,
    StartAttemptRequest, SubmitAttemptRequest,
};
use crate::schemas::exam::parse_paper_type;
use crate::store::{
    AttemptRecord, AttemptResults, AutosaveRequest, QuestionBatch, StartAttempt, SubmitRequest,
};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(start_attempt).get(list_attempts))
        .route("/:id/questions", get(attempt_questions))
        .route("/:id/autosave", post(autosave_attempt))
        .route("/:id/submit", post(submit_attempt))
        .route("/:id/results", get(attempt_results))
}

async fn start_attempt(
    State(state): State<AppState>,
    AttemptIdentity(identity): AttemptIdentity,
    Json(payload): Json<StartAttemptRequest>,
) -> Result<(StatusCode, Json<AttemptRecord>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let paper_type = parse_paper_type(payload.paper_type.as_deref())
        .map_err(ApiError::BadRequest)?;

    let request = StartAttempt {
        exam_id: payload.exam_id,
        subjects: payload.subjects,
        year: payload.year,
        paper_type,
    };
    let record = state.store().start_attempt(&identity, request).await?;
    metrics::counter!("cbt_attempts_started_total").increment(1);
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_attempts(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Query(query): Query<ListAttemptsQuery>,
) -> Result<Json<AttemptListResponse>, ApiError> {
    let attempts = state
        .store()
        .list_attempts(&identity, query.student_id.as_deref())
        .await?;
    let total = attempts.len();
    Ok(Json(AttemptListResponse { attempts, total }))
}

async fn attempt_questions(
    State(state): State<AppState>,
    AttemptIdentity(identity): AttemptIdentity,
    Path(attempt_id): Path<String>,
    Query(query): Query<QuestionBatchQuery>,
) -> Result<Json<QuestionBatch>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(state.settings().exam().question_batch_size);
    let batch = state
        .store()
        .attempt_questions(&identity, &attempt_id, query.offset, limit)
        .await?;
    Ok(Json(batch))
}

async fn autosave_attempt(
    State(state): State<AppState>,
    AttemptIdentity(identity): AttemptIdentity,
    Path(attempt_id): Path<String>,
    Json(payload): Json<AutosaveAttemptRequest>,
) -> Result<Json<AttemptRecord>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let request = AutosaveRequest {
        answers: payload.answers,
        time_spent_seconds: payload.time_spent_seconds,
        expected_version: payload.save_version,
    };
    let record = state.store().autosave(&identity, &attempt_id, request).await?;
    metrics::counter!("cbt_autosaves_total").increment(1);
    Ok(Json(record))
}

async fn submit_attempt(
    State(state): State<AppState>,
    AttemptIdentity(identity): AttemptIdentity,
    Path(attempt_id): Path<String>,
    Json(payload): Json<SubmitAttemptRequest>,
) -> Result<Json<AttemptRecord>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let request = SubmitRequest {
        answers: payload.answers,
        time_spent_seconds: payload.time_spent_seconds,
    };
    let record = state.store().submit(&identity, &attempt_id, request).await?;
    metrics::counter!("cbt_attempts_submitted_total").increment(1);
    Ok(Json(record))
}

async fn attempt_results(
    State(state): State<AppState>,
    AttemptIdentity(identity): AttemptIdentity,
    Path(attempt_id): Path<String>,
) -> Result<Json<AttemptResults>, ApiError> {
    let results = state.store().results(&identity, &attempt_id).await?;
    Ok(Json(results))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::core::security::Role;
    use crate::test_support;

    async fn start(
        ctx: &test_support::TestContext,
        token: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/cbt/attempts",
                Some(token),
                Some(body),
            ))
            .await
            .expect("response");
        let status = response.status();
        (status, test_support::read_json(response).await)
    }

    #[tokio::test]
    async fn student_runs_a_full_attempt() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_assigned_exam(&ctx.store, "exam-1", "student-1");
        let token = test_support::bearer_token("student-1", Role::Student, ctx.state.settings());

        let (status, attempt) = start(&ctx, &token, json!({ "exam_id": "exam-1" })).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(attempt["status"], "in_progress");
        assert_eq!(attempt["duration_minutes"], 90);
        assert_eq!(attempt["total_questions"], 3);
        assert_eq!(attempt["save_version"], 0);
        let attempt_id = attempt["id"].as_str().expect("attempt id").to_string();

        // Progressive batch: first two questions, grading fields withheld.
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::GET,
                &format!("/api/cbt/attempts/{attempt_id}/questions?offset=0&limit=2"),
                Some(&token),
                None,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let batch = test_support::read_json(response).await;
        assert_eq!(batch["total"], 3);
        assert_eq!(batch["questions"].as_array().map(Vec::len), Some(2));
        assert!(batch["questions"][0].get("correct_answer").is_none());

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                &format!("/api/cbt/attempts/{attempt_id}/autosave"),
                Some(&token),
                Some(json!({
                    "answers": { "0": "A" },
                    "time_spent_seconds": 30,
                    "save_version": 0
                })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let saved = test_support::read_json(response).await;
        assert_eq!(saved["save_version"], 1);
        assert!(saved["last_saved_at"].is_string());

        // Replaying the old version token is a stale write.
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                &format!("/api/cbt/attempts/{attempt_id}/autosave"),
                Some(&token),
                Some(json!({ "answers": { "0": "A" }, "save_version": 0 })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let conflict = test_support::read_json(response).await;
        assert_eq!(conflict["code"], "version_conflict");

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                &format!("/api/cbt/attempts/{attempt_id}/submit"),
                Some(&token),
                Some(json!({
                    "answers": { "0": "A", "1": "B", "2": "X" },
                    "time_spent_seconds": 120
                })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let submitted = test_support::read_json(response).await;
        assert_eq!(submitted["status"], "completed");
        assert_eq!(submitted["score"], 2);
        assert_eq!(submitted["total_questions"], 3);
        assert_eq!(submitted["percentage"], 67);
        assert_eq!(submitted["passed"], true);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                &format!("/api/cbt/attempts/{attempt_id}/submit"),
                Some(&token),
                Some(json!({ "answers": { "0": "A" } })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let conflict = test_support::read_json(response).await;
        assert_eq!(conflict["code"], "already_submitted");
        assert_eq!(conflict["attempt_id"], attempt_id.as_str());

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::GET,
                &format!("/api/cbt/attempts/{attempt_id}/results"),
                Some(&token),
                None,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let results = test_support::read_json(response).await;
        assert_eq!(results["summary"]["score"], 2);
        assert_eq!(results["questions"][0]["correct"], true);
        assert_eq!(results["questions"][2]["correct"], false);
        assert_eq!(results["questions"][2]["correct_answer"], "C");
    }

    #[tokio::test]
    async fn second_start_reports_active_attempt() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_assigned_exam(&ctx.store, "exam-1", "student-1");
        let token = test_support::bearer_token("student-1", Role::Student, ctx.state.settings());

        let (status, first) = start(&ctx, &token, json!({ "exam_id": "exam-1" })).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, conflict) = start(&ctx, &token, json!({ "exam_id": "exam-1" })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(conflict["code"], "already_active");
        assert_eq!(conflict["attempt_id"], first["id"]);
    }

    #[tokio::test]
    async fn unassigned_student_is_rejected() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_assigned_exam(&ctx.store, "exam-1", "student-1");
        let token = test_support::bearer_token("student-2", Role::Student, ctx.state.settings());

        let (status, _) = start(&ctx, &token, json!({ "exam_id": "exam-1" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn guest_runs_a_practice_session() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_practice_bank(&ctx.store, "waec", "mathematics", 60);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::guest_json_request(
                Method::POST,
                "/api/cbt/attempts",
                "g-1",
                Some(json!({
                    "exam_id": "practice-waec",
                    "subjects": ["mathematics"]
                })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let attempt = test_support::read_json(response).await;
        assert_eq!(attempt["duration_minutes"], 90);
        assert_eq!(attempt["total_questions"], 50);
        let attempt_id = attempt["id"].as_str().expect("attempt id").to_string();

        // The same guest id owns the attempt on later requests.
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::guest_json_request(
                Method::POST,
                &format!("/api/cbt/attempts/{attempt_id}/submit"),
                "g-1",
                Some(json!({ "answers": { "0": "A" } })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let submitted = test_support::read_json(response).await;
        assert_eq!(submitted["status"], "completed");

        // A different guest id is someone else.
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::guest_json_request(
                Method::GET,
                &format!("/api/cbt/attempts/{attempt_id}/results"),
                "g-2",
                None,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn guest_cannot_start_a_regular_exam() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_assigned_exam(&ctx.store, "exam-1", "student-1");

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::guest_json_request(
                Method::POST,
                "/api/cbt/attempts",
                "g-1",
                Some(json!({ "exam_id": "exam-1" })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn staff_reads_student_results_but_cannot_submit() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_assigned_exam(&ctx.store, "exam-1", "student-1");
        let student = test_support::bearer_token("student-1", Role::Student, ctx.state.settings());
        let teacher = test_support::bearer_token("teacher-1", Role::Teacher, ctx.state.settings());

        let (_, attempt) = start(&ctx, &student, json!({ "exam_id": "exam-1" })).await;
        let attempt_id = attempt["id"].as_str().expect("attempt id").to_string();

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                &format!("/api/cbt/attempts/{attempt_id}/submit"),
                Some(&teacher),
                Some(json!({ "answers": {} })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                &format!("/api/cbt/attempts/{attempt_id}/submit"),
                Some(&student),
                Some(json!({ "answers": { "0": "A" } })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::GET,
                &format!("/api/cbt/attempts/{attempt_id}/results"),
                Some(&teacher),
                None,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::GET,
                "/api/cbt/attempts?student_id=student-1",
                Some(&teacher),
                None,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let listing = test_support::read_json(response).await;
        assert_eq!(listing["total"], 1);
    }
}
