use std::sync::{Arc, OnceLock};

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use tower_http::normalize_path::NormalizePath;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{config::Settings, security, state::AppState, time::primitive_now_utc};
use crate::db::models::{Exam, Question};
use crate::services::scoring::tests::question;
use crate::store::memory::MemoryAttemptStore;

const TEST_SECRET_KEY: &str = "test-secret";

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) store: Arc<MemoryAttemptStore>,
    pub(crate) app: NormalizePath<Router>,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("SPHERE_ENV", "test");
    std::env::set_var("SPHERE_STRICT_CONFIG", "0");
    std::env::set_var("SECRET_KEY", TEST_SECRET_KEY);
    std::env::set_var("ANSWER_STORAGE", "json");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
}

pub(crate) async fn setup_test_context() -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let store = Arc::new(MemoryAttemptStore::from_settings(&settings).with_seed(42));
    let state = AppState::new(settings, store.clone());
    let app = api::router::router(state.clone());

    TestContext { state, store, app, _guard: guard }
}

/// One 3-question objective exam assigned to `student_id`.
pub(crate) fn seed_assigned_exam(store: &MemoryAttemptStore, exam_id: &str, student_id: &str) {
    let now = primitive_now_utc();
    store.insert_exam(Exam {
        id: exam_id.to_string(),
        title: "WAEC Mathematics Mock".to_string(),
        exam_type: "waec".to_string(),
        subject: "mathematics".to_string(),
        year: Some("2024".to_string()),
        duration_minutes: 90,
        created_by: Some("teacher-1".to_string()),
        created_at: now,
        updated_at: now,
    });
    for (index, correct) in ["A", "B", "C"].iter().enumerate() {
        store.insert_question(exam_question(exam_id, index as i32 + 1, correct));
    }
    store.assign(exam_id, student_id);
}

pub(crate) fn exam_question(exam_id: &str, number: i32, correct: &str) -> Question {
    let mut q = question(&format!("{exam_id}-q{number}"), number, correct);
    q.exam_id = Some(exam_id.to_string());
    q
}

pub(crate) fn seed_practice_bank(store: &MemoryAttemptStore, exam_type: &str, subject: &str, size: usize) {
    for index in 0..size {
        let mut q = question(&format!("{exam_type}-{subject}-{index}"), index as i32 + 1, "A");
        q.exam_type = exam_type.to_string();
        q.subject = subject.to_string();
        store.insert_question(q);
    }
}

pub(crate) fn bearer_token(user_id: &str, role: security::Role, settings: &Settings) -> String {
    security::create_access_token(user_id, role, settings, None).expect("token")
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) fn guest_json_request(
    method: Method,
    uri: &str,
    guest_id: &str,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut request = json_request(method, uri, None, body);
    request.headers_mut().insert(
        crate::api::guards::GUEST_ID_HEADER,
        guest_id.parse().expect("guest id header"),
    );
    request
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
