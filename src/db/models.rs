use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{AttemptStatus, PaperType};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Exam {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) exam_type: String,
    pub(crate) subject: String,
    pub(crate) year: Option<String>,
    pub(crate) duration_minutes: i32,
    pub(crate) created_by: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) exam_id: Option<String>,
    pub(crate) question_number: i32,
    pub(crate) text: String,
    pub(crate) options: Json<Vec<String>>,
    pub(crate) correct_answer: String,
    pub(crate) explanation: Option<String>,
    pub(crate) image_url: Option<String>,
    pub(crate) answer_url: Option<String>,
    pub(crate) subject: String,
    pub(crate) exam_type: String,
    pub(crate) year: Option<String>,
    pub(crate) paper_type: PaperType,
    pub(crate) marks: i32,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamAssignment {
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) assigned_by: String,
    pub(crate) assigned_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamAttempt {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) status: AttemptStatus,
    /// Raw stored payload; decoded through `AnswerCodec` because legacy rows
    /// hold a JSON-encoded string rather than a native object.
    pub(crate) answers: Json<serde_json::Value>,
    pub(crate) subjects: Json<Vec<String>>,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) last_saved_at: Option<PrimitiveDateTime>,
    pub(crate) time_spent_seconds: i32,
    pub(crate) score: Option<i32>,
    pub(crate) total_questions: Option<i32>,
    pub(crate) percentage: Option<i32>,
    pub(crate) passed: Option<bool>,
    pub(crate) save_version: i32,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}
