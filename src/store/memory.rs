use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::types::Json;
use uuid::Uuid;

use crate::core::config::{AnswerStorage, Settings};
use crate::core::time::primitive_now_utc;
use crate::db::models::{Exam, ExamAttempt, Question};
use crate::db::types::{AttemptStatus, PaperType};
use crate::services::answers::{AnswerCodec, AnswerMap};
use crate::services::practice;
use crate::services::scoring::{score_attempt, ScoreSummary};
use crate::store::postgres::practice_paper_size;
use crate::store::{
    review_questions, AttemptRecord, AttemptResults, AttemptStore, AutosaveRequest, ExamOverview,
    Identity, PracticeQuery, QuestionBatch, QuestionView, StartAttempt, StoreError, SubmitRequest,
};

/// Keeps the same rows and rules as the Postgres store in process memory.
/// Used by API and engine tests, and usable as a scratch backend.
pub(crate) struct MemoryAttemptStore {
    codec: AnswerCodec,
    pass_mark_percent: u32,
    practice_question_limit: usize,
    rng: Mutex<StdRng>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    exams: HashMap<String, Exam>,
    questions: HashMap<String, Question>,
    exam_questions: HashMap<String, Vec<String>>,
    assignments: HashSet<(String, String)>,
    attempts: HashMap<String, ExamAttempt>,
    papers: HashMap<String, Vec<String>>,
}

impl MemoryAttemptStore {
    pub(crate) fn new(
        storage: AnswerStorage,
        pass_mark_percent: u32,
        practice_question_limit: usize,
    ) -> Self {
        Self {
            codec: AnswerCodec::new(storage),
            pass_mark_percent,
            practice_question_limit,
            rng: Mutex::new(StdRng::from_entropy()),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub(crate) fn from_settings(settings: &Settings) -> Self {
        let exam = settings.exam();
        Self::new(
            exam.answer_storage,
            exam.pass_mark_percent,
            exam.practice_question_limit as usize,
        )
    }

    #[cfg(test)]
    pub(crate) fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub(crate) fn insert_exam(&self, exam: Exam) {
        let mut inner = self.lock();
        inner.exam_questions.entry(exam.id.clone()).or_default();
        inner.exams.insert(exam.id.clone(), exam);
    }

    pub(crate) fn insert_question(&self, question: Question) {
        let mut inner = self.lock();
        if let Some(exam_id) = question.exam_id.clone() {
            inner
                .exam_questions
                .entry(exam_id)
                .or_default()
                .push(question.id.clone());
        }
        inner.questions.insert(question.id.clone(), question);
    }

    pub(crate) fn assign(&self, exam_id: &str, student_id: &str) {
        self.lock()
            .assignments
            .insert((exam_id.to_string(), student_id.to_string()));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn duration_of(&self, inner: &Inner, row: &ExamAttempt) -> Result<i32, StoreError> {
        if let Some(exam_type) = practice::practice_exam_type(&row.exam_id) {
            return Ok(practice::duration_minutes(exam_type));
        }
        inner
            .exams
            .get(&row.exam_id)
            .map(|e| e.duration_minutes)
            .ok_or(StoreError::ExamNotFound)
    }

    fn record_of(&self, inner: &Inner, row: &ExamAttempt) -> Result<AttemptRecord, StoreError> {
        let duration = self.duration_of(inner, row)?;
        AttemptRecord::from_row(row, &self.codec, duration)
    }

    fn paper_of(&self, inner: &Inner, row: &ExamAttempt) -> Vec<Question> {
        let ids = if practice::practice_exam_type(&row.exam_id).is_some() {
            inner.papers.get(&row.id).cloned().unwrap_or_default()
        } else {
            inner
                .exam_questions
                .get(&row.exam_id)
                .cloned()
                .unwrap_or_default()
        };
        ids.iter()
            .filter_map(|id| inner.questions.get(id).cloned())
            .collect()
    }

    fn ensure_exam_access<'a>(
        &self,
        inner: &'a Inner,
        identity: &Identity,
        exam_id: &str,
    ) -> Result<&'a Exam, StoreError> {
        if identity.is_guest() {
            return Err(StoreError::AccessDenied);
        }
        let exam = inner.exams.get(exam_id).ok_or(StoreError::ExamNotFound)?;
        if identity.is_staff() {
            return Ok(exam);
        }
        let student_id = identity.storage_id();
        let own_exam = exam.created_by.as_deref() == Some(student_id);
        let assigned = inner
            .assignments
            .contains(&(exam_id.to_string(), student_id.to_string()));
        if !own_exam && !assigned {
            return Err(StoreError::AccessDenied);
        }
        Ok(exam)
    }

    fn practice_banks(
        &self,
        inner: &Inner,
        exam_type: &str,
        query: &PracticeQuery,
    ) -> Result<Vec<(String, Vec<Question>)>, StoreError> {
        let subjects: Vec<String> = query
            .subjects
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if subjects.is_empty() {
            return Err(StoreError::Validation(
                "At least one subject must be selected for practice exams".to_string(),
            ));
        }
        let paper_type = query.paper_type.unwrap_or(PaperType::Obj);
        let banks = subjects
            .into_iter()
            .map(|subject| {
                let bank: Vec<Question> = inner
                    .questions
                    .values()
                    .filter(|q| {
                        q.exam_type == exam_type
                            && q.subject == subject
                            && q.paper_type == paper_type
                            && query
                                .year
                                .as_deref()
                                .map_or(true, |y| q.year.as_deref() == Some(y))
                    })
                    .cloned()
                    .collect();
                (subject, bank)
            })
            .collect();
        Ok(banks)
    }

    fn find_active(&self, inner: &Inner, student_id: &str, exam_id: &str) -> Option<ExamAttempt> {
        inner
            .attempts
            .values()
            .find(|a| {
                a.student_id == student_id
                    && a.exam_id == exam_id
                    && a.status == AttemptStatus::InProgress
            })
            .cloned()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn exam_overview(
        &self,
        identity: &Identity,
        exam_id: &str,
        query: &PracticeQuery,
    ) -> Result<ExamOverview, StoreError> {
        let inner = self.lock();
        if let Some(exam_type) = practice::practice_exam_type(exam_id) {
            let banks = self.practice_banks(&inner, exam_type, query)?;
            let subjects: Vec<String> = banks.iter().map(|(s, _)| s.clone()).collect();
            let question_count = practice_paper_size(
                exam_type,
                banks.iter().map(|(_, b)| b.len()),
                self.practice_question_limit,
            );
            let exam = practice::synthesize_exam(
                exam_type,
                &subjects,
                query.year.as_deref(),
                primitive_now_utc(),
            );
            return Ok(ExamOverview::from_exam(&exam, question_count as i64, true));
        }

        let exam = self.ensure_exam_access(&inner, identity, exam_id)?;
        let question_count = inner
            .exam_questions
            .get(exam_id)
            .map_or(0, |ids| ids.len()) as i64;
        Ok(ExamOverview::from_exam(exam, question_count, false))
    }

    async fn start_attempt(
        &self,
        identity: &Identity,
        request: StartAttempt,
    ) -> Result<AttemptRecord, StoreError> {
        let mut inner = self.lock();
        let now = primitive_now_utc();

        let (paper_ids, total) = match practice::practice_exam_type(&request.exam_id) {
            Some(exam_type) => {
                if let Some(active) =
                    self.find_active(&inner, identity.storage_id(), &request.exam_id)
                {
                    // Resume the open practice session.
                    return self.record_of(&inner, &active);
                }
                let query = PracticeQuery {
                    subjects: request.subjects.clone(),
                    year: request.year.clone(),
                    paper_type: request.paper_type,
                };
                let banks = self.practice_banks(&inner, exam_type, &query)?;
                let paper = {
                    let mut rng = match self.rng.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    practice::build_practice_paper(
                        &mut *rng,
                        exam_type,
                        banks,
                        self.practice_question_limit,
                    )
                };
                if paper.is_empty() {
                    return Err(StoreError::Validation(
                        "No questions found for the selected subjects and criteria".to_string(),
                    ));
                }
                let ids: Vec<String> = paper.iter().map(|q| q.id.clone()).collect();
                let total = ids.len() as i32;
                (Some(ids), total)
            }
            None => {
                self.ensure_exam_access(&inner, identity, &request.exam_id)?;
                if let Some(active) =
                    self.find_active(&inner, identity.storage_id(), &request.exam_id)
                {
                    return Err(StoreError::AlreadyActive {
                        attempt_id: active.id,
                    });
                }
                let total = inner
                    .exam_questions
                    .get(&request.exam_id)
                    .map_or(0, |ids| ids.len()) as i32;
                (None, total)
            }
        };

        let row = ExamAttempt {
            id: Uuid::new_v4().to_string(),
            exam_id: request.exam_id.clone(),
            student_id: identity.storage_id().to_string(),
            status: AttemptStatus::InProgress,
            answers: Json(self.codec.encode(&AnswerMap::new())?),
            subjects: Json(request.subjects.clone()),
            started_at: now,
            submitted_at: None,
            last_saved_at: None,
            time_spent_seconds: 0,
            score: None,
            total_questions: Some(total),
            percentage: None,
            passed: None,
            save_version: 0,
            created_at: now,
            updated_at: now,
        };
        if let Some(ids) = paper_ids {
            inner.papers.insert(row.id.clone(), ids);
        }
        let record = self.record_of(&inner, &row)?;
        inner.attempts.insert(row.id.clone(), row);
        Ok(record)
    }

    async fn attempt_questions(
        &self,
        identity: &Identity,
        attempt_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<QuestionBatch, StoreError> {
        let inner = self.lock();
        let row = inner
            .attempts
            .get(attempt_id)
            .ok_or(StoreError::AttemptNotFound)?;
        if !identity.may_view(&row.student_id) {
            return Err(StoreError::NotOwner);
        }
        let paper = self.paper_of(&inner, row);
        let total = paper.len() as i64;
        let questions = paper
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(QuestionView::from_question)
            .collect();
        Ok(QuestionBatch {
            questions,
            total,
            offset,
        })
    }

    async fn autosave(
        &self,
        identity: &Identity,
        attempt_id: &str,
        request: AutosaveRequest,
    ) -> Result<AttemptRecord, StoreError> {
        let mut inner = self.lock();
        let row = inner
            .attempts
            .get(attempt_id)
            .ok_or(StoreError::AttemptNotFound)?;
        if !identity.owns(&row.student_id) {
            return Err(StoreError::NotOwner);
        }
        if row.status != AttemptStatus::InProgress {
            return Err(StoreError::NotInProgress);
        }
        if let Some(expected) = request.expected_version {
            if expected != row.save_version {
                return Err(StoreError::VersionConflict {
                    current: row.save_version,
                });
            }
        }

        let answers = match request.answers {
            Some(map) => self.codec.encode(&map)?,
            None => row.answers.0.clone(),
        };
        let time_spent = request
            .time_spent_seconds
            .unwrap_or(row.time_spent_seconds);
        let now = primitive_now_utc();

        let row = inner
            .attempts
            .get_mut(attempt_id)
            .ok_or(StoreError::AttemptNotFound)?;
        row.answers = Json(answers);
        row.time_spent_seconds = time_spent;
        row.last_saved_at = Some(now);
        row.save_version += 1;
        row.updated_at = now;
        let row = row.clone();
        self.record_of(&inner, &row)
    }

    async fn submit(
        &self,
        identity: &Identity,
        attempt_id: &str,
        request: SubmitRequest,
    ) -> Result<AttemptRecord, StoreError> {
        let mut inner = self.lock();
        let row = inner
            .attempts
            .get(attempt_id)
            .ok_or(StoreError::AttemptNotFound)?;
        if !identity.owns(&row.student_id) {
            return Err(StoreError::NotOwner);
        }
        if row.status != AttemptStatus::InProgress {
            return Err(StoreError::AlreadySubmitted {
                attempt_id: row.id.clone(),
            });
        }

        let paper = self.paper_of(&inner, row);
        let summary = score_attempt(&paper, &request.answers, self.pass_mark_percent);
        let answers = self.codec.encode(&request.answers)?;
        let time_spent = request
            .time_spent_seconds
            .unwrap_or(row.time_spent_seconds);
        let now = primitive_now_utc();

        let row = inner
            .attempts
            .get_mut(attempt_id)
            .ok_or(StoreError::AttemptNotFound)?;
        row.status = AttemptStatus::Completed;
        row.answers = Json(answers);
        row.time_spent_seconds = time_spent;
        row.score = Some(summary.score);
        row.total_questions = Some(summary.total_questions);
        row.percentage = Some(summary.percentage);
        row.passed = Some(summary.passed);
        row.submitted_at = Some(now);
        row.updated_at = now;
        let row = row.clone();
        self.record_of(&inner, &row)
    }

    async fn results(
        &self,
        identity: &Identity,
        attempt_id: &str,
    ) -> Result<AttemptResults, StoreError> {
        let inner = self.lock();
        let row = inner
            .attempts
            .get(attempt_id)
            .ok_or(StoreError::AttemptNotFound)?;
        if !identity.may_view(&row.student_id) {
            return Err(StoreError::NotOwner);
        }
        if row.status != AttemptStatus::Completed {
            return Err(StoreError::StillInProgress);
        }

        let attempt = self.record_of(&inner, row)?;
        let paper = self.paper_of(&inner, row);
        let summary = ScoreSummary {
            score: row.score.unwrap_or(0),
            total_questions: row.total_questions.unwrap_or(paper.len() as i32),
            percentage: row.percentage.unwrap_or(0),
            passed: row.passed.unwrap_or(false),
        };
        let questions = review_questions(&paper, &attempt.answers);
        Ok(AttemptResults {
            attempt,
            summary,
            questions,
        })
    }

    async fn list_attempts(
        &self,
        identity: &Identity,
        student_id: Option<&str>,
    ) -> Result<Vec<AttemptRecord>, StoreError> {
        let inner = self.lock();
        let target = match (identity, student_id) {
            (Identity::Guest { .. }, _) => return Err(StoreError::NotOwner),
            (Identity::Staff { .. }, Some(other)) => other,
            (_, Some(other)) if !identity.owns(other) => return Err(StoreError::NotOwner),
            _ => identity.storage_id(),
        };

        let mut rows: Vec<&ExamAttempt> = inner
            .attempts
            .values()
            .filter(|a| a.student_id == target)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.iter()
            .map(|row| self.record_of(&inner, row))
            .collect()
    }
}
