use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::config::Settings;
use crate::core::time::primitive_now_utc;
use crate::db::models::{ExamAttempt, Question};
use crate::db::types::{AttemptStatus, PaperType};
use crate::repositories::{assignments, attempts, exams, papers, questions};
use crate::services::answers::{AnswerCodec, AnswerMap};
use crate::services::practice;
use crate::services::scoring::{score_attempt, ScoreSummary};
use crate::store::{
    review_questions, AttemptRecord, AttemptResults, AttemptStore, AutosaveRequest, ExamOverview,
    Identity, PracticeQuery, QuestionBatch, QuestionView, StartAttempt, StoreError, SubmitRequest,
};

pub(crate) struct PgAttemptStore {
    pool: PgPool,
    codec: AnswerCodec,
    pass_mark_percent: u32,
    practice_question_limit: usize,
}

impl PgAttemptStore {
    pub(crate) fn new(pool: PgPool, settings: &Settings) -> Self {
        let exam = settings.exam();
        Self {
            pool,
            codec: AnswerCodec::new(exam.answer_storage),
            pass_mark_percent: exam.pass_mark_percent,
            practice_question_limit: exam.practice_question_limit as usize,
        }
    }

    async fn load_attempt(&self, attempt_id: &str) -> Result<ExamAttempt, StoreError> {
        attempts::find_by_id(&self.pool, attempt_id)
            .await?
            .ok_or(StoreError::AttemptNotFound)
    }

    async fn attempt_duration(&self, row: &ExamAttempt) -> Result<i32, StoreError> {
        if let Some(exam_type) = practice::practice_exam_type(&row.exam_id) {
            return Ok(practice::duration_minutes(exam_type));
        }
        let exam = exams::find_by_id(&self.pool, &row.exam_id)
            .await?
            .ok_or(StoreError::ExamNotFound)?;
        Ok(exam.duration_minutes)
    }

    async fn record(&self, row: &ExamAttempt) -> Result<AttemptRecord, StoreError> {
        let duration = self.attempt_duration(row).await?;
        AttemptRecord::from_row(row, &self.codec, duration)
    }

    /// The question set an attempt is graded and reviewed against: the
    /// sampled paper for practice attempts, the exam's own list otherwise.
    async fn paper(&self, row: &ExamAttempt) -> Result<Vec<Question>, StoreError> {
        if practice::practice_exam_type(&row.exam_id).is_some() {
            let paper_len = papers::count(&self.pool, &row.id).await?;
            return Ok(papers::list_questions(&self.pool, &row.id, 0, paper_len).await?);
        }
        Ok(questions::list_all_for_exam(&self.pool, &row.exam_id).await?)
    }

    async fn ensure_exam_access(&self, identity: &Identity, exam_id: &str) -> Result<crate::db::models::Exam, StoreError> {
        if identity.is_guest() {
            return Err(StoreError::AccessDenied);
        }
        let exam = exams::find_by_id(&self.pool, exam_id)
            .await?
            .ok_or(StoreError::ExamNotFound)?;
        if identity.is_staff() {
            return Ok(exam);
        }
        let student_id = identity.storage_id();
        let own_exam = exam.created_by.as_deref() == Some(student_id);
        if !own_exam && !assignments::exists(&self.pool, exam_id, student_id).await? {
            return Err(StoreError::AccessDenied);
        }
        Ok(exam)
    }

    async fn practice_banks(
        &self,
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
        let mut banks = Vec::with_capacity(subjects.len());
        for subject in subjects {
            let mut bank =
                questions::list_bank(&self.pool, exam_type, &subject, paper_type).await?;
            if let Some(year) = query.year.as_deref() {
                bank.retain(|q| q.year.as_deref() == Some(year));
            }
            banks.push((subject, bank));
        }
        Ok(banks)
    }

    async fn start_practice(
        &self,
        identity: &Identity,
        exam_type: &str,
        request: &StartAttempt,
    ) -> Result<AttemptRecord, StoreError> {
        let query = PracticeQuery {
            subjects: request.subjects.clone(),
            year: request.year.clone(),
            paper_type: request.paper_type,
        };
        let banks = self.practice_banks(exam_type, &query).await?;
        let mut rng = StdRng::from_entropy();
        let paper = practice::build_practice_paper(
            &mut rng,
            exam_type,
            banks,
            self.practice_question_limit,
        );
        if paper.is_empty() {
            return Err(StoreError::Validation(
                "No questions found for the selected subjects and criteria".to_string(),
            ));
        }

        let now = primitive_now_utc();
        let create = attempts::CreateAttempt {
            id: Uuid::new_v4().to_string(),
            exam_id: request.exam_id.clone(),
            student_id: identity.storage_id().to_string(),
            answers: self.codec.encode(&AnswerMap::new())?,
            subjects: request.subjects.clone(),
            total_questions: Some(paper.len() as i32),
            started_at: now,
        };

        let mut tx = self.pool.begin().await?;
        let created = attempts::create(&mut *tx, &create).await?;
        let row = match created {
            Some(row) => {
                let ids: Vec<String> = paper.iter().map(|q| q.id.clone()).collect();
                papers::insert(&mut *tx, &row.id, &ids).await?;
                tx.commit().await?;
                row
            }
            None => {
                // A practice session for this type is already open; resume it
                // rather than failing the start.
                tx.rollback().await?;
                attempts::find_active(&self.pool, identity.storage_id(), &request.exam_id)
                    .await?
                    .ok_or(StoreError::AttemptNotFound)?
            }
        };
        self.record(&row).await
    }

    async fn start_regular(
        &self,
        identity: &Identity,
        request: &StartAttempt,
    ) -> Result<AttemptRecord, StoreError> {
        let exam = self.ensure_exam_access(identity, &request.exam_id).await?;
        let student_id = identity.storage_id();

        if let Some(active) = attempts::find_active(&self.pool, student_id, &exam.id).await? {
            return Err(StoreError::AlreadyActive {
                attempt_id: active.id,
            });
        }

        let total = questions::count_for_exam(&self.pool, &exam.id).await?;
        let create = attempts::CreateAttempt {
            id: Uuid::new_v4().to_string(),
            exam_id: exam.id.clone(),
            student_id: student_id.to_string(),
            answers: self.codec.encode(&AnswerMap::new())?,
            subjects: request.subjects.clone(),
            total_questions: Some(total as i32),
            started_at: primitive_now_utc(),
        };

        match attempts::create(&self.pool, &create).await? {
            Some(row) => self.record(&row).await,
            None => {
                // Lost the insert race; surface the winner.
                let active = attempts::find_active(&self.pool, student_id, &exam.id)
                    .await?
                    .ok_or(StoreError::AttemptNotFound)?;
                Err(StoreError::AlreadyActive {
                    attempt_id: active.id,
                })
            }
        }
    }
}

#[async_trait]
impl AttemptStore for PgAttemptStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn exam_overview(
        &self,
        identity: &Identity,
        exam_id: &str,
        query: &PracticeQuery,
    ) -> Result<ExamOverview, StoreError> {
        if let Some(exam_type) = practice::practice_exam_type(exam_id) {
            let banks = self.practice_banks(exam_type, query).await?;
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

        let exam = self.ensure_exam_access(identity, exam_id).await?;
        let question_count = questions::count_for_exam(&self.pool, exam_id).await?;
        Ok(ExamOverview::from_exam(&exam, question_count, false))
    }

    async fn start_attempt(
        &self,
        identity: &Identity,
        request: StartAttempt,
    ) -> Result<AttemptRecord, StoreError> {
        match practice::practice_exam_type(&request.exam_id) {
            Some(exam_type) => {
                let exam_type = exam_type.to_string();
                self.start_practice(identity, &exam_type, &request).await
            }
            None => self.start_regular(identity, &request).await,
        }
    }

    async fn attempt_questions(
        &self,
        identity: &Identity,
        attempt_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<QuestionBatch, StoreError> {
        let row = self.load_attempt(attempt_id).await?;
        if !identity.may_view(&row.student_id) {
            return Err(StoreError::NotOwner);
        }

        let (rows, total) = if practice::practice_exam_type(&row.exam_id).is_some() {
            let total = papers::count(&self.pool, attempt_id).await?;
            let rows =
                papers::list_questions(&self.pool, attempt_id, offset as i64, limit as i64).await?;
            (rows, total)
        } else {
            let total = questions::count_for_exam(&self.pool, &row.exam_id).await?;
            let rows =
                questions::list_for_exam(&self.pool, &row.exam_id, offset as i64, limit as i64)
                    .await?;
            (rows, total)
        };

        Ok(QuestionBatch {
            questions: rows.iter().map(QuestionView::from_question).collect(),
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
        let row = self.load_attempt(attempt_id).await?;
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

        let updated = attempts::update_auto_save(
            &self.pool,
            attempt_id,
            &answers,
            time_spent,
            request.expected_version,
            primitive_now_utc(),
        )
        .await?;
        match updated {
            Some(row) => self.record(&row).await,
            // The guarded UPDATE matched nothing: either submission won the
            // race or another save bumped the version after our read.
            None => {
                let row = self.load_attempt(attempt_id).await?;
                if row.status != AttemptStatus::InProgress {
                    Err(StoreError::NotInProgress)
                } else {
                    Err(StoreError::VersionConflict {
                        current: row.save_version,
                    })
                }
            }
        }
    }

    async fn submit(
        &self,
        identity: &Identity,
        attempt_id: &str,
        request: SubmitRequest,
    ) -> Result<AttemptRecord, StoreError> {
        let row = self.load_attempt(attempt_id).await?;
        if !identity.owns(&row.student_id) {
            return Err(StoreError::NotOwner);
        }
        if row.status != AttemptStatus::InProgress {
            return Err(StoreError::AlreadySubmitted {
                attempt_id: row.id,
            });
        }

        let paper = self.paper(&row).await?;
        let summary = score_attempt(&paper, &request.answers, self.pass_mark_percent);
        let answers = self.codec.encode(&request.answers)?;
        let update = attempts::SubmitAttempt {
            answers: &answers,
            time_spent_seconds: request
                .time_spent_seconds
                .unwrap_or(row.time_spent_seconds),
            score: summary.score,
            total_questions: summary.total_questions,
            percentage: summary.percentage,
            passed: summary.passed,
            submitted_at: primitive_now_utc(),
        };

        let updated = attempts::submit(&self.pool, attempt_id, &update)
            .await?
            .ok_or(StoreError::AlreadySubmitted {
                attempt_id: attempt_id.to_string(),
            })?;
        self.record(&updated).await
    }

    async fn results(
        &self,
        identity: &Identity,
        attempt_id: &str,
    ) -> Result<AttemptResults, StoreError> {
        let row = self.load_attempt(attempt_id).await?;
        if !identity.may_view(&row.student_id) {
            return Err(StoreError::NotOwner);
        }
        if row.status != AttemptStatus::Completed {
            return Err(StoreError::StillInProgress);
        }

        let attempt = self.record(&row).await?;
        let paper = self.paper(&row).await?;
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
        let target = match (identity, student_id) {
            (Identity::Guest { .. }, _) => return Err(StoreError::NotOwner),
            (Identity::Staff { .. }, Some(other)) => other,
            (_, Some(other)) if !identity.owns(other) => return Err(StoreError::NotOwner),
            _ => identity.storage_id(),
        };

        let rows = attempts::list_for_student(&self.pool, target).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(self.record(row).await?);
        }
        Ok(records)
    }
}

pub(crate) fn practice_paper_size(
    exam_type: &str,
    bank_sizes: impl Iterator<Item = usize>,
    default_limit: usize,
) -> usize {
    match exam_type {
        "jamb" => bank_sizes.map(|n| n.min(12)).sum(),
        "waec" | "neco" => bank_sizes.sum::<usize>().min(50),
        _ => bank_sizes.sum::<usize>().min(default_limit),
    }
}
