use serde::Serialize;

use crate::db::models::Question;
use crate::services::answers::AnswerMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct ScoreSummary {
    pub(crate) score: i32,
    pub(crate) total_questions: i32,
    pub(crate) percentage: i32,
    pub(crate) passed: bool,
}

/// Grade a submitted answer set against the paper. Answers are looked up by
/// question position first, then by question id, because both keyings exist
/// in stored attempts. A percentage exactly on the pass mark does not pass.
pub(crate) fn score_attempt(
    questions: &[Question],
    answers: &AnswerMap,
    pass_mark_percent: u32,
) -> ScoreSummary {
    let mut score = 0i32;
    for (index, question) in questions.iter().enumerate() {
        let submitted = answers
            .get(&index.to_string())
            .or_else(|| answers.get(&question.id));
        if let Some(choice) = submitted {
            if choice == &question.correct_answer {
                score += 1;
            }
        }
    }

    let total_questions = questions.len() as i32;
    let percentage = if total_questions > 0 {
        ((f64::from(score) / f64::from(total_questions)) * 100.0).round() as i32
    } else {
        0
    };

    ScoreSummary {
        score,
        total_questions,
        percentage,
        passed: percentage > pass_mark_percent as i32,
    }
}
