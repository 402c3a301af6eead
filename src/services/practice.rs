use rand::seq::SliceRandom;
use rand::Rng;
use time::PrimitiveDateTime;

use crate::db::models::{Exam, Question};

pub(crate) const PRACTICE_PREFIX: &str = "practice-";

const JAMB_QUESTIONS_PER_SUBJECT: usize = 12;
const WASSCE_SESSION_QUOTA: usize = 50;

/// `practice-jamb` -> `jamb`. Anything without the prefix is a stored exam id.
pub(crate) fn practice_exam_type(exam_id: &str) -> Option<&str> {
    exam_id
        .strip_prefix(PRACTICE_PREFIX)
        .filter(|t| !t.is_empty())
}

pub(crate) fn duration_minutes(exam_type: &str) -> i32 {
    match exam_type {
        "jamb" => 120,
        "waec" | "neco" => 90,
        _ => 60,
    }
}

/// Assemble a practice paper from per-subject question banks. JAMB takes a
/// fixed slice from every subject; WAEC and NECO draw one pooled sample; any
/// other type is capped at `default_limit`.
pub(crate) fn build_practice_paper<R: Rng>(
    rng: &mut R,
    exam_type: &str,
    banks: Vec<(String, Vec<Question>)>,
    default_limit: usize,
) -> Vec<Question> {
    let mut paper = Vec::new();
    match exam_type {
        "jamb" => {
            for (_, bank) in banks {
                paper.extend(sample(rng, bank, JAMB_QUESTIONS_PER_SUBJECT));
            }
        }
        "waec" | "neco" => {
            let pooled: Vec<Question> = banks.into_iter().flat_map(|(_, b)| b).collect();
            paper = sample(rng, pooled, WASSCE_SESSION_QUOTA);
        }
        _ => {
            let pooled: Vec<Question> = banks.into_iter().flat_map(|(_, b)| b).collect();
            paper = sample(rng, pooled, default_limit);
        }
    }

    for (index, question) in paper.iter_mut().enumerate() {
        question.question_number = index as i32 + 1;
    }
    paper
}

fn sample<R: Rng>(rng: &mut R, mut bank: Vec<Question>, quota: usize) -> Vec<Question> {
    if bank.len() > quota {
        bank.shuffle(rng);
        bank.truncate(quota);
    }
    bank
}

pub(crate) fn synthesize_exam(
    exam_type: &str,
    subjects: &[String],
    year: Option<&str>,
    now: PrimitiveDateTime,
) -> Exam {
    let joined = subjects.join(", ");
    let title_suffix = match year {
        Some(year) if exam_type == "jamb" => format!("{joined} - {year}"),
        _ => joined.clone(),
    };
    Exam {
        id: format!("{PRACTICE_PREFIX}{exam_type}"),
        title: format!("{} Practice - {title_suffix}", exam_type.to_uppercase()),
        exam_type: exam_type.to_string(),
        subject: joined,
        year: year.map(str::to_string),
        duration_minutes: duration_minutes(exam_type),
        created_by: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use time::macros::datetime;

    use super::*;
    use crate::services::scoring::tests::question;

    fn bank(subject: &str, size: usize) -> (String, Vec<Question>) {
        let questions = (0..size)
            .map(|i| question(&format!("{subject}-{i}"), i as i32 + 1, "A"))
            .collect();
        (subject.to_string(), questions)
    }

    #[test]
    fn practice_ids_are_recognized() {
        assert_eq!(practice_exam_type("practice-jamb"), Some("jamb"));
        assert_eq!(practice_exam_type("practice-"), None);
        assert_eq!(practice_exam_type("exam-42"), None);
    }

    #[test]
    fn durations_follow_exam_type() {
        assert_eq!(duration_minutes("jamb"), 120);
        assert_eq!(duration_minutes("waec"), 90);
        assert_eq!(duration_minutes("neco"), 90);
        assert_eq!(duration_minutes("gce"), 60);
    }

    #[test]
    fn jamb_takes_twelve_per_subject() {
        let mut rng = StdRng::seed_from_u64(7);
        let banks = vec![bank("english", 40), bank("mathematics", 40)];
        let paper = build_practice_paper(&mut rng, "jamb", banks, 50);
        assert_eq!(paper.len(), 24);
    }

    #[test]
    fn wassce_pools_fifty_questions() {
        let mut rng = StdRng::seed_from_u64(7);
        let banks = vec![bank("biology", 60), bank("chemistry", 60)];
        let paper = build_practice_paper(&mut rng, "waec", banks, 10);
        assert_eq!(paper.len(), 50);
    }

    #[test]
    fn small_banks_are_used_whole() {
        let mut rng = StdRng::seed_from_u64(7);
        let paper = build_practice_paper(&mut rng, "neco", vec![bank("physics", 8)], 50);
        assert_eq!(paper.len(), 8);
    }

    #[test]
    fn paper_is_renumbered_sequentially() {
        let mut rng = StdRng::seed_from_u64(7);
        let paper = build_practice_paper(&mut rng, "jamb", vec![bank("english", 30)], 50);
        let numbers: Vec<i32> = paper.iter().map(|q| q.question_number).collect();
        assert_eq!(numbers, (1..=12).collect::<Vec<i32>>());
    }

    #[test]
    fn synthesized_exam_carries_type_and_duration() {
        let exam = synthesize_exam(
            "jamb",
            &["english".to_string(), "mathematics".to_string()],
            Some("2023"),
            datetime!(2026-02-01 08:00),
        );
        assert_eq!(exam.id, "practice-jamb");
        assert_eq!(exam.duration_minutes, 120);
        assert_eq!(exam.title, "JAMB Practice - english, mathematics - 2023");
    }
}
