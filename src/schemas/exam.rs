use serde::Deserialize;

use crate::db::types::PaperType;

/// The web client sends "objective" or "obj" interchangeably.
pub(crate) fn parse_paper_type(value: Option<&str>) -> Result<Option<PaperType>, String> {
    match value {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "obj" | "objective" => Ok(Some(PaperType::Obj)),
            "theory" => Ok(Some(PaperType::Theory)),
            other => Err(format!("Unknown paper type '{other}'")),
        },
    }
}

/// Query parameters for practice exam overviews. `subjects` is a
/// comma-separated list, matching how the web client encodes it.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct PracticeExamQuery {
    pub(crate) subjects: Option<String>,
    pub(crate) year: Option<String>,
    pub(crate) paper_type: Option<String>,
}

impl PracticeExamQuery {
    pub(crate) fn subject_list(&self) -> Vec<String> {
        self.subjects
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
