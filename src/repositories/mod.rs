pub(crate) mod assignments;
pub(crate) mod attempts;
pub(crate) mod exams;
pub(crate) mod papers;
pub(crate) mod questions;
