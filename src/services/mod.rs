pub(crate) mod answers;
pub(crate) mod practice;
pub(crate) mod scoring;
