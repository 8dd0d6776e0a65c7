pub mod allocator;
pub mod candidate;
pub mod options;
pub mod report;

/// An asset left out of a run, with the stage and reason it was dropped.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Exclusion {
    pub ticker: String,
    pub stage: &'static str,
    pub reason: String,
}

impl Exclusion {
    pub fn new(ticker: &str, stage: &'static str, reason: impl Into<String>) -> Self {
        Self {
            ticker: ticker.to_string(),
            stage,
            reason: reason.into(),
        }
    }
}
