//! Run Context: identity of one pipeline run
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct RunContext {
    pub trace_id: String,
    pub started_at: DateTime<Utc>,
    /// Window in effect for this run (request value or configured fallback).
    pub context_window: i64,
}

impl RunContext {
    pub fn new(context_window: i64) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            context_window,
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }
}
