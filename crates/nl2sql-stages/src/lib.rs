//! NL2SQL Stages: the stages of the question-to-SQL pipeline and the
//! orchestrator that sequences them.
//!
//! # Pipeline Flow
//!
//! ```text
//! Question → Language → Budget → (Link) → Generate → Dialect → Verify → Response
//!              ↓          ↓        ↓          ↓          ↓         ↓
//!          canonical   usage    subset     SQL/error  target SQL  test units
//! ```

pub mod dialect;
pub mod generate;
pub mod language;
pub mod linking;
pub mod orchestrator;
pub mod prompted;
pub mod verify;

pub use dialect::{DialectNormalizer, DialectOutcome};
pub use generate::SqlGenerator;
pub use language::{restore_original, LanguageDetector, LanguageNormalizer, LanguageOutcome};
pub use linking::LexicalSchemaLinker;
pub use orchestrator::Orchestrator;
pub use prompted::{PromptedCapability, StructuredModel};
pub use verify::TestUnitSynthesizer;

use nl2sql_core::PipelineError;
use std::future::Future;
use std::time::Duration;

/// Awaits one capability call under `limit`. An elapsed timer becomes
/// [`PipelineError::Timeout`]; a capability error is mapped with `on_error`.
pub(crate) async fn bounded<T, F>(
    call: &'static str,
    limit: Duration,
    fut: F,
    on_error: fn(String) -> PipelineError,
) -> Result<T, PipelineError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(on_error(format!("{:#}", e))),
        Err(_) => Err(PipelineError::Timeout {
            call,
            secs: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_maps_errors_and_timeouts() {
        let ok = bounded("translate", Duration::from_secs(1), async { Ok::<_, anyhow::Error>(7) }, PipelineError::Translation).await;
        assert_eq!(ok.unwrap(), 7);

        let failed: Result<(), _> = bounded(
            "translate",
            Duration::from_secs(1),
            async { Err(anyhow::anyhow!("provider down")) },
            PipelineError::Translation,
        )
        .await;
        assert!(matches!(failed, Err(PipelineError::Translation(msg)) if msg == "provider down"));

        let slow: Result<(), _> = bounded(
            "generate",
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, anyhow::Error>(())
            },
            PipelineError::Generation,
        )
        .await;
        assert!(matches!(slow, Err(PipelineError::Timeout { call: "generate", .. })));
    }
}
