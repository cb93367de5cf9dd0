//! Breakdown Core - feature breakdown pipeline
//!
//! Takes an issue-tracker identifier and:
//! - Fetches the issue and builds a feature description
//! - Fans the description out to analysis personas, isolating failures
//! - Synthesizes epics and stories from the analyses
//! - Optionally writes the items back to the tracker
//! - Reports progress as it goes
//!
//! # Example
//!
//! ```rust,ignore
//! use breakdown_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let personas = PersonaRegistry::load_dir("agents")?;
//! let pipeline = BreakdownPipeline::builder()
//!     .with_fetcher(Arc::new(PlaceholderTracker::new()))
//!     .with_personas(personas)
//!     .build()?;
//!
//! let reporter = pipeline.reporter();
//! let result = pipeline.run(BreakdownRequest::new("PROJ-1"), &reporter).await?;
//! println!("{}", result.breakdown_summary);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod analysis;
pub mod config;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod persona;
pub mod progress;
pub mod state;
pub mod synthesis;
pub mod tracker;
pub mod types;

// Re-exports for convenience
pub use analysis::{
    analyze_all, FanOutOptions, FanOutReport, KeywordAnalyzer, PersonaAnalyzer, ProgressRange,
};
pub use config::BreakdownConfig;
pub use error::{
    BreakdownError, ErrorKind, PersonaError, SynthesisError, TrackerError, UnknownPriority,
    ValidationError,
};
pub use event::{ErrorPayload, PipelineEvent, RunHandle};
pub use orchestrator::{BreakdownPipeline, PipelineBuilder};
pub use persona::{ConcernRule, PersonaConfig, PersonaRegistry};
pub use progress::{ProgressEvent, ProgressReporter, Stage, StageCounters};
pub use state::{PipelineState, RunStatus, TransitionError};
pub use synthesis::{generic_breakdown, HeuristicSynthesizer, Synthesizer, GENERIC_EPIC};
pub use tracker::{
    fetch_issue, write_items, CreatedItem, InMemoryTracker, IssueFetcher, IssueWriter,
    PlaceholderTracker,
};
pub use types::{
    AgentAnalyses, Breakdown, BreakdownRequest, BreakdownResult, Complexity, IssueRecord,
    ItemKind, PersonaAnalysis, Priority, RunId, WorkItem,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Breakdown Core
    pub use crate::{
        BreakdownConfig, BreakdownError, BreakdownPipeline, BreakdownRequest, BreakdownResult,
        InMemoryTracker, IssueFetcher, IssueWriter, KeywordAnalyzer, PersonaAnalyzer,
        PersonaConfig, PersonaRegistry, PipelineEvent, PlaceholderTracker, ProgressReporter,
        RunHandle, Stage, Synthesizer,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn placeholder_flow_end_to_end() {
        let personas = PersonaRegistry::from_personas([
            PersonaConfig::new("ARCHITECT")
                .with_component("gateway")
                .with_recommendation("Route traffic through the gateway"),
            PersonaConfig::new("QA").with_concern("Placeholder", "No real requirements yet"),
        ]);
        let pipeline = BreakdownPipeline::placeholder(personas);
        let reporter = pipeline.reporter();
        let mut progress = reporter.subscribe();

        let result = pipeline
            .run(
                BreakdownRequest::new("RHOAIENG-1").with_create_items(true),
                &reporter,
            )
            .await
            .unwrap();

        assert_eq!(result.agent_analyses.len(), 2);
        assert!(result.epics.iter().any(|e| e.title == "Gateway Implementation"));
        assert!(result
            .stories
            .iter()
            .any(|s| s.title == "Mitigate risk: No real requirements yet"));

        let created = result.created_items.unwrap();
        assert_eq!(created.len(), result.epics.len() + result.stories.len());
        assert_eq!(created[0], "RHOAIENG-1000");
        let mut last = 0;
        while let Ok(event) = progress.try_recv() {
            last = event.progress;
        }
        assert_eq!(last, 100);
    }

    #[tokio::test]
    async fn shared_pipeline_serves_concurrent_streams() {
        let pipeline = Arc::new(BreakdownPipeline::placeholder(PersonaRegistry::new()));
        let a = pipeline.stream(BreakdownRequest::new("A-1"));
        let b = pipeline.stream(BreakdownRequest::new("B-1"));
        assert_ne!(a.run_id(), b.run_id());

        let (a, b) = tokio::join!(a.collect(), b.collect());
        assert!(matches!(a.last(), Some(PipelineEvent::Result { .. })));
        assert!(matches!(b.last(), Some(PipelineEvent::Result { .. })));
    }

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
