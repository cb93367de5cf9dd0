//! Progress event channel
//!
//! Fire-and-forget status updates emitted as the pipeline advances.
//! Emission never fails and never blocks: the broadcast side drops events for
//! lagging or absent subscribers, while an optional unbounded tap delivers
//! every event in order to a single consumer (the run event stream).

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Pipeline stage reported in progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Issue lookup started
    FetchingIssue,
    /// Issue lookup finished
    IssueFetched,
    /// Persona fan-out running
    AgentAnalysis,
    /// Every persona attempted
    AnalysisComplete,
    /// Synthesizer running
    Synthesizing,
    /// Epics and stories ready
    SynthesisComplete,
    /// Write-back running
    WritingItems,
    /// Write-back finished
    ItemsWritten,
    /// Result assembled
    Completed,
}

impl Stage {
    /// Wire name of the stage
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FetchingIssue => "fetching_issue",
            Self::IssueFetched => "issue_fetched",
            Self::AgentAnalysis => "agent_analysis",
            Self::AnalysisComplete => "analysis_complete",
            Self::Synthesizing => "synthesizing",
            Self::SynthesisComplete => "synthesis_complete",
            Self::WritingItems => "writing_items",
            Self::ItemsWritten => "items_written",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage-specific counters, flattened into the event object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageCounters {
    /// Fan-out progress
    Agents {
        /// Personas that succeeded so far
        completed_agents: usize,
        /// Personas configured
        total_agents: usize,
    },
    /// Synthesized item counts
    Items {
        /// Epic count
        epics: usize,
        /// Story count
        stories: usize,
    },
    /// Written item count
    Created {
        /// Items created in the tracker
        created_items: usize,
    },
    /// Issue being fetched
    Issue {
        /// Tracker key
        issue_id: String,
    },
    /// No counters
    None {},
}

/// One progress update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Stage
    pub stage: Stage,
    /// Percent complete, 0-100
    pub progress: u8,
    /// Human-readable message
    pub message: String,
    /// Stage counters
    #[serde(flatten)]
    pub counters: StageCounters,
}

/// Emitting side of the progress channel
///
/// Cloning shares the underlying channel and the monotonic high-water mark.
/// A reporter handed to several runs is split with [`ProgressReporter::for_run`]
/// so each run clamps against its own mark.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: broadcast::Sender<ProgressEvent>,
    last: Arc<AtomicU8>,
    tap: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    /// Create reporter with broadcast buffer capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            last: Arc::new(AtomicU8::new(0)),
            tap: None,
        }
    }

    /// With a lossless in-order tap
    #[inline]
    #[must_use]
    pub fn with_tap(mut self, tap: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.tap = Some(tap);
        self
    }

    /// Same channel and tap, with a fresh high-water mark
    #[must_use]
    pub fn for_run(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            last: Arc::new(AtomicU8::new(0)),
            tap: self.tap.clone(),
        }
    }

    /// Subscribe to events emitted from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Highest progress value emitted so far
    #[inline]
    #[must_use]
    pub fn last_progress(&self) -> u8 {
        self.last.load(Ordering::Acquire)
    }

    /// Emit a progress event
    ///
    /// Values above 100 are capped; values below the last emitted value are
    /// raised to it.
    pub fn emit(
        &self,
        stage: Stage,
        progress: u8,
        message: impl Into<String>,
        counters: StageCounters,
    ) {
        let requested = progress.min(100);
        let previous = self.last.fetch_max(requested, Ordering::AcqRel);
        let progress = requested.max(previous);
        if progress != requested {
            tracing::debug!(%stage, requested, progress, "Progress clamped to stay monotonic");
        }

        let event = ProgressEvent {
            stage,
            progress,
            message: message.into(),
            counters,
        };
        tracing::debug!(%stage, progress, message = %event.message, "Progress");

        if let Some(tap) = &self.tap {
            // Receiver gone means the caller abandoned the run
            let _ = tap.send(event.clone());
        }
        let _ = self.sender.send(event);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(64)
    }
}
