//! Wire events for a streamed pipeline run
//!
//! A run is observed as progress events followed by exactly one terminal
//! `result` or `error` event:
//!
//! ```json
//! {"type":"progress","stage":"fetching_issue","progress":10,"message":"…","issue_id":"PROJ-1"}
//! {"type":"result","data":{"original_issue_id":"PROJ-1", …}}
//! {"type":"error","data":{"message":"…","kind":"not_found_error"}}
//! ```

use crate::error::{BreakdownError, ErrorKind};
use crate::progress::ProgressEvent;
use crate::types::{BreakdownResult, RunId};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Terminal error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable message
    pub message: String,
    /// Error classification
    pub kind: ErrorKind,
}

impl From<&BreakdownError> for ErrorPayload {
    fn from(err: &BreakdownError) -> Self {
        Self {
            message: err.to_string(),
            kind: err.kind(),
        }
    }
}

/// Event emitted by a streamed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Progress update
    Progress(ProgressEvent),
    /// Successful completion
    Result {
        /// Breakdown result
        data: Box<BreakdownResult>,
    },
    /// Failed or rejected run
    Error {
        /// Error details
        data: ErrorPayload,
    },
}

impl PipelineEvent {
    /// Result event
    #[must_use]
    pub fn result(result: BreakdownResult) -> Self {
        Self::Result {
            data: Box::new(result),
        }
    }

    /// Error event
    #[must_use]
    pub fn error(err: &BreakdownError) -> Self {
        Self::Error { data: err.into() }
    }

    /// Check if this event ends the stream
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }

    /// Serialize as one JSON line, without the trailing newline
    ///
    /// # Errors
    /// - `serde_json::Error` if serialization fails
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Handle to a run spawned by `BreakdownPipeline::stream`
///
/// Dropping the handle aborts the run at its next await point.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    events: mpsc::UnboundedReceiver<PipelineEvent>,
    task: JoinHandle<()>,
}

impl RunHandle {
    pub(crate) fn new(
        run_id: RunId,
        events: mpsc::UnboundedReceiver<PipelineEvent>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            run_id,
            events,
            task,
        }
    }

    /// Run identifier
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Next event, `None` once the terminal event was consumed
    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        self.events.recv().await
    }

    /// Drain every remaining event
    pub async fn collect(mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        events
    }

    /// Abort the run
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Check if the run task has finished
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Stream for RunHandle {
    type Item = PipelineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::progress::{Stage, StageCounters};

    #[test]
    fn progress_event_wire_shape() {
        let event = PipelineEvent::Progress(ProgressEvent {
            stage: Stage::FetchingIssue,
            progress: 10,
            message: "Fetching PROJ-1".into(),
            counters: StageCounters::Issue {
                issue_id: "PROJ-1".into(),
            },
        });
        let json: serde_json::Value =
            serde_json::from_str(&event.to_json_line().unwrap()).unwrap();

        assert_eq!(json["type"], "progress");
        assert_eq!(json["stage"], "fetching_issue");
        assert_eq!(json["progress"], 10);
        assert_eq!(json["issue_id"], "PROJ-1");
        assert!(!event.is_terminal());
    }

    #[test]
    fn error_event_wire_shape() {
        let err = BreakdownError::from(ValidationError::MissingIssueId);
        let event = PipelineEvent::error(&err);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["kind"], "validation_error");
        assert!(json["data"]["message"]
            .as_str()
            .unwrap()
            .contains("issue_id is required"));
        assert!(event.is_terminal());
    }
}
