//! Pipeline orchestrator
//!
//! Sequences fetch → fan-out → synthesis → optional write-back for one
//! request. Intermediate state is carried in typed stage values that each
//! step consumes and hands on, so a later stage cannot run without the output
//! of the earlier ones.

use crate::analysis::{analyze_all, FanOutOptions, KeywordAnalyzer, PersonaAnalyzer, ProgressRange};
use crate::config::BreakdownConfig;
use crate::error::{BreakdownError, ValidationError};
use crate::event::{PipelineEvent, RunHandle};
use crate::persona::PersonaRegistry;
use crate::progress::{ProgressReporter, Stage, StageCounters};
use crate::state::{PipelineState, RunStatus};
use crate::synthesis::{HeuristicSynthesizer, Synthesizer};
use crate::tracker::{fetch_issue, write_items, IssueFetcher, IssueWriter, PlaceholderTracker};
use crate::types::{
    project_key, AgentAnalyses, Breakdown, BreakdownRequest, BreakdownResult, IssueRecord, RunId,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Validated request entering the pipeline
struct Accepted {
    run_id: RunId,
    request: BreakdownRequest,
    started: Instant,
}

/// Issue record available
struct Fetched {
    accepted: Accepted,
    issue: IssueRecord,
}

/// Persona analyses collected
struct Analyzed {
    fetched: Fetched,
    analyses: AgentAnalyses,
}

/// Epics and stories ready
struct Synthesized {
    analyzed: Analyzed,
    breakdown: Breakdown,
}

/// Feature breakdown pipeline
///
/// Stateless between runs; one instance serves any number of requests.
pub struct BreakdownPipeline {
    config: BreakdownConfig,
    fetcher: Arc<dyn IssueFetcher>,
    writer: Option<Arc<dyn IssueWriter>>,
    analyzer: Arc<dyn PersonaAnalyzer>,
    synthesizer: Arc<dyn Synthesizer>,
    personas: PersonaRegistry,
}

impl std::fmt::Debug for BreakdownPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakdownPipeline")
            .field("config", &self.config)
            .field("personas", &self.personas.keys().collect::<Vec<_>>())
            .field("write_back", &self.writer.is_some())
            .finish_non_exhaustive()
    }
}

impl BreakdownPipeline {
    /// Start building a pipeline
    #[inline]
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Pipeline wired to the placeholder tracker for both fetch and write
    #[must_use]
    pub fn placeholder(personas: PersonaRegistry) -> Self {
        let tracker = Arc::new(PlaceholderTracker::new());
        let config = BreakdownConfig::default();
        Self {
            analyzer: Arc::new(KeywordAnalyzer::new()),
            synthesizer: Arc::new(HeuristicSynthesizer::new(config.max_epics)),
            config,
            fetcher: tracker.clone(),
            writer: Some(tracker),
            personas,
        }
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BreakdownConfig {
        &self.config
    }

    /// Configured personas
    #[inline]
    #[must_use]
    pub fn personas(&self) -> &PersonaRegistry {
        &self.personas
    }

    /// Check if results can be written back
    #[inline]
    #[must_use]
    pub fn can_write_back(&self) -> bool {
        self.writer.is_some()
    }

    /// Fresh progress reporter sized from the configuration
    #[must_use]
    pub fn reporter(&self) -> ProgressReporter {
        ProgressReporter::new(self.config.progress_capacity)
    }

    /// Validate a request against this pipeline
    ///
    /// # Errors
    /// - `ValidationError` for bad fields or unavailable write-back
    pub fn validate(&self, request: &BreakdownRequest) -> Result<(), ValidationError> {
        request.validate()?;
        if request.create_items && self.writer.is_none() {
            return Err(ValidationError::WriteBackUnavailable);
        }
        Ok(())
    }

    /// Run one request to completion
    ///
    /// Progress is emitted through `reporter`, clamped per run, so one
    /// reporter may serve any number of sequential or concurrent runs. A
    /// rejected request emits no progress at all.
    ///
    /// # Errors
    /// - `BreakdownError::Validation` if the request is rejected
    /// - `BreakdownError::NotFound` if the issue does not exist
    /// - `BreakdownError::Upstream` on tracker failure or timeout
    /// - `BreakdownError::Synthesis` if the synthesizer output is invalid
    pub async fn run(
        &self,
        request: BreakdownRequest,
        reporter: &ProgressReporter,
    ) -> Result<BreakdownResult, BreakdownError> {
        self.run_with_id(RunId::new(), request, reporter).await
    }

    async fn run_with_id(
        &self,
        run_id: RunId,
        request: BreakdownRequest,
        reporter: &ProgressReporter,
    ) -> Result<BreakdownResult, BreakdownError> {
        let span = tracing::info_span!("breakdown_run", %run_id, issue_id = %request.issue_id);
        self.execute(run_id, request, reporter).instrument(span).await
    }

    async fn execute(
        &self,
        run_id: RunId,
        request: BreakdownRequest,
        reporter: &ProgressReporter,
    ) -> Result<BreakdownResult, BreakdownError> {
        let started = Instant::now();
        let mut status = RunStatus::new();

        if let Err(err) = self.validate(&request) {
            status.advance(PipelineState::Rejected);
            tracing::warn!(%err, "Request rejected");
            return Err(err.into());
        }

        let accepted = Accepted {
            run_id,
            request,
            started,
        };
        let reporter = reporter.for_run();

        match self.drive(accepted, &mut status, &reporter).await {
            Ok(result) => Ok(result),
            Err(err) => {
                status.advance(PipelineState::Failed);
                tracing::warn!(%err, retryable = err.is_retryable(), "Breakdown failed");
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        accepted: Accepted,
        status: &mut RunStatus,
        reporter: &ProgressReporter,
    ) -> Result<BreakdownResult, BreakdownError> {
        let fetched = self.fetch(accepted, status, reporter).await?;
        let analyzed = self.analyze(fetched, status, reporter).await;
        let synthesized = self.synthesize(analyzed, status, reporter).await?;

        let created = if synthesized.analyzed.fetched.accepted.request.create_items {
            Some(self.write(&synthesized, status, reporter).await?)
        } else {
            None
        };

        Ok(self.complete(synthesized, created, status, reporter))
    }

    async fn fetch(
        &self,
        accepted: Accepted,
        status: &mut RunStatus,
        reporter: &ProgressReporter,
    ) -> Result<Fetched, BreakdownError> {
        let issue_id = accepted.request.issue_id.clone();
        status.advance(PipelineState::Fetching);
        reporter.emit(
            Stage::FetchingIssue,
            10,
            format!("Fetching issue {issue_id}"),
            StageCounters::Issue {
                issue_id: issue_id.clone(),
            },
        );

        let issue = fetch_issue(&*self.fetcher, &issue_id, self.config.fetch_timeout()).await?;

        status.advance(PipelineState::Fetched);
        tracing::info!(summary = %issue.summary, status = %issue.status, "Issue fetched");
        reporter.emit(
            Stage::IssueFetched,
            25,
            format!("Fetched {issue_id}: {}", issue.summary),
            StageCounters::Issue { issue_id },
        );

        Ok(Fetched { accepted, issue })
    }

    async fn analyze(
        &self,
        fetched: Fetched,
        status: &mut RunStatus,
        reporter: &ProgressReporter,
    ) -> Analyzed {
        status.advance(PipelineState::Analyzing);
        let description = fetched
            .issue
            .feature_description(fetched.accepted.request.description.as_deref());

        let options = FanOutOptions {
            concurrency: self.config.max_concurrent_personas,
            timeout: self.config.analysis_timeout(),
            range: ProgressRange::ANALYSIS,
        };
        let report = analyze_all(
            &*self.analyzer,
            &self.personas,
            &description,
            options,
            reporter,
        )
        .await;

        status.advance(PipelineState::Analyzed);
        tracing::info!(
            succeeded = report.analyses.len(),
            failed = report.failures.len(),
            "Persona analysis complete"
        );

        Analyzed {
            fetched,
            analyses: report.analyses,
        }
    }

    async fn synthesize(
        &self,
        analyzed: Analyzed,
        status: &mut RunStatus,
        reporter: &ProgressReporter,
    ) -> Result<Synthesized, BreakdownError> {
        status.advance(PipelineState::Synthesizing);
        reporter.emit(
            Stage::Synthesizing,
            75,
            "Synthesizing epics and stories",
            StageCounters::None {},
        );

        let breakdown = self
            .synthesizer
            .synthesize(&analyzed.fetched.issue, &analyzed.analyses)
            .await?;
        breakdown.validate()?;

        tracing::info!(
            epics = breakdown.epics.len(),
            stories = breakdown.stories.len(),
            points = breakdown.total_points(),
            "Breakdown synthesized"
        );
        reporter.emit(
            Stage::SynthesisComplete,
            85,
            format!(
                "Generated {} epic(s) and {} story/stories",
                breakdown.epics.len(),
                breakdown.stories.len()
            ),
            StageCounters::Items {
                epics: breakdown.epics.len(),
                stories: breakdown.stories.len(),
            },
        );

        Ok(Synthesized {
            analyzed,
            breakdown,
        })
    }

    async fn write(
        &self,
        synthesized: &Synthesized,
        status: &mut RunStatus,
        reporter: &ProgressReporter,
    ) -> Result<Vec<String>, BreakdownError> {
        let Some(writer) = &self.writer else {
            return Err(ValidationError::WriteBackUnavailable.into());
        };

        status.advance(PipelineState::Writing);
        let breakdown = &synthesized.breakdown;
        reporter.emit(
            Stage::WritingItems,
            90,
            format!("Creating {} item(s) in the tracker", breakdown.len()),
            StageCounters::Items {
                epics: breakdown.epics.len(),
                stories: breakdown.stories.len(),
            },
        );

        let issue = &synthesized.analyzed.fetched.issue;
        let project = if issue.project.is_empty() {
            project_key(&issue.id)
        } else {
            issue.project.as_str()
        };
        let created =
            write_items(&**writer, project, breakdown, self.config.write_timeout()).await?;

        tracing::info!(count = created.len(), %project, "Items written");
        reporter.emit(
            Stage::ItemsWritten,
            95,
            format!("Created {} item(s)", created.len()),
            StageCounters::Created {
                created_items: created.len(),
            },
        );

        Ok(created)
    }

    fn complete(
        &self,
        synthesized: Synthesized,
        created: Option<Vec<String>>,
        status: &mut RunStatus,
        reporter: &ProgressReporter,
    ) -> BreakdownResult {
        let Synthesized {
            analyzed,
            breakdown,
        } = synthesized;
        let Analyzed { fetched, analyses } = analyzed;
        let Fetched { accepted, issue } = fetched;

        status.advance(PipelineState::Completed);
        let processing_time = accepted.started.elapsed().as_secs_f64();
        tracing::info!(processing_time, "Breakdown completed");
        reporter.emit(
            Stage::Completed,
            100,
            "Feature breakdown completed",
            StageCounters::Items {
                epics: breakdown.epics.len(),
                stories: breakdown.stories.len(),
            },
        );

        BreakdownResult {
            run_id: accepted.run_id,
            original_issue_id: accepted.request.issue_id,
            original_summary: issue.summary,
            breakdown_summary: breakdown.summary(),
            epics: breakdown.epics,
            stories: breakdown.stories,
            agent_analyses: analyses,
            created_items: created,
            processing_time,
            timestamp: Utc::now(),
        }
    }

    /// Spawn a run and observe it as a stream of wire events
    ///
    /// Yields every progress event in emission order, then exactly one
    /// terminal `result` or `error` event. Dropping the handle aborts the run.
    #[must_use]
    pub fn stream(self: &Arc<Self>, request: BreakdownRequest) -> RunHandle {
        let run_id = RunId::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let reporter = self.reporter().with_tap(progress_tx);
        let pipeline = Arc::clone(self);

        let task = tokio::spawn(async move {
            let run = async move {
                let outcome = pipeline.run_with_id(run_id, request, &reporter).await;
                // Closing the tap ends the forwarding loop
                drop(reporter);
                outcome
            };
            let forward = async {
                while let Some(event) = progress_rx.recv().await {
                    let _ = events_tx.send(PipelineEvent::Progress(event));
                }
            };

            let (outcome, ()) = tokio::join!(run, forward);
            let terminal = match outcome {
                Ok(result) => PipelineEvent::result(result),
                Err(err) => PipelineEvent::error(&err),
            };
            let _ = events_tx.send(terminal);
        });

        RunHandle::new(run_id, events_rx, task)
    }
}

/// Builder for [`BreakdownPipeline`]
#[derive(Default)]
pub struct PipelineBuilder {
    config: BreakdownConfig,
    fetcher: Option<Arc<dyn IssueFetcher>>,
    writer: Option<Arc<dyn IssueWriter>>,
    analyzer: Option<Arc<dyn PersonaAnalyzer>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    personas: PersonaRegistry,
}

impl PipelineBuilder {
    /// With configuration
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: BreakdownConfig) -> Self {
        self.config = config;
        self
    }

    /// With issue fetcher (required)
    #[inline]
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn IssueFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// With issue writer, enabling write-back
    #[inline]
    #[must_use]
    pub fn with_writer(mut self, writer: Arc<dyn IssueWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// With persona analyzer (defaults to [`KeywordAnalyzer`])
    #[inline]
    #[must_use]
    pub fn with_analyzer(mut self, analyzer: Arc<dyn PersonaAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// With synthesizer (defaults to [`HeuristicSynthesizer`])
    #[inline]
    #[must_use]
    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// With personas
    #[inline]
    #[must_use]
    pub fn with_personas(mut self, personas: PersonaRegistry) -> Self {
        self.personas = personas;
        self
    }

    /// Build the pipeline
    ///
    /// # Errors
    /// - `BreakdownError::Config` if the configuration is invalid or no
    ///   fetcher was supplied
    pub fn build(self) -> Result<BreakdownPipeline, BreakdownError> {
        self.config.validate()?;
        let fetcher = self
            .fetcher
            .ok_or_else(|| BreakdownError::Config("an issue fetcher is required".to_string()))?;
        let max_epics = self.config.max_epics;

        Ok(BreakdownPipeline {
            config: self.config,
            fetcher,
            writer: self.writer,
            analyzer: self
                .analyzer
                .unwrap_or_else(|| Arc::new(KeywordAnalyzer::new())),
            synthesizer: self
                .synthesizer
                .unwrap_or_else(|| Arc::new(HeuristicSynthesizer::new(max_epics))),
            personas: self.personas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TrackerError};
    use crate::persona::PersonaConfig;
    use crate::progress::ProgressEvent;
    use crate::tracker::{MockIssueFetcher, MockIssueWriter};
    use crate::types::WorkItem;

    fn personas() -> PersonaRegistry {
        PersonaRegistry::from_personas([
            PersonaConfig::new("BACKEND")
                .with_keyword("api")
                .with_component("backend")
                .with_recommendation("Expose backend endpoint"),
            PersonaConfig::new("UX").with_recommendation("Sketch the settings page"),
        ])
    }

    fn fetcher_returning_placeholder() -> MockIssueFetcher {
        let mut fetcher = MockIssueFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|id| Ok(IssueRecord::placeholder(id)));
        fetcher
    }

    fn tapped() -> (ProgressReporter, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ProgressReporter::new(32).with_tap(tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn builder_requires_fetcher() {
        let err = BreakdownPipeline::builder().build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let err = BreakdownPipeline::builder()
            .with_fetcher(Arc::new(PlaceholderTracker::new()))
            .with_config(BreakdownConfig::new().with_max_epics(0))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max_epics"));
    }

    #[tokio::test]
    async fn successful_run_emits_stages_in_order() {
        let pipeline = BreakdownPipeline::builder()
            .with_fetcher(Arc::new(fetcher_returning_placeholder()))
            .with_personas(personas())
            .build()
            .unwrap();
        let (reporter, mut rx) = tapped();

        let result = pipeline
            .run(BreakdownRequest::new("PROJ-1").with_description("new api"), &reporter)
            .await
            .unwrap();

        assert_eq!(result.original_issue_id, "PROJ-1");
        assert_eq!(result.agent_analyses.len(), 2);
        assert!(result.created_items.is_none());

        let stages: Vec<(Stage, u8)> = drain(&mut rx)
            .into_iter()
            .map(|e| (e.stage, e.progress))
            .collect();
        assert_eq!(
            stages,
            vec![
                (Stage::FetchingIssue, 10),
                (Stage::IssueFetched, 25),
                (Stage::AgentAnalysis, 30),
                (Stage::AgentAnalysis, 50),
                (Stage::AgentAnalysis, 69),
                (Stage::AnalysisComplete, 70),
                (Stage::Synthesizing, 75),
                (Stage::SynthesisComplete, 85),
                (Stage::Completed, 100),
            ]
        );
    }

    #[tokio::test]
    async fn result_keeps_requested_issue_id() {
        let mut fetcher = MockIssueFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|id| Ok(IssueRecord::placeholder(id.to_uppercase())));
        let pipeline = BreakdownPipeline::builder()
            .with_fetcher(Arc::new(fetcher))
            .with_personas(personas())
            .build()
            .unwrap();

        let result = pipeline
            .run(BreakdownRequest::new("proj-1"), &pipeline.reporter())
            .await
            .unwrap();

        assert_eq!(result.original_issue_id, "proj-1");
        assert_eq!(result.original_summary, "Feature from PROJ-1");
    }

    #[tokio::test]
    async fn rejected_request_emits_nothing() {
        let mut fetcher = MockIssueFetcher::new();
        fetcher.expect_fetch().never();
        let pipeline = BreakdownPipeline::builder()
            .with_fetcher(Arc::new(fetcher))
            .build()
            .unwrap();
        let (reporter, mut rx) = tapped();

        let err = pipeline
            .run(BreakdownRequest::new(""), &reporter)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BreakdownError::Validation(ValidationError::MissingIssueId)
        ));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(reporter.last_progress(), 0);
    }

    #[tokio::test]
    async fn write_back_without_writer_is_rejected() {
        let pipeline = BreakdownPipeline::builder()
            .with_fetcher(Arc::new(fetcher_returning_placeholder()))
            .build()
            .unwrap();

        let err = pipeline
            .run(
                BreakdownRequest::new("PROJ-1").with_create_items(true),
                &ProgressReporter::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BreakdownError::Validation(ValidationError::WriteBackUnavailable)
        ));
    }

    #[tokio::test]
    async fn fetch_not_found_aborts_before_analysis() {
        let mut fetcher = MockIssueFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|id| Err(TrackerError::NotFound(id.to_string())));
        let pipeline = BreakdownPipeline::builder()
            .with_fetcher(Arc::new(fetcher))
            .with_personas(personas())
            .build()
            .unwrap();
        let (reporter, mut rx) = tapped();

        let err = pipeline
            .run(BreakdownRequest::new("PROJ-404"), &reporter)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFoundError);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, Stage::FetchingIssue);
    }

    #[tokio::test]
    async fn write_back_links_stories_to_epics() {
        let mut writer = MockIssueWriter::new();
        let mut n = 0;
        writer
            .expect_create_item()
            .times(3)
            .returning(move |project, item, parent| {
                n += 1;
                match item.kind {
                    crate::types::ItemKind::Epic => assert!(parent.is_none()),
                    crate::types::ItemKind::Story => assert_eq!(parent.as_deref(), Some("PROJ-1")),
                }
                Ok(format!("{project}-{n}"))
            });

        let pipeline = BreakdownPipeline::builder()
            .with_fetcher(Arc::new(fetcher_returning_placeholder()))
            .with_writer(Arc::new(writer))
            .build()
            .unwrap();
        let (reporter, mut rx) = tapped();

        let result = pipeline
            .run(
                BreakdownRequest::new("PROJ-7").with_create_items(true),
                &reporter,
            )
            .await
            .unwrap();

        // No personas: generic breakdown of 1 epic + 2 stories
        assert_eq!(
            result.created_items,
            Some(vec!["PROJ-1".into(), "PROJ-2".into(), "PROJ-3".into()])
        );
        let stages: Vec<Stage> = drain(&mut rx).into_iter().map(|e| e.stage).collect();
        assert!(stages.contains(&Stage::WritingItems));
        assert!(stages.contains(&Stage::ItemsWritten));
        assert_eq!(stages.last(), Some(&Stage::Completed));
    }

    #[tokio::test]
    async fn invalid_synthesizer_output_fails_run() {
        struct Dangling;

        #[async_trait::async_trait]
        impl Synthesizer for Dangling {
            async fn synthesize(
                &self,
                _issue: &IssueRecord,
                _analyses: &AgentAnalyses,
            ) -> Result<Breakdown, crate::error::SynthesisError> {
                Ok(Breakdown::new(
                    vec![WorkItem::epic("A", "")],
                    vec![WorkItem::story("s", "").with_parent("B")],
                ))
            }
        }

        let pipeline = BreakdownPipeline::builder()
            .with_fetcher(Arc::new(fetcher_returning_placeholder()))
            .with_synthesizer(Arc::new(Dangling))
            .build()
            .unwrap();

        let err = pipeline
            .run(BreakdownRequest::new("PROJ-1"), &ProgressReporter::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SynthesisError);
    }

    #[tokio::test]
    async fn stream_ends_with_single_result() {
        let pipeline = Arc::new(BreakdownPipeline::placeholder(personas()));
        let events = pipeline.stream(BreakdownRequest::new("PROJ-1")).collect().await;

        let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert!(matches!(events.last(), Some(PipelineEvent::Result { .. })));
        assert!(matches!(
            events.first(),
            Some(PipelineEvent::Progress(ProgressEvent {
                stage: Stage::FetchingIssue,
                ..
            }))
        ));
    }
}
