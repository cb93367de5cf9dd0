//! Persona analysis fan-out
//!
//! Runs every configured persona over the shared feature description. A
//! persona failure is logged and recorded in the report but never aborts the
//! fan-out; the pipeline proceeds with whatever analyses succeeded, even none.
//!
//! Progress for the stage is emitted from the single loop that collects
//! results, so it stays monotonic under concurrent execution:
//! - `start` when the fan-out begins
//! - `start + successes * (end - start) / total`, capped below `end`, per success
//! - `end` exactly once, after the last persona was attempted

use crate::error::PersonaError;
use crate::persona::{PersonaConfig, PersonaRegistry};
use crate::progress::{ProgressReporter, Stage, StageCounters};
use crate::types::{AgentAnalyses, Complexity, PersonaAnalysis};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::time::{Duration, Instant};

/// Analysis operation invoked once per persona
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersonaAnalyzer: Send + Sync {
    /// Analyze a feature description from one persona's perspective
    ///
    /// # Errors
    /// - `PersonaError` for any failure; the fan-out isolates it
    async fn analyze(
        &self,
        persona: &PersonaConfig,
        description: &str,
    ) -> Result<PersonaAnalysis, PersonaError>;
}

/// Offline analyzer driven by the persona's keyword rules
///
/// Deterministic: the same persona and description always produce the same
/// analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    /// Create keyword analyzer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Complexity implied by the number of matched keywords
    #[must_use]
    pub fn complexity_for(matches: usize) -> Complexity {
        match matches {
            0 => Complexity::Unknown,
            1..=2 => Complexity::Low,
            3..=5 => Complexity::Medium,
            _ => Complexity::High,
        }
    }
}

#[async_trait]
impl PersonaAnalyzer for KeywordAnalyzer {
    async fn analyze(
        &self,
        persona: &PersonaConfig,
        description: &str,
    ) -> Result<PersonaAnalysis, PersonaError> {
        if description.trim().is_empty() {
            return Err(PersonaError::EmptyDescription(persona.persona.clone()));
        }

        let text = description.to_lowercase();
        let mentions = |needle: &str| {
            let needle = needle.trim().to_lowercase();
            !needle.is_empty() && text.contains(&needle)
        };

        let matched: Vec<&str> = persona
            .keywords
            .iter()
            .map(String::as_str)
            .filter(|&kw| mentions(kw))
            .collect();

        let mut components: Vec<String> = persona
            .components
            .iter()
            .filter(|c| mentions(c.as_str()))
            .cloned()
            .collect();
        if components.is_empty() {
            components.clone_from(&persona.components);
        }

        let concerns = persona
            .concerns
            .iter()
            .filter(|rule| mentions(rule.trigger.as_str()))
            .map(|rule| rule.concern.clone())
            .collect();

        let summary = if matched.is_empty() {
            format!("{} found no matching keywords", persona.display_name())
        } else {
            format!(
                "{} matched {} keyword(s): {}",
                persona.display_name(),
                matched.len(),
                matched.join(", ")
            )
        };

        let mut analysis = PersonaAnalysis::new(&persona.persona, summary)
            .with_complexity(Self::complexity_for(matched.len()));
        analysis.concerns = concerns;
        analysis.recommendations.clone_from(&persona.recommendations);
        analysis.required_components = components;
        analysis.extra.insert(
            "matched_keywords".to_string(),
            serde_json::Value::from(matched),
        );

        Ok(analysis)
    }
}

/// Slice of the overall progress scale owned by the fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressRange {
    /// Value emitted when the fan-out starts
    pub start: u8,
    /// Value emitted once every persona was attempted
    pub end: u8,
}

impl ProgressRange {
    /// Range used by the breakdown pipeline
    pub const ANALYSIS: Self = Self { start: 30, end: 70 };

    /// Progress after `completed` successes out of `total`
    ///
    /// Stays strictly below `end`, which is reserved for completion.
    #[must_use]
    pub fn at(self, completed: usize, total: usize) -> u8 {
        if total == 0 || self.end <= self.start {
            return self.start;
        }
        let span = usize::from(self.end - self.start);
        let offset = (completed.min(total) * span / total).min(span - 1);
        // offset < span <= u8::MAX
        self.start + u8::try_from(offset).unwrap_or(0)
    }
}

impl Default for ProgressRange {
    fn default() -> Self {
        Self::ANALYSIS
    }
}

/// Fan-out tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutOptions {
    /// Personas analyzed at once (1 = sequential, in registry order)
    pub concurrency: usize,
    /// Per-persona deadline
    pub timeout: Duration,
    /// Progress slice
    pub range: ProgressRange,
}

impl Default for FanOutOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            timeout: Duration::from_secs(120),
            range: ProgressRange::ANALYSIS,
        }
    }
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Default)]
pub struct FanOutReport {
    /// Successful analyses keyed by persona
    pub analyses: AgentAnalyses,
    /// Isolated failures, in completion order
    pub failures: Vec<PersonaError>,
}

impl FanOutReport {
    /// Personas attempted
    #[inline]
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.analyses.len() + self.failures.len()
    }
}

async fn analyze_one<'a>(
    analyzer: &dyn PersonaAnalyzer,
    persona: &'a PersonaConfig,
    description: &str,
    timeout: Duration,
) -> (&'a str, Result<PersonaAnalysis, PersonaError>) {
    let started = Instant::now();
    let outcome = match tokio::time::timeout(timeout, analyzer.analyze(persona, description)).await
    {
        Ok(result) => result,
        Err(_) => Err(PersonaError::Timeout {
            persona: persona.persona.clone(),
            duration_secs: timeout.as_secs(),
        }),
    };
    tracing::debug!(
        persona = %persona.persona,
        ok = outcome.is_ok(),
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Persona analysis finished"
    );
    (persona.persona.as_str(), outcome)
}

/// Run every persona over `description`
///
/// Never fails: the report carries whatever succeeded and every isolated
/// failure.
pub async fn analyze_all(
    analyzer: &dyn PersonaAnalyzer,
    personas: &PersonaRegistry,
    description: &str,
    options: FanOutOptions,
    reporter: &ProgressReporter,
) -> FanOutReport {
    let total = personas.len();
    let range = options.range;
    let mut report = FanOutReport::default();

    reporter.emit(
        Stage::AgentAnalysis,
        range.start,
        format!("Starting analysis with {total} personas"),
        StageCounters::Agents {
            completed_agents: 0,
            total_agents: total,
        },
    );

    // Collected eagerly so the stream type carries no closure; keeps the
    // future `Send` for any lifetime when spawned
    let pending: Vec<_> = personas
        .iter()
        .map(|persona| analyze_one(analyzer, persona, description, options.timeout))
        .collect();
    let mut results = stream::iter(pending).buffer_unordered(options.concurrency.max(1));

    while let Some((key, outcome)) = results.next().await {
        match outcome {
            Ok(mut analysis) => {
                analysis.persona = key.to_string();
                report.analyses.insert(key.to_string(), analysis);
                let completed = report.analyses.len();
                reporter.emit(
                    Stage::AgentAnalysis,
                    range.at(completed, total),
                    format!("{key} analysis complete"),
                    StageCounters::Agents {
                        completed_agents: completed,
                        total_agents: total,
                    },
                );
            }
            Err(err) => {
                tracing::warn!(persona = key, %err, "Persona analysis failed");
                report.failures.push(err);
            }
        }
    }

    let completed = report.analyses.len();
    reporter.emit(
        Stage::AnalysisComplete,
        range.end,
        format!("{completed} of {total} personas contributed"),
        StageCounters::Agents {
            completed_agents: completed,
            total_agents: total,
        },
    );

    report
}
